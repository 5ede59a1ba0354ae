use num_enum::{IntoPrimitive, TryFromPrimitive};

/// IANA Kerberos checksum type numbers.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum ChecksumType {
    /// Resolve to the default checksum type of the key's encryption type.
    NONE = 0,
    CRC32 = 1,
    RSA_MD4 = 2,
    RSA_MD4_DES = 3,
    DES_MAC = 4,
    DES_MAC_K = 5,
    RSA_MD4_DES_K = 6,
    RSA_MD5 = 7,
    RSA_MD5_DES = 8,
    HMAC_SHA1_DES3_KD = 12,
    SHA1 = 14,
    HMAC_SHA1_96_AES128 = 15,
    HMAC_SHA1_96_AES256 = 16,
    HMAC_MD5_ARCFOUR = -138,
}

impl ChecksumType {
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            ChecksumType::HMAC_SHA1_DES3_KD
                | ChecksumType::HMAC_SHA1_96_AES128
                | ChecksumType::HMAC_SHA1_96_AES256
                | ChecksumType::HMAC_MD5_ARCFOUR
        )
    }
}
