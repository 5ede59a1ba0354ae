use crate::error::KrbError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum EncryptionType {
    DES_CBC_CRC = 1,
    DES_CBC_MD4 = 2,
    DES_CBC_MD5 = 3,
    DES3_CBC_MD5 = 5,
    DES3_CBC_SHA1 = 7,
    // PKINIT
    DSA_SHA1_CMS = 9,
    MD5_RSA_CMS = 10,
    SHA1_RSA_CMS = 11,
    RC2_CBC_ENV = 12,
    RSA_ENV = 13,
    RSA_ES_OAEP_ENV = 14,
    DES3_CBC_ENV = 15,

    DES3_CBC_SHA1_KD = 16,
    AES128_CTS_HMAC_SHA1_96 = 17,
    AES256_CTS_HMAC_SHA1_96 = 18,
    AES128_CTS_HMAC_SHA256_128 = 19,
    AES256_CTS_HMAC_SHA384_192 = 20,
    RC4_HMAC = 23,
    RC4_HMAC_EXP = 24,
    CAMELLIA128_CTS_CMAC = 25,
    CAMELLIA256_CTS_CMAC = 26,
}

impl EncryptionType {
    /// The names used by krb5.conf and kdc.conf for the suites we implement.
    pub fn name(self) -> &'static str {
        match self {
            EncryptionType::DES3_CBC_SHA1_KD => "des3-cbc-sha1",
            EncryptionType::AES128_CTS_HMAC_SHA1_96 => "aes128-cts-hmac-sha1-96",
            EncryptionType::AES256_CTS_HMAC_SHA1_96 => "aes256-cts-hmac-sha1-96",
            EncryptionType::RC4_HMAC => "arcfour-hmac",
            _ => "unsupported",
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncryptionType {
    type Err = KrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "des3-cbc-sha1" | "des3-hmac-sha1" | "des3-cbc-sha1-kd" => {
                Ok(EncryptionType::DES3_CBC_SHA1_KD)
            }
            "aes128-cts-hmac-sha1-96" | "aes128-cts" | "aes128" => {
                Ok(EncryptionType::AES128_CTS_HMAC_SHA1_96)
            }
            "aes256-cts-hmac-sha1-96" | "aes256-cts" | "aes256" => {
                Ok(EncryptionType::AES256_CTS_HMAC_SHA1_96)
            }
            "arcfour-hmac" | "rc4-hmac" | "arcfour-hmac-md5" => Ok(EncryptionType::RC4_HMAC),
            _ => Err(KrbError::UnsupportedEncryption),
        }
    }
}
