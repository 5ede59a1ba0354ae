//! aes128-cts-hmac-sha1-96 and aes256-cts-hmac-sha1-96 (RFC3962).

use super::{
    derive_random, usage_constant, EncTypeHandler, PURPOSE_CHECKSUM, PURPOSE_ENCRYPT,
    PURPOSE_INTEGRITY,
};
use crate::asn1::constants::{ChecksumType, EncryptionType};
use crate::constants::{
    AES_128_KEY_LEN, AES_256_KEY_LEN, AES_BLOCK_SIZE, RFC_PBKDF2_SHA1_ITER, SHA1_HMAC_96_LEN,
};
use crate::error::KrbError;

use ::aes::cipher::generic_array::GenericArray;
use ::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use ::aes::{Aes128, Aes256};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use tracing::error;

type HmacSha1 = Hmac<Sha1>;

type AesBlock = [u8; AES_BLOCK_SIZE];

pub(crate) struct AesCtsHmacSha196 {
    etype: EncryptionType,
    key_len: usize,
    checksum_type: ChecksumType,
}

impl AesCtsHmacSha196 {
    pub(crate) const AES128: AesCtsHmacSha196 = AesCtsHmacSha196 {
        etype: EncryptionType::AES128_CTS_HMAC_SHA1_96,
        key_len: AES_128_KEY_LEN,
        checksum_type: ChecksumType::HMAC_SHA1_96_AES128,
    };

    pub(crate) const AES256: AesCtsHmacSha196 = AesCtsHmacSha196 {
        etype: EncryptionType::AES256_CTS_HMAC_SHA1_96,
        key_len: AES_256_KEY_LEN,
        checksum_type: ChecksumType::HMAC_SHA1_96_AES256,
    };

    fn cipher(&self, key: &[u8]) -> Result<AesCipher, KrbError> {
        if key.len() != self.key_len {
            error!(etype = ?self.etype, len = key.len(), "invalid aes key length");
            return Err(KrbError::InvalidEncryptionKey);
        }
        AesCipher::new(key)
    }

    fn dk(&self, key: &[u8], constant: &[u8]) -> Result<Vec<u8>, KrbError> {
        let cipher = self.cipher(key)?;
        // random-to-key is the identity for AES.
        derive_random(constant, AES_BLOCK_SIZE, self.key_len, |block| {
            cipher.encrypt_slice(block)
        })
    }
}

/// The raw AES block cipher for either key size.
enum AesCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl AesCipher {
    fn new(key: &[u8]) -> Result<Self, KrbError> {
        match key.len() {
            AES_128_KEY_LEN => Aes128::new_from_slice(key).map(AesCipher::Aes128),
            AES_256_KEY_LEN => Aes256::new_from_slice(key).map(AesCipher::Aes256),
            _ => return Err(KrbError::InvalidEncryptionKey),
        }
        .map_err(|_| KrbError::InvalidEncryptionKey)
    }

    fn encrypt_block(&self, block: &mut AesBlock) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            AesCipher::Aes128(c) => c.encrypt_block(block),
            AesCipher::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut AesBlock) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            AesCipher::Aes128(c) => c.decrypt_block(block),
            AesCipher::Aes256(c) => c.decrypt_block(block),
        }
    }

    fn encrypt_slice(&self, block: &mut [u8]) -> Result<(), KrbError> {
        let block: &mut AesBlock = block
            .try_into()
            .map_err(|_| KrbError::InvalidBlockLength)?;
        self.encrypt_block(block);
        Ok(())
    }
}

fn to_block(chunk: &[u8]) -> Result<AesBlock, KrbError> {
    chunk.try_into().map_err(|_| KrbError::InvalidBlockLength)
}

fn xor_into(block: &mut [u8], other: &[u8]) {
    for (b, o) in block.iter_mut().zip(other.iter()) {
        *b ^= o;
    }
}

/// CBC with ciphertext stealing, where the last two blocks are always swapped
/// (CS3 in NIST SP800-38A). A single block is plain ECB.
fn encrypt_cts(cipher: &AesCipher, plaintext: &[u8]) -> Result<Vec<u8>, KrbError> {
    let len = plaintext.len();
    if len < AES_BLOCK_SIZE {
        return Err(KrbError::InvalidBlockLength);
    }

    // CBC over the zero padded input. Padding Pn with zeros means the CBC
    // output block Cn is exactly E(Pn* || 0 ^ Cn-1) as CTS requires.
    let mut buf = plaintext.to_vec();
    buf.resize(len.div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE, 0);

    let mut previous: AesBlock = [0u8; AES_BLOCK_SIZE];
    for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        xor_into(chunk, &previous);
        let mut block = to_block(chunk)?;
        cipher.encrypt_block(&mut block);
        chunk.copy_from_slice(&block);
        previous = block;
    }

    let buf_len = buf.len();
    if buf_len > AES_BLOCK_SIZE {
        // Swap Cn-1 and Cn, then drop the stolen tail of what is now last.
        let (head, last) = buf.split_at_mut(buf_len - AES_BLOCK_SIZE);
        head[buf_len - 2 * AES_BLOCK_SIZE..].swap_with_slice(last);
        buf.truncate(len);
    }

    Ok(buf)
}

fn decrypt_cts(cipher: &AesCipher, ciphertext: &[u8]) -> Result<Vec<u8>, KrbError> {
    let len = ciphertext.len();
    if len < AES_BLOCK_SIZE {
        return Err(KrbError::CtsCiphertextInvalid);
    }

    if len == AES_BLOCK_SIZE {
        let mut block = to_block(ciphertext)?;
        cipher.decrypt_block(&mut block);
        return Ok(block.to_vec());
    }

    let num_blocks = len.div_ceil(AES_BLOCK_SIZE);
    // Start of the swapped pair, Cn then Cn-1*.
    let split = (num_blocks - 2) * AES_BLOCK_SIZE;
    let tail_len = len - split - AES_BLOCK_SIZE;

    let mut plaintext = vec![0u8; len];
    let mut previous: AesBlock = [0u8; AES_BLOCK_SIZE];

    // Everything up to Cn-2 is plain CBC.
    for (c_chunk, p_chunk) in ciphertext[..split]
        .chunks_exact(AES_BLOCK_SIZE)
        .zip(plaintext[..split].chunks_exact_mut(AES_BLOCK_SIZE))
    {
        let mut block = to_block(c_chunk)?;
        cipher.decrypt_block(&mut block);
        xor_into(&mut block, &previous);
        p_chunk.copy_from_slice(&block);
        previous = to_block(c_chunk)?;
    }

    // Decrypting Cn gives Z. Z* ^ Cn-1* is Pn, and Cn-1* || Z** rebuilds the
    // full Cn-1 which then finishes the CBC chain.
    let c_n1_star = &ciphertext[split + AES_BLOCK_SIZE..];
    let mut z = to_block(&ciphertext[split..split + AES_BLOCK_SIZE])?;
    cipher.decrypt_block(&mut z);

    for i in 0..tail_len {
        plaintext[split + AES_BLOCK_SIZE + i] = z[i] ^ c_n1_star[i];
    }

    let mut c_n1 = z;
    c_n1[..tail_len].copy_from_slice(c_n1_star);
    cipher.decrypt_block(&mut c_n1);
    xor_into(&mut c_n1, &previous);
    plaintext[split..split + AES_BLOCK_SIZE].copy_from_slice(&c_n1);

    Ok(plaintext)
}

fn hmac_sha1_96(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, KrbError> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| KrbError::InvalidHmacKey)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = mac.finalize().into_bytes().to_vec();
    // Truncate to 96 bits.
    out.truncate(SHA1_HMAC_96_LEN);
    Ok(out)
}

impl EncTypeHandler for AesCtsHmacSha196 {
    fn etype(&self) -> EncryptionType {
        self.etype
    }

    fn key_input_size(&self) -> usize {
        self.key_len
    }

    fn key_size(&self) -> usize {
        self.key_len
    }

    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn confounder_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn checksum_size(&self) -> usize {
        SHA1_HMAC_96_LEN
    }

    fn prf_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn padding_size(&self) -> usize {
        0
    }

    fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    /// PBKDF2-HMAC-SHA1 over the passphrase and salt, then `DK(tkey, "kerberos")`.
    /// The s2kparams, when present, are the iteration count as a 4 byte big
    /// endian integer.
    fn str2key(
        &self,
        password: &[u8],
        salt: &[u8],
        params: Option<&[u8]>,
    ) -> Result<Vec<u8>, KrbError> {
        let iter_count = match params {
            None => RFC_PBKDF2_SHA1_ITER,
            Some(params) => {
                let params: [u8; 4] = params.try_into().map_err(|_| {
                    error!(len = params.len(), "aes s2kparams must be 4 bytes");
                    KrbError::PreauthInvalidS2KParams
                })?;
                u32::from_be_bytes(params)
            }
        };

        if iter_count == 0 {
            error!("refusing an aes s2k iteration count of zero");
            return Err(KrbError::PreauthInvalidS2KParams);
        }

        let mut tkey = vec![0u8; self.key_len];
        pbkdf2_hmac::<Sha1>(password, salt, iter_count, &mut tkey);

        self.dk(&tkey, b"kerberos")
    }

    fn random2key(&self, random: &[u8]) -> Result<Vec<u8>, KrbError> {
        if random.len() != self.key_len {
            return Err(KrbError::InvalidEncryptionKey);
        }
        Ok(random.to_vec())
    }

    fn prf(&self, key: &[u8], seed: &[u8]) -> Result<Vec<u8>, KrbError> {
        let tmp = Sha1::digest(seed);
        let mut block = to_block(&tmp[..AES_BLOCK_SIZE])?;

        let kp = self.dk(key, b"prf")?;
        self.cipher(&kp)?.encrypt_block(&mut block);

        Ok(block.to_vec())
    }

    fn encrypt_with_confounder(
        &self,
        key: &[u8],
        key_usage: i32,
        confounder: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, KrbError> {
        if confounder.len() != AES_BLOCK_SIZE {
            return Err(KrbError::InvalidBlockLength);
        }

        let ke = self.dk(key, &usage_constant(key_usage, PURPOSE_ENCRYPT))?;
        let ki = self.dk(key, &usage_constant(key_usage, PURPOSE_INTEGRITY))?;

        let mut data = Vec::with_capacity(AES_BLOCK_SIZE + plaintext.len() + SHA1_HMAC_96_LEN);
        data.extend_from_slice(confounder);
        data.extend_from_slice(plaintext);

        let mac = hmac_sha1_96(&ki, &[&data])?;

        let mut ciphertext = encrypt_cts(&self.cipher(&ke)?, &data)?;
        ciphertext.extend_from_slice(&mac);

        Ok(ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        if ciphertext.len() < AES_BLOCK_SIZE + SHA1_HMAC_96_LEN {
            error!(len = ciphertext.len(), "aes ciphertext too short");
            return Err(KrbError::InsufficientData);
        }

        let (ciphertext, msg_hmac) = ciphertext.split_at(ciphertext.len() - SHA1_HMAC_96_LEN);

        let ke = self.dk(key, &usage_constant(key_usage, PURPOSE_ENCRYPT))?;
        let ki = self.dk(key, &usage_constant(key_usage, PURPOSE_INTEGRITY))?;

        let mut plaintext = decrypt_cts(&self.cipher(&ke)?, ciphertext)?;
        let my_hmac = hmac_sha1_96(&ki, &[&plaintext])?;

        if !bool::from(my_hmac.as_slice().ct_eq(msg_hmac)) {
            error!(etype = ?self.etype, key_usage, "aes message authentication failed");
            return Err(KrbError::MessageAuthenticationFailed);
        }

        // The first block is the confounder.
        Ok(plaintext.split_off(AES_BLOCK_SIZE))
    }

    fn checksum(&self, key: &[u8], key_usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError> {
        let kc = self.dk(key, &usage_constant(key_usage, PURPOSE_CHECKSUM))?;
        hmac_sha1_96(&kc, &[data])
    }
}

#[cfg(test)]
mod tests {
    use super::{AesCipher, AesCtsHmacSha196};
    use crate::asn1::pa_enc_ts_enc::PaEncTsEnc;
    use crate::constants::RFC_PBKDF2_SHA1_ITER;
    use crate::crypto::{usage_constant, EncTypeHandler, PURPOSE_CHECKSUM};
    use assert_hex::assert_eq_hex;
    use der::Decode;

    const PLAIN: &[u8] = b"kerbex test vector";

    fn iter(count: u32) -> [u8; 4] {
        count.to_be_bytes()
    }

    #[test]
    fn test_str2key_kerbeiros() {
        let out_key = AesCtsHmacSha196::AES256
            .str2key(b"Minnie1234", b"KINGDOM.HEARTSmickey", None)
            .unwrap();

        assert_eq_hex!(
            out_key,
            hex::decode("d3301f0f2539cc4026a569f8b7c36715c8daef109fa3d8b2e14616aacab549fd")
                .unwrap()
        )
    }

    // https://www.rfc-editor.org/rfc/rfc3962#appendix-B

    #[test]
    fn test_str2key_rfc3962_vector_1() {
        let out_key = AesCtsHmacSha196::AES256
            .str2key(b"password", b"ATHENA.MIT.EDUraeburn", Some(&iter(1)))
            .unwrap();

        assert_eq_hex!(
            out_key,
            hex::decode("fe697b52bc0d3ce14432ba036a92e65bbb52280990a2fa27883998d72af30161")
                .unwrap()
        );

        let out_key = AesCtsHmacSha196::AES128
            .str2key(b"password", b"ATHENA.MIT.EDUraeburn", Some(&iter(1)))
            .unwrap();

        assert_eq_hex!(
            out_key,
            hex::decode("42263c6e89f4fc28b8df68ee09799f15").unwrap()
        );
    }

    #[test]
    fn test_str2key_rfc3962_vector_2() {
        let out_key = AesCtsHmacSha196::AES256
            .str2key(b"password", b"ATHENA.MIT.EDUraeburn", Some(&iter(1200)))
            .unwrap();

        assert_eq_hex!(
            out_key,
            hex::decode("55a6ac740ad17b4846941051e1e8b0a7548d93b0ab30a8bc3ff16280382b8c2a")
                .unwrap()
        )
    }

    #[test]
    fn test_str2key_rejects_bad_params() {
        assert!(AesCtsHmacSha196::AES256
            .str2key(b"password", b"salt", Some(&[0, 1]))
            .is_err());
        assert!(AesCtsHmacSha196::AES256
            .str2key(b"password", b"salt", Some(&iter(0)))
            .is_err());
    }

    #[test]
    fn test_str2key_default_params() {
        let implicit = AesCtsHmacSha196::AES128
            .str2key(b"password", b"EXAMPLE.COMalice", None)
            .unwrap();
        let explicit = AesCtsHmacSha196::AES128
            .str2key(
                b"password",
                b"EXAMPLE.COMalice",
                Some(&iter(RFC_PBKDF2_SHA1_ITER)),
            )
            .unwrap();
        assert_eq!(implicit, explicit);
        assert_eq_hex!(
            implicit,
            hex::decode("6c3f56be2e4b4653921d4307fa37c36d").unwrap()
        );
    }

    #[test]
    fn test_aes256_cts_hmac_sha1_96_decrypt_1() {
        let out_key = AesCtsHmacSha196::AES256
            .str2key(b"admin", b"admin1234", None)
            .unwrap();

        let input_data = hex::decode(
            "29737f3db6bcdfe9990fb2136d3efe6f2100e6c4ac75824299d8d3702f5a2e31c7a336747dfd734a1ea0165ebb27c0d7ce9b5aec7a",
        )
        .unwrap();

        let data = AesCtsHmacSha196::AES256
            .decrypt(&input_data, &out_key, 1)
            .unwrap();

        assert_eq!(data, b"3ahwzt9MG9WVEuBVC5j0oi6sI");
    }

    #[test]
    fn test_aes256_cts_hmac_sha1_96_decrypt_2() {
        let out_key = AesCtsHmacSha196::AES256
            .str2key(b"test", b"test1234", None)
            .unwrap();

        let input_data = hex::decode(
            "3d291c685489e7b75dabdc6e010ad0019db16481b12cb8bfa513619242761f990de2c027661c9833bcced3",
        )
        .unwrap();

        let data = AesCtsHmacSha196::AES256
            .decrypt(&input_data, &out_key, 2)
            .unwrap();

        assert_eq!(data, b"lJ3ftfwxjsR522O");
    }

    #[test]
    fn test_aes256_pa_enc_timestamp_decrypt() {
        let enc_data = hex::decode("b736f4dba847718b9f634b7ac94d5d691663164d877a0d875b94f786222ae9dca8cf68a972cfe6b5bec1c29682ec3c507307e7c32eedc032")
            .unwrap();

        let out_key = AesCtsHmacSha196::AES256
            .str2key(b"password", b"EXAMPLE.COMtestuser_preauth", None)
            .unwrap();

        let data = AesCtsHmacSha196::AES256
            .decrypt(&enc_data, &out_key, 1)
            .unwrap();

        let pa_enc_ts_enc = PaEncTsEnc::from_der(&data).unwrap();
        assert_eq!(pa_enc_ts_enc.pausec, Some(743725));
    }

    #[test]
    fn test_encrypt_known_confounder() {
        let a128 = hex::decode("6c3f56be2e4b4653921d4307fa37c36d").unwrap();
        let a256 =
            hex::decode("26071f2dbfbecdded379cf9d227ed0f8dde26f8beaa0b9a650c5af6f274b1b1e")
                .unwrap();
        let confounder: Vec<u8> = (0..16).collect();

        let enc = AesCtsHmacSha196::AES128
            .encrypt_with_confounder(&a128, 3, &confounder, PLAIN)
            .unwrap();
        assert_eq_hex!(
            enc,
            hex::decode("025eb47988bcc6d7703928d82095ea224c5992d0a4915b6d7fa36a6d116fbaaa8fdd7d61721bb3c6bef25dfbfe40").unwrap()
        );

        let enc = AesCtsHmacSha196::AES256
            .encrypt_with_confounder(&a256, 3, &confounder, PLAIN)
            .unwrap();
        assert_eq_hex!(
            enc,
            hex::decode("a8beac737f27239fb3b7ef9f8bbbb21e07169665de42766ff08e54b04dc9c42fa222da9c5bd5117b86c1766afb05").unwrap()
        );
        assert_eq!(
            AesCtsHmacSha196::AES256.decrypt(&enc, &a256, 3).unwrap(),
            PLAIN
        );

        // An empty plaintext is only the confounder block.
        let enc = AesCtsHmacSha196::AES256
            .encrypt_with_confounder(&a256, 3, &confounder, b"")
            .unwrap();
        assert_eq_hex!(
            enc,
            hex::decode("a8beac737f27239fb3b7ef9f8bbbb21e11c28610a576a6ada982a395").unwrap()
        );
        assert!(AesCtsHmacSha196::AES256
            .decrypt(&enc, &a256, 3)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_aes256_cts_hmac_sha1_96_reflexive() {
        let out_key = AesCtsHmacSha196::AES256
            .str2key(b"test", b"test1234", None)
            .unwrap();

        // Multiple blocks aligned, half a block, exactly one block, multiple
        // blocks not aligned.
        for (len, key_usage) in [(32, 2), (8, 3), (16, 4), (49, 5)] {
            let input_data = vec![0xa5u8; len];
            let enc_data = AesCtsHmacSha196::AES256
                .encrypt(&input_data, &out_key, key_usage)
                .unwrap();
            assert_eq!(enc_data.len(), 16 + len + 12);

            let data = AesCtsHmacSha196::AES256
                .decrypt(&enc_data, &out_key, key_usage)
                .unwrap();
            assert_eq!(data, input_data);
        }
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let key = vec![7u8; 16];
        let mut enc = AesCtsHmacSha196::AES128
            .encrypt(PLAIN, &key, 3)
            .unwrap();
        enc[20] ^= 0x01;
        assert!(AesCtsHmacSha196::AES128.decrypt(&enc, &key, 3).is_err());

        assert!(AesCtsHmacSha196::AES128
            .decrypt(&enc[..27], &key, 3)
            .is_err());
    }

    #[test]
    fn test_prf() {
        let a128 = hex::decode("6c3f56be2e4b4653921d4307fa37c36d").unwrap();
        assert_eq_hex!(
            AesCtsHmacSha196::AES128.prf(&a128, b"test").unwrap(),
            hex::decode("63fce46c7c5d4b52db9a6d2050433724").unwrap()
        );
    }

    #[test]
    fn test_checksum_dk_hmac_sha1_96() {
        let input = "3067a00703050000810000a20d1b0b4558414d504c452e434f4da3253023a003020103a11c301a1b04686f73741b127065707065722e6578616d706c652e636f6da511180f32303234313031303230333832335aa7060204769220c1a80b3009020112020113020114";
        let input = hex::decode(input).unwrap();
        let base_key =
            hex::decode("3C4EEFA91060DC4000582C17885AA63A58CD5A57C5CD3E7601A0587E7E05F9D0")
                .unwrap();
        let derived_key =
            hex::decode("14AD9322E8134937815FB995067F8C1859A8237C599E450F2BC1E99330C94232")
                .unwrap();

        let kc = AesCtsHmacSha196::AES256
            .dk(&base_key, &usage_constant(6, PURPOSE_CHECKSUM))
            .unwrap();
        assert_eq_hex!(kc, derived_key);

        let checksum = AesCtsHmacSha196::AES256
            .checksum(&base_key, 6, &input)
            .unwrap();
        assert_eq_hex!(checksum, hex::decode("351E56F9FA207CDCA62A0BDC").unwrap());
    }

    #[test]
    fn test_cipher_rejects_bad_key_length() {
        assert!(AesCipher::new(&[0u8; 24]).is_err());
        assert!(AesCtsHmacSha196::AES128
            .encrypt(PLAIN, &[0u8; 32], 1)
            .is_err());
    }
}
