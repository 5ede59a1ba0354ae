//! des3-cbc-sha1-kd (RFC3961 section 6.3). Only kept for interoperability with
//! old KDCs, and off unless the encryption policy enables it.

use super::nfold::n_fold;
use super::{
    derive_random, usage_constant, EncTypeHandler, PURPOSE_CHECKSUM, PURPOSE_ENCRYPT,
    PURPOSE_INTEGRITY,
};
use crate::asn1::constants::{ChecksumType, EncryptionType};
use crate::constants::{DES3_KEY_INPUT_LEN, DES3_KEY_LEN, DES_BLOCK_SIZE, SHA1_HMAC_LEN};
use crate::error::KrbError;

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::TdesEde3;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use tracing::error;

type HmacSha1 = Hmac<Sha1>;

type DesBlock = [u8; DES_BLOCK_SIZE];

// The weak and semi-weak DES keys from NIST SP800-67, after parity adjustment.
const WEAK_KEYS: [DesBlock; 16] = [
    [0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01],
    [0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE, 0xFE],
    [0xE0, 0xE0, 0xE0, 0xE0, 0xF1, 0xF1, 0xF1, 0xF1],
    [0x1F, 0x1F, 0x1F, 0x1F, 0x0E, 0x0E, 0x0E, 0x0E],
    [0x01, 0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E],
    [0x1F, 0x01, 0x1F, 0x01, 0x0E, 0x01, 0x0E, 0x01],
    [0x01, 0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1],
    [0xE0, 0x01, 0xE0, 0x01, 0xF1, 0x01, 0xF1, 0x01],
    [0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE],
    [0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0xFE, 0x01],
    [0x1F, 0xE0, 0x1F, 0xE0, 0x0E, 0xF1, 0x0E, 0xF1],
    [0xE0, 0x1F, 0xE0, 0x1F, 0xF1, 0x0E, 0xF1, 0x0E],
    [0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E, 0xFE],
    [0xFE, 0x1F, 0xFE, 0x1F, 0xFE, 0x0E, 0xFE, 0x0E],
    [0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1, 0xFE],
    [0xFE, 0xE0, 0xFE, 0xE0, 0xFE, 0xF1, 0xFE, 0xF1],
];

pub(crate) struct Des3CbcSha1Kd;

/// Set the low bit of the byte so that it has odd parity.
fn odd_parity(b: u8) -> u8 {
    let b = b & 0xfe;
    if b.count_ones() % 2 == 0 {
        b | 1
    } else {
        b
    }
}

/// Spread 56 bits over 8 bytes. The low bits of the 7 input bytes become the
/// high bits of the eighth, then every byte gets odd parity.
fn stretch_56_bits(input: &[u8]) -> DesBlock {
    let mut out = [0u8; DES_BLOCK_SIZE];
    let mut last = 0u8;

    for (i, b) in input.iter().take(7).enumerate() {
        out[i] = odd_parity(*b);
        last |= (b & 1) << (i + 1);
    }
    out[7] = odd_parity(last);

    if WEAK_KEYS.contains(&out) {
        out[7] ^= 0xF0;
    }

    out
}

fn cipher(key: &[u8]) -> Result<TdesEde3, KrbError> {
    if key.len() != DES3_KEY_LEN {
        error!(len = key.len(), "invalid des3 key length");
        return Err(KrbError::InvalidEncryptionKey);
    }
    TdesEde3::new_from_slice(key).map_err(|_| KrbError::InvalidEncryptionKey)
}

fn encrypt_cbc(cipher: &TdesEde3, data: &mut [u8]) -> Result<(), KrbError> {
    if data.len() % DES_BLOCK_SIZE != 0 {
        return Err(KrbError::InvalidBlockLength);
    }

    let mut previous = [0u8; DES_BLOCK_SIZE];
    for chunk in data.chunks_exact_mut(DES_BLOCK_SIZE) {
        for (b, p) in chunk.iter_mut().zip(previous.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        previous.copy_from_slice(chunk);
    }
    Ok(())
}

fn decrypt_cbc(cipher: &TdesEde3, data: &mut [u8]) -> Result<(), KrbError> {
    if data.len() % DES_BLOCK_SIZE != 0 {
        return Err(KrbError::InvalidBlockLength);
    }

    let mut previous = [0u8; DES_BLOCK_SIZE];
    for chunk in data.chunks_exact_mut(DES_BLOCK_SIZE) {
        let mut current = [0u8; DES_BLOCK_SIZE];
        current.copy_from_slice(chunk);
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        for (b, p) in chunk.iter_mut().zip(previous.iter()) {
            *b ^= p;
        }
        previous = current;
    }
    Ok(())
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<Vec<u8>, KrbError> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| KrbError::InvalidHmacKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl Des3CbcSha1Kd {
    fn dk(&self, key: &[u8], constant: &[u8]) -> Result<Vec<u8>, KrbError> {
        let cipher = cipher(key)?;
        let random = derive_random(constant, DES_BLOCK_SIZE, DES3_KEY_INPUT_LEN, |block| {
            encrypt_cbc(&cipher, block)
        })?;
        self.random2key(&random)
    }

    fn pad(&self, confounder: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(confounder.len() + plaintext.len() + DES_BLOCK_SIZE);
        data.extend_from_slice(confounder);
        data.extend_from_slice(plaintext);
        data.resize(data.len().div_ceil(DES_BLOCK_SIZE) * DES_BLOCK_SIZE, 0);
        data
    }
}

impl EncTypeHandler for Des3CbcSha1Kd {
    fn etype(&self) -> EncryptionType {
        EncryptionType::DES3_CBC_SHA1_KD
    }

    fn key_input_size(&self) -> usize {
        DES3_KEY_INPUT_LEN
    }

    fn key_size(&self) -> usize {
        DES3_KEY_LEN
    }

    fn block_size(&self) -> usize {
        DES_BLOCK_SIZE
    }

    fn confounder_size(&self) -> usize {
        DES_BLOCK_SIZE
    }

    fn checksum_size(&self) -> usize {
        SHA1_HMAC_LEN
    }

    fn prf_size(&self) -> usize {
        // SHA1 is truncated to whole blocks before encryption.
        (SHA1_HMAC_LEN / DES_BLOCK_SIZE) * DES_BLOCK_SIZE
    }

    fn padding_size(&self) -> usize {
        DES_BLOCK_SIZE
    }

    fn checksum_type(&self) -> ChecksumType {
        ChecksumType::HMAC_SHA1_DES3_KD
    }

    fn str2key(
        &self,
        password: &[u8],
        salt: &[u8],
        params: Option<&[u8]>,
    ) -> Result<Vec<u8>, KrbError> {
        if params.is_some_and(|p| !p.is_empty()) {
            error!("des3 does not accept s2kparams");
            return Err(KrbError::PreauthInvalidS2KParams);
        }

        let mut secret = Vec::with_capacity(password.len() + salt.len());
        secret.extend_from_slice(password);
        secret.extend_from_slice(salt);

        let tkey = self.random2key(&n_fold(&secret, DES3_KEY_INPUT_LEN))?;
        self.dk(&tkey, b"kerberos")
    }

    fn random2key(&self, random: &[u8]) -> Result<Vec<u8>, KrbError> {
        if random.len() != DES3_KEY_INPUT_LEN {
            return Err(KrbError::InvalidEncryptionKey);
        }
        Ok(random.chunks_exact(7).flat_map(stretch_56_bits).collect())
    }

    fn prf(&self, key: &[u8], seed: &[u8]) -> Result<Vec<u8>, KrbError> {
        let tmp = Sha1::digest(seed);
        let mut block = tmp[..self.prf_size()].to_vec();

        let kp = self.dk(key, b"prf")?;
        encrypt_cbc(&cipher(&kp)?, &mut block)?;
        Ok(block)
    }

    fn encrypt_with_confounder(
        &self,
        key: &[u8],
        key_usage: i32,
        confounder: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, KrbError> {
        if confounder.len() != DES_BLOCK_SIZE {
            return Err(KrbError::InvalidBlockLength);
        }

        let ke = self.dk(key, &usage_constant(key_usage, PURPOSE_ENCRYPT))?;
        let ki = self.dk(key, &usage_constant(key_usage, PURPOSE_INTEGRITY))?;

        let mut data = self.pad(confounder, plaintext);
        let mac = hmac_sha1(&ki, &data)?;

        encrypt_cbc(&cipher(&ke)?, &mut data)?;
        data.extend_from_slice(&mac);
        Ok(data)
    }

    /// The plaintext keeps its trailing block padding. Everything we encrypt
    /// is DER, which is self delimiting.
    fn decrypt(&self, ciphertext: &[u8], key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        if ciphertext.len() < DES_BLOCK_SIZE + SHA1_HMAC_LEN {
            error!(len = ciphertext.len(), "des3 ciphertext too short");
            return Err(KrbError::InsufficientData);
        }

        let (ciphertext, msg_hmac) = ciphertext.split_at(ciphertext.len() - SHA1_HMAC_LEN);

        let ke = self.dk(key, &usage_constant(key_usage, PURPOSE_ENCRYPT))?;
        let ki = self.dk(key, &usage_constant(key_usage, PURPOSE_INTEGRITY))?;

        let mut plaintext = ciphertext.to_vec();
        decrypt_cbc(&cipher(&ke)?, &mut plaintext)?;

        let my_hmac = hmac_sha1(&ki, &plaintext)?;
        if !bool::from(my_hmac.as_slice().ct_eq(msg_hmac)) {
            error!(key_usage, "des3 message authentication failed");
            return Err(KrbError::MessageAuthenticationFailed);
        }

        Ok(plaintext.split_off(DES_BLOCK_SIZE))
    }

    fn checksum(&self, key: &[u8], key_usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError> {
        let kc = self.dk(key, &usage_constant(key_usage, PURPOSE_CHECKSUM))?;
        hmac_sha1(&kc, data)
    }
}
