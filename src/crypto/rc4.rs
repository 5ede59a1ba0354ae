//! rc4-hmac (RFC4757). Needed for Active Directory realms that still issue
//! arcfour tickets, disabled by the default encryption policy.

use super::EncTypeHandler;
use crate::asn1::constants::{ChecksumType, EncryptionType};
use crate::constants::{MD5_HMAC_LEN, RC4_KEY_LEN};
use crate::error::KrbError;

use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use tracing::error;
use zeroize::Zeroize;

type HmacMd5 = Hmac<Md5>;
type HmacSha1 = Hmac<Sha1>;

const CONFOUNDER_LEN: usize = 8;

/// The RC4 keystream. The state is wiped once the cipher is dropped.
pub(crate) struct Rc4 {
    i: u8,
    j: u8,
    state: [u8; 256],
}

impl Rc4 {
    pub(crate) fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (i, s) in state.iter_mut().enumerate() {
            *s = i as u8;
        }

        if !key.is_empty() {
            let mut j = 0u8;
            for i in 0..256 {
                j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
                state.swap(i, j as usize);
            }
        }

        Rc4 { i: 0, j: 0, state }
    }

    pub(crate) fn process(&mut self, message: &[u8]) -> Vec<u8> {
        message
            .iter()
            .map(|m| {
                self.i = self.i.wrapping_add(1);
                self.j = self.j.wrapping_add(self.state[self.i as usize]);
                self.state.swap(self.i as usize, self.j as usize);
                let k = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
                m ^ self.state[k as usize]
            })
            .collect()
    }
}

impl Drop for Rc4 {
    fn drop(&mut self) {
        self.state.zeroize();
    }
}

/// Windows uses different usage numbers for a few messages.
fn translate_usage(key_usage: i32) -> i32 {
    match key_usage {
        3 => 8,
        9 => 8,
        23 => 13,
        u => u,
    }
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, KrbError> {
    let mut mac = HmacMd5::new_from_slice(key).map_err(|_| KrbError::InvalidHmacKey)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) struct Rc4Hmac;

impl Rc4Hmac {
    fn usage_key(&self, key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        if key.len() != RC4_KEY_LEN {
            error!(len = key.len(), "invalid rc4 key length");
            return Err(KrbError::InvalidEncryptionKey);
        }
        hmac_md5(key, &[&translate_usage(key_usage).to_le_bytes()])
    }
}

impl EncTypeHandler for Rc4Hmac {
    fn etype(&self) -> EncryptionType {
        EncryptionType::RC4_HMAC
    }

    fn key_input_size(&self) -> usize {
        RC4_KEY_LEN
    }

    fn key_size(&self) -> usize {
        RC4_KEY_LEN
    }

    fn block_size(&self) -> usize {
        1
    }

    fn confounder_size(&self) -> usize {
        CONFOUNDER_LEN
    }

    fn checksum_size(&self) -> usize {
        MD5_HMAC_LEN
    }

    fn prf_size(&self) -> usize {
        20
    }

    fn padding_size(&self) -> usize {
        0
    }

    fn checksum_type(&self) -> ChecksumType {
        ChecksumType::HMAC_MD5_ARCFOUR
    }

    /// MD4 of the UTF-16LE password. The salt is unused.
    fn str2key(
        &self,
        password: &[u8],
        _salt: &[u8],
        _params: Option<&[u8]>,
    ) -> Result<Vec<u8>, KrbError> {
        let password = std::str::from_utf8(password).map_err(|_| {
            error!("rc4 passwords must be valid utf-8");
            KrbError::InvalidEncryptionKey
        })?;

        let mut utf16: Vec<u8> = password
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();

        let key = Md4::digest(&utf16).to_vec();
        utf16.zeroize();
        Ok(key)
    }

    fn random2key(&self, random: &[u8]) -> Result<Vec<u8>, KrbError> {
        if random.len() != RC4_KEY_LEN {
            return Err(KrbError::InvalidEncryptionKey);
        }
        Ok(random.to_vec())
    }

    fn prf(&self, key: &[u8], seed: &[u8]) -> Result<Vec<u8>, KrbError> {
        let mut mac = HmacSha1::new_from_slice(key).map_err(|_| KrbError::InvalidHmacKey)?;
        mac.update(seed);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn encrypt_with_confounder(
        &self,
        key: &[u8],
        key_usage: i32,
        confounder: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, KrbError> {
        if confounder.len() != CONFOUNDER_LEN {
            return Err(KrbError::InvalidBlockLength);
        }

        let k1 = self.usage_key(key, key_usage)?;
        let checksum = hmac_md5(&k1, &[confounder, plaintext])?;
        let k3 = hmac_md5(&k1, &[&checksum])?;

        let mut rc4 = Rc4::new(&k3);
        let mut ciphertext = checksum;
        ciphertext.extend(rc4.process(confounder));
        ciphertext.extend(rc4.process(plaintext));

        Ok(ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        if ciphertext.len() < MD5_HMAC_LEN + CONFOUNDER_LEN {
            error!(len = ciphertext.len(), "rc4 ciphertext too short");
            return Err(KrbError::InsufficientData);
        }

        let (checksum, ciphertext) = ciphertext.split_at(MD5_HMAC_LEN);

        let k1 = self.usage_key(key, key_usage)?;
        let k3 = hmac_md5(&k1, &[checksum])?;

        let mut plaintext = Rc4::new(&k3).process(ciphertext);

        let my_checksum = hmac_md5(&k1, &[&plaintext])?;
        if !bool::from(my_checksum.as_slice().ct_eq(checksum)) {
            error!(key_usage, "rc4 message authentication failed");
            return Err(KrbError::MessageAuthenticationFailed);
        }

        Ok(plaintext.split_off(CONFOUNDER_LEN))
    }

    /// The hmac-md5 checksum: `HMAC-MD5(Ksign, MD5(usage || data))`.
    fn checksum(&self, key: &[u8], key_usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError> {
        let ksign = hmac_md5(key, &[b"signaturekey\0"])?;

        let mut md5 = Md5::new();
        md5.update(translate_usage(key_usage).to_le_bytes());
        md5.update(data);
        let tmp = md5.finalize();

        hmac_md5(&ksign, &[&tmp])
    }
}
