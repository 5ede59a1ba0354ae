//! The cipher suite registry. Every encryption type we implement is a stateless
//! [`EncTypeHandler`], and the rest of the crate only ever reaches a cipher
//! through [`handler`] or an [`EncryptionKey`].

mod aes;
pub mod checksum;
mod des3;
pub mod dh;
pub mod fast;
mod nfold;
mod rc4;

use crate::asn1::constants::{ChecksumType, EncryptionType};
use crate::asn1::encrypted_data::EncryptedData as KdcEncryptedData;
use crate::asn1::encryption_key::EncryptionKey as KdcEncryptionKey;
use crate::error::KrbError;
use der::asn1::OctetString;
use rand::RngCore;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use tracing::{debug, error};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use self::checksum::{make_checksum, verify_checksum, Checksum};

static AES128_CTS_HMAC_SHA1_96: aes::AesCtsHmacSha196 = aes::AesCtsHmacSha196::AES128;
static AES256_CTS_HMAC_SHA1_96: aes::AesCtsHmacSha196 = aes::AesCtsHmacSha196::AES256;
static DES3_CBC_SHA1_KD: des3::Des3CbcSha1Kd = des3::Des3CbcSha1Kd;
static RC4_HMAC: rc4::Rc4Hmac = rc4::Rc4Hmac;

/// The capability set of one encryption type. Handlers hold no state, so a
/// single static instance of each is shared by every caller.
pub trait EncTypeHandler: Send + Sync {
    fn etype(&self) -> EncryptionType;

    /// Number of random bytes `random2key` consumes.
    fn key_input_size(&self) -> usize;

    fn key_size(&self) -> usize;

    fn block_size(&self) -> usize;

    fn confounder_size(&self) -> usize;

    fn checksum_size(&self) -> usize;

    fn prf_size(&self) -> usize;

    /// Zero for stream-like modes (CTS, RC4), otherwise the cipher block size.
    fn padding_size(&self) -> usize;

    /// The keyed checksum that goes with this encryption type.
    fn checksum_type(&self) -> ChecksumType;

    fn str2key(&self, password: &[u8], salt: &[u8], params: Option<&[u8]>)
        -> Result<Vec<u8>, KrbError>;

    fn random2key(&self, random: &[u8]) -> Result<Vec<u8>, KrbError>;

    fn prf(&self, key: &[u8], seed: &[u8]) -> Result<Vec<u8>, KrbError>;

    /// Encrypt with a caller supplied confounder. Only the tests and
    /// [`EncTypeHandler::encrypt`] should need this.
    fn encrypt_with_confounder(
        &self,
        key: &[u8],
        key_usage: i32,
        confounder: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, KrbError>;

    fn encrypt(&self, plaintext: &[u8], key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        let mut confounder = vec![0u8; self.confounder_size()];
        rand::rng().fill_bytes(&mut confounder);
        self.encrypt_with_confounder(key, key_usage, &confounder, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError>;

    /// The keyed checksum of `data` for this encryption type.
    fn checksum(&self, key: &[u8], key_usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError>;
}

pub(crate) fn handler_for(etype: EncryptionType) -> Result<&'static dyn EncTypeHandler, KrbError> {
    match etype {
        EncryptionType::AES128_CTS_HMAC_SHA1_96 => Ok(&AES128_CTS_HMAC_SHA1_96),
        EncryptionType::AES256_CTS_HMAC_SHA1_96 => Ok(&AES256_CTS_HMAC_SHA1_96),
        EncryptionType::DES3_CBC_SHA1_KD => Ok(&DES3_CBC_SHA1_KD),
        EncryptionType::RC4_HMAC => Ok(&RC4_HMAC),
        _ => {
            debug!(?etype, "no handler for encryption type");
            Err(KrbError::UnsupportedEncryption)
        }
    }
}

/// Resolve the handler for `etype`, provided the policy allows it. Types we
/// have no handler for are unsupported whatever the policy says.
pub fn handler(
    etype: EncryptionType,
    policy: &EncryptionPolicy,
) -> Result<&'static dyn EncTypeHandler, KrbError> {
    let handler = handler_for(etype)?;
    if !policy.allows(etype) {
        debug!(?etype, "encryption type disabled by policy");
        return Err(KrbError::EncryptionDisabledByPolicy);
    }
    Ok(handler)
}

/// Derive a key from `base` with the RFC3961 DK construction. `encrypt_block`
/// is the raw block cipher keyed with `base`, and `seed_len` is the key input
/// size of the encryption type.
pub(crate) fn derive_random(
    constant: &[u8],
    block_size: usize,
    seed_len: usize,
    mut encrypt_block: impl FnMut(&mut [u8]) -> Result<(), KrbError>,
) -> Result<Vec<u8>, KrbError> {
    let mut block = nfold::n_fold(constant, block_size);
    let mut out = Vec::with_capacity(seed_len + block_size);

    while out.len() < seed_len {
        encrypt_block(&mut block)?;
        out.extend_from_slice(&block);
    }

    out.truncate(seed_len);
    Ok(out)
}

/// The well known constant for a derived key: the usage as a big endian
/// 32 bit integer followed by the purpose byte.
pub(crate) fn usage_constant(key_usage: i32, purpose: u8) -> [u8; 5] {
    let usage = key_usage.to_be_bytes();
    [usage[0], usage[1], usage[2], usage[3], purpose]
}

pub(crate) const PURPOSE_CHECKSUM: u8 = 0x99;
pub(crate) const PURPOSE_ENCRYPT: u8 = 0xAA;
pub(crate) const PURPOSE_INTEGRITY: u8 = 0x55;

/// The set of encryption types this instance may use, in preference order.
/// This is carried in configuration and handed to the client and the KDC.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct EncryptionPolicy {
    allowed: Vec<EncryptionType>,
}

impl Default for EncryptionPolicy {
    fn default() -> Self {
        EncryptionPolicy {
            allowed: vec![
                EncryptionType::AES256_CTS_HMAC_SHA1_96,
                EncryptionType::AES128_CTS_HMAC_SHA1_96,
            ],
        }
    }
}

impl EncryptionPolicy {
    pub fn new(allowed: Vec<EncryptionType>) -> Result<Self, KrbError> {
        if allowed.is_empty() {
            error!("an encryption policy must allow at least one encryption type");
            return Err(KrbError::ConfigInvalid);
        }

        for etype in allowed.iter() {
            handler_for(*etype)?;
        }

        Ok(EncryptionPolicy { allowed })
    }

    /// Every encryption type we implement, including the legacy ones.
    pub fn all() -> Self {
        EncryptionPolicy {
            allowed: vec![
                EncryptionType::AES256_CTS_HMAC_SHA1_96,
                EncryptionType::AES128_CTS_HMAC_SHA1_96,
                EncryptionType::DES3_CBC_SHA1_KD,
                EncryptionType::RC4_HMAC,
            ],
        }
    }

    pub fn allows(&self, etype: EncryptionType) -> bool {
        self.allowed.contains(&etype)
    }

    pub fn allowed(&self) -> &[EncryptionType] {
        &self.allowed
    }

    /// Pick the first of the peers requested types that we also allow. The
    /// peers order is honoured, unknown values are skipped.
    pub fn negotiate(&self, requested: &[i32]) -> Option<EncryptionType> {
        requested
            .iter()
            .filter_map(|etype| EncryptionType::try_from(*etype).ok())
            .find(|etype| self.allows(*etype))
    }
}

impl TryFrom<Vec<String>> for EncryptionPolicy {
    type Error = KrbError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        let allowed = names
            .iter()
            .map(|name| EncryptionType::from_str(name))
            .collect::<Result<Vec<_>, _>>()?;
        EncryptionPolicy::new(allowed)
    }
}

/// Key material bound to its encryption type. The bytes are wiped on drop and
/// are never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    #[zeroize(skip)]
    etype: EncryptionType,
    #[zeroize(skip)]
    kvno: Option<u32>,
    key: Vec<u8>,
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("etype", &self.etype)
            .field("kvno", &self.kvno)
            .finish_non_exhaustive()
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.etype == other.etype
            && self.kvno == other.kvno
            && bool::from(self.key.as_slice().ct_eq(other.key.as_slice()))
    }
}

impl Eq for EncryptionKey {}

impl EncryptionKey {
    pub fn new(etype: EncryptionType, key: Vec<u8>, kvno: Option<u32>) -> Result<Self, KrbError> {
        let handler = handler_for(etype)?;
        if key.len() != handler.key_size() {
            error!(?etype, len = key.len(), "key length does not match encryption type");
            return Err(KrbError::InvalidEncryptionKey);
        }
        Ok(EncryptionKey { etype, kvno, key })
    }

    /// A fresh random key, used for session keys and FAST subkeys.
    pub fn random(etype: EncryptionType) -> Result<Self, KrbError> {
        let handler = handler_for(etype)?;
        let mut random = vec![0u8; handler.key_input_size()];
        rand::rng().fill_bytes(&mut random);
        let key = handler.random2key(&random);
        random.zeroize();
        Ok(EncryptionKey {
            etype,
            kvno: None,
            key: key?,
        })
    }

    /// The long term key of a principal. `params` are the s2kparams from
    /// ETYPE-INFO2 when the KDC sent any.
    pub fn from_password(
        etype: EncryptionType,
        password: &str,
        salt: &str,
        params: Option<&[u8]>,
    ) -> Result<Self, KrbError> {
        let handler = handler_for(etype)?;
        let key = handler.str2key(password.as_bytes(), salt.as_bytes(), params)?;
        Ok(EncryptionKey {
            etype,
            kvno: None,
            key,
        })
    }

    pub fn with_kvno(mut self, kvno: Option<u32>) -> Self {
        self.kvno = kvno;
        self
    }

    pub fn etype(&self) -> EncryptionType {
        self.etype
    }

    pub fn kvno(&self) -> Option<u32> {
        self.kvno
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub(crate) fn handler(&self) -> Result<&'static dyn EncTypeHandler, KrbError> {
        handler_for(self.etype)
    }

    pub fn encrypt(&self, plaintext: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        self.handler()?.encrypt(plaintext, &self.key, key_usage)
    }

    pub fn decrypt(&self, ciphertext: &[u8], key_usage: i32) -> Result<Vec<u8>, KrbError> {
        self.handler()?.decrypt(ciphertext, &self.key, key_usage)
    }

    pub fn prf(&self, seed: &[u8]) -> Result<Vec<u8>, KrbError> {
        self.handler()?.prf(&self.key, seed)
    }

    /// Encrypt and wrap as wire `EncryptedData`, tagged with our type and kvno.
    pub(crate) fn encrypt_data(
        &self,
        plaintext: &[u8],
        key_usage: i32,
    ) -> Result<KdcEncryptedData, KrbError> {
        let cipher = self.encrypt(plaintext, key_usage)?;
        Ok(KdcEncryptedData {
            etype: self.etype.into(),
            kvno: self.kvno,
            cipher: OctetString::new(cipher)?,
        })
    }

    /// Decrypt wire `EncryptedData`. The encryption type must match this key and
    /// when both sides carry a kvno they must agree.
    pub(crate) fn decrypt_data(
        &self,
        data: &KdcEncryptedData,
        key_usage: i32,
    ) -> Result<Vec<u8>, KrbError> {
        if data.etype != i32::from(self.etype) {
            error!(
                expected = ?self.etype,
                got = data.etype,
                "encrypted data does not match key type"
            );
            return Err(KrbError::KeyTypeMismatch);
        }

        if let (Some(theirs), Some(ours)) = (data.kvno, self.kvno) {
            if theirs != ours {
                error!(theirs, ours, "encrypted data kvno does not match key");
                return Err(KrbError::KvnoMismatch);
            }
        }

        self.decrypt(data.cipher.as_bytes(), key_usage)
    }
}

impl TryFrom<&KdcEncryptionKey> for EncryptionKey {
    type Error = KrbError;

    fn try_from(value: &KdcEncryptionKey) -> Result<Self, Self::Error> {
        let etype = EncryptionType::try_from(value.key_type)
            .map_err(|_| KrbError::UnsupportedEncryption)?;
        EncryptionKey::new(etype, value.key_value.as_bytes().to_vec(), None)
    }
}

impl TryFrom<&EncryptionKey> for KdcEncryptionKey {
    type Error = KrbError;

    fn try_from(value: &EncryptionKey) -> Result<Self, Self::Error> {
        Ok(KdcEncryptionKey {
            key_type: value.etype.into(),
            key_value: OctetString::new(value.key.as_slice())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{handler, handler_for, EncryptionKey, EncryptionPolicy};
    use crate::asn1::constants::EncryptionType;
    use crate::constants::key_usage;
    use crate::error::{ErrorClass, KrbError};
    use proptest::prelude::*;

    const SUPPORTED: [EncryptionType; 4] = [
        EncryptionType::AES128_CTS_HMAC_SHA1_96,
        EncryptionType::AES256_CTS_HMAC_SHA1_96,
        EncryptionType::DES3_CBC_SHA1_KD,
        EncryptionType::RC4_HMAC,
    ];

    #[test]
    fn registry_rejects_unsupported_types() {
        let policy = EncryptionPolicy::all();
        for etype in SUPPORTED {
            assert_eq!(handler(etype, &policy).map(|h| h.etype()).ok(), Some(etype));
        }

        let err = handler(EncryptionType::CAMELLIA128_CTS_CMAC, &policy)
            .err()
            .expect("camellia must not resolve");
        assert!(matches!(err, KrbError::UnsupportedEncryption));
        assert_eq!(err.class(), ErrorClass::Capability);
    }

    #[test]
    fn policy_disables_legacy_types() {
        let policy = EncryptionPolicy::default();
        assert!(handler(EncryptionType::AES256_CTS_HMAC_SHA1_96, &policy).is_ok());
        let err = handler(EncryptionType::RC4_HMAC, &policy)
            .err()
            .expect("rc4 must be disabled");
        assert!(matches!(err, KrbError::EncryptionDisabledByPolicy));
        assert_eq!(err.class(), ErrorClass::Capability);
    }

    #[test]
    fn policy_negotiates_in_request_order() {
        let policy = EncryptionPolicy::all();
        // unknown, rc4, aes256
        assert_eq!(policy.negotiate(&[99, 23, 18]), Some(EncryptionType::RC4_HMAC));

        let policy = EncryptionPolicy::default();
        assert_eq!(
            policy.negotiate(&[23, 17, 18]),
            Some(EncryptionType::AES128_CTS_HMAC_SHA1_96)
        );
        assert_eq!(policy.negotiate(&[23, 16]), None);
    }

    #[test]
    fn policy_from_names() {
        let policy = EncryptionPolicy::try_from(vec![
            "aes256-cts-hmac-sha1-96".to_string(),
            "rc4-hmac".to_string(),
        ])
        .expect("valid policy");
        assert_eq!(
            policy.allowed(),
            &[EncryptionType::AES256_CTS_HMAC_SHA1_96, EncryptionType::RC4_HMAC]
        );

        assert!(EncryptionPolicy::try_from(vec!["camellia128-cts-cmac".to_string()]).is_err());
        assert!(EncryptionPolicy::try_from(Vec::<String>::new()).is_err());
    }

    #[test]
    fn handler_sizes() {
        let aes256 = handler_for(EncryptionType::AES256_CTS_HMAC_SHA1_96).expect("aes256");
        assert_eq!(aes256.key_size(), 32);
        assert_eq!(aes256.key_input_size(), 32);
        assert_eq!(aes256.confounder_size(), 16);
        assert_eq!(aes256.checksum_size(), 12);
        assert_eq!(aes256.prf_size(), 16);
        assert_eq!(aes256.padding_size(), 0);

        let des3 = handler_for(EncryptionType::DES3_CBC_SHA1_KD).expect("des3");
        assert_eq!(des3.key_size(), 24);
        assert_eq!(des3.key_input_size(), 21);
        assert_eq!(des3.confounder_size(), 8);
        assert_eq!(des3.checksum_size(), 20);
        assert_eq!(des3.padding_size(), 8);

        let rc4 = handler_for(EncryptionType::RC4_HMAC).expect("rc4");
        assert_eq!(rc4.key_size(), 16);
        assert_eq!(rc4.checksum_size(), 16);
        assert_eq!(rc4.prf_size(), 20);
    }

    #[test]
    fn key_debug_never_prints_bytes() {
        let key = EncryptionKey::new(
            EncryptionType::AES128_CTS_HMAC_SHA1_96,
            vec![0xab; 16],
            Some(3),
        )
        .expect("valid key");
        let printed = format!("{:?}", key);
        assert!(!printed.contains("171"));
        assert!(printed.contains("kvno"));
    }

    #[test]
    fn key_length_is_checked() {
        assert!(matches!(
            EncryptionKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![0; 16], None),
            Err(KrbError::InvalidEncryptionKey)
        ));
    }

    #[test]
    fn encrypted_data_type_and_kvno_must_match() {
        let key = EncryptionKey::random(EncryptionType::AES256_CTS_HMAC_SHA1_96)
            .expect("random key")
            .with_kvno(Some(2));
        let data = key
            .encrypt_data(b"hello", key_usage::KDC_REP_TICKET)
            .expect("encrypt");

        assert_eq!(
            key.decrypt_data(&data, key_usage::KDC_REP_TICKET)
                .expect("decrypt"),
            b"hello"
        );

        let other_kvno = key.clone().with_kvno(Some(3));
        assert!(matches!(
            other_kvno.decrypt_data(&data, key_usage::KDC_REP_TICKET),
            Err(KrbError::KvnoMismatch)
        ));

        let other_type =
            EncryptionKey::random(EncryptionType::AES128_CTS_HMAC_SHA1_96).expect("random key");
        assert!(matches!(
            other_type.decrypt_data(&data, key_usage::KDC_REP_TICKET),
            Err(KrbError::KeyTypeMismatch)
        ));
    }

    #[test]
    fn wrong_usage_is_an_integrity_error() {
        for etype in SUPPORTED {
            let key = EncryptionKey::random(etype).expect("random key");
            let cipher = key
                .encrypt(b"some ticket", key_usage::KDC_REP_TICKET)
                .expect("encrypt");
            let err = key
                .decrypt(&cipher, key_usage::AP_REQ_AUTH)
                .err()
                .expect("usage mismatch must fail");
            assert_eq!(err.class(), ErrorClass::Integrity, "{:?}", etype);
        }
    }

    proptest! {
        #[test]
        fn every_suite_round_trips(
            plaintext in proptest::collection::vec(any::<u8>(), 0..200),
            usage in prop::sample::select(vec![1i32, 3, 7, 8, 9, 11, 12, 51]),
        ) {
            for etype in SUPPORTED {
                let key = EncryptionKey::random(etype).expect("random key");
                let cipher = key.encrypt(&plaintext, usage).expect("encrypt");
                let plain = key.decrypt(&cipher, usage).expect("decrypt");

                if etype == EncryptionType::DES3_CBC_SHA1_KD {
                    // Block padding is not removed, DER is self delimiting.
                    prop_assert!(plain.len() >= plaintext.len());
                    prop_assert_eq!(&plain[..plaintext.len()], plaintext.as_slice());
                    prop_assert!(plain[plaintext.len()..].iter().all(|b| *b == 0));
                } else {
                    prop_assert_eq!(&plain, &plaintext);
                }
            }
        }
    }
}
