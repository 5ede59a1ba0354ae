use super::EncryptionKey;
use crate::asn1::checksum::Checksum as KdcChecksum;
use crate::asn1::constants::ChecksumType;
use crate::error::KrbError;
use der::asn1::OctetString;
use md5::Md5;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub checksum_type: ChecksumType,
    pub value: Vec<u8>,
}

/// Compute a checksum of `input`. `ChecksumType::NONE` resolves to the default
/// keyed checksum of the key's encryption type. Keyless types ignore the key.
pub fn make_checksum(
    checksum_type: ChecksumType,
    input: &[u8],
    key: Option<&EncryptionKey>,
    key_usage: Option<i32>,
) -> Result<Checksum, KrbError> {
    let checksum_type = match (checksum_type, key) {
        (ChecksumType::NONE, Some(key)) => key.handler()?.checksum_type(),
        (ChecksumType::NONE, None) => {
            error!("a default checksum type needs a key to resolve against");
            return Err(KrbError::MissingKeyMaterial);
        }
        (cksumtype, _) => cksumtype,
    };

    let value = match checksum_type {
        ChecksumType::RSA_MD5 => Md5::digest(input).to_vec(),
        ChecksumType::SHA1 => Sha1::digest(input).to_vec(),
        cksumtype if cksumtype.is_keyed() => {
            let (Some(key), Some(key_usage)) = (key, key_usage) else {
                error!(?cksumtype, "keyed checksum requires a key and key usage");
                return Err(KrbError::MissingKeyMaterial);
            };

            let handler = key.handler()?;
            if handler.checksum_type() != cksumtype {
                error!(?cksumtype, etype = ?key.etype(), "checksum type does not match key");
                return Err(KrbError::KeyTypeMismatch);
            }

            handler.checksum(key.as_bytes(), key_usage, input)?
        }
        cksumtype => {
            debug!(?cksumtype, "unsupported checksum type");
            return Err(KrbError::UnsupportedChecksumType);
        }
    };

    Ok(Checksum {
        checksum_type,
        value,
    })
}

/// Recompute `checksum` over `input` and compare in constant time.
pub fn verify_checksum(
    checksum: &Checksum,
    input: &[u8],
    key: Option<&EncryptionKey>,
    key_usage: Option<i32>,
) -> Result<(), KrbError> {
    let expected = make_checksum(checksum.checksum_type, input, key, key_usage)?;

    if bool::from(expected.value.as_slice().ct_eq(checksum.value.as_slice())) {
        Ok(())
    } else {
        error!(checksum_type = ?checksum.checksum_type, "checksum verification failed");
        Err(KrbError::MessageAuthenticationFailed)
    }
}

impl TryFrom<&KdcChecksum> for Checksum {
    type Error = KrbError;

    fn try_from(value: &KdcChecksum) -> Result<Self, Self::Error> {
        let checksum_type = ChecksumType::try_from(value.checksum_type)
            .map_err(|_| KrbError::UnsupportedChecksumType)?;
        Ok(Checksum {
            checksum_type,
            value: value.checksum.as_bytes().to_vec(),
        })
    }
}

impl TryFrom<&Checksum> for KdcChecksum {
    type Error = KrbError;

    fn try_from(value: &Checksum) -> Result<Self, Self::Error> {
        Ok(KdcChecksum {
            checksum_type: value.checksum_type.into(),
            checksum: OctetString::new(value.value.as_slice())?,
        })
    }
}
