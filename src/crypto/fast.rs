//! The RFC6113 key combiner used to build the FAST armor key and to strengthen
//! reply keys.

use super::{handler_for, EncryptionKey};
use crate::asn1::constants::EncryptionType;
use crate::error::KrbError;
use tracing::error;
use zeroize::Zeroize;

/// `prf+(key, pepper)`: the key's PRF over `counter || pepper` for counter
/// 1, 2, ... concatenated and truncated to `len` bytes.
pub fn prf_plus(key: &EncryptionKey, pepper: &[u8], len: usize) -> Result<Vec<u8>, KrbError> {
    let handler = key.handler()?;
    let rounds = len.div_ceil(handler.prf_size());

    if rounds > u8::MAX as usize {
        error!(len, "prf+ output length too large");
        return Err(KrbError::InvalidBlockLength);
    }

    let mut out = Vec::with_capacity(rounds * handler.prf_size());
    let mut seed = Vec::with_capacity(pepper.len() + 1);

    for counter in 1..=rounds as u8 {
        seed.clear();
        seed.push(counter);
        seed.extend_from_slice(pepper);
        out.extend(handler.prf(key.as_bytes(), &seed)?);
    }

    out.truncate(len);
    Ok(out)
}

/// `KRB-FX-CF2`, producing a key of type `target`. Both input keys must have
/// a PRF with the same block size as the target type's PRF, so that mixing
/// an RC4 key into an AES or DES3 combination is refused.
pub fn cf2(
    key1: &EncryptionKey,
    pepper1: &[u8],
    key2: &EncryptionKey,
    pepper2: &[u8],
    target: EncryptionType,
) -> Result<EncryptionKey, KrbError> {
    let handler = handler_for(target)?;

    for key in [key1, key2] {
        let prf_size = key.handler()?.prf_size();
        if prf_size != handler.prf_size() {
            error!(
                key = ?key.etype(),
                ?target,
                prf_size,
                "key cannot be combined into the target type"
            );
            return Err(KrbError::ConfigInvalid);
        }
    }

    let n = handler.key_input_size();
    let mut left = prf_plus(key1, pepper1, n)?;
    let mut right = prf_plus(key2, pepper2, n)?;

    for (l, r) in left.iter_mut().zip(right.iter()) {
        *l ^= r;
    }

    let key = handler.random2key(&left);
    left.zeroize();
    right.zeroize();

    EncryptionKey::new(target, key?, None)
}

/// The FAST armor key, from the armor AP-REQ subkey and the armor ticket
/// session key.
pub fn make_armor_key(
    subkey: &EncryptionKey,
    ticket_session_key: &EncryptionKey,
) -> Result<EncryptionKey, KrbError> {
    cf2(
        subkey,
        b"subkeyarmor",
        ticket_session_key,
        b"ticketarmor",
        subkey.etype(),
    )
}

/// Combine the KDC supplied strengthen key with the reply key the preauth
/// mechanism produced.
pub fn make_reply_key(
    strengthen_key: &EncryptionKey,
    reply_key: &EncryptionKey,
) -> Result<EncryptionKey, KrbError> {
    cf2(
        strengthen_key,
        b"strengthenkey",
        reply_key,
        b"replykey",
        strengthen_key.etype(),
    )
}
