//! Finite field Diffie-Hellman for PKINIT (RFC4556 section 3.2.3.1), over the
//! Oakley MODP groups.

use super::{handler_for, EncryptionKey};
use crate::asn1::constants::EncryptionType;
use crate::error::KrbError;
use num_bigint_dig::BigUint;
use rand::RngCore;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

// RFC2409 section 6.2, the 1024 bit Oakley group 2.
const MODP_GROUP_2_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
    "FFFFFFFFFFFFFFFF",
);

// RFC3526 section 3, the 2048 bit MODP group 14.
const MODP_GROUP_14_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const GENERATOR: u32 = 2;

// Bytes of private exponent. Twice the strength of either group.
const PRIVATE_EXPONENT_LEN: usize = 64;

/// The DH group number carried in `DhPublicValue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "i32")]
pub enum DhGroup {
    Modp2,
    Modp14,
}

impl DhGroup {
    pub fn id(self) -> i32 {
        match self {
            DhGroup::Modp2 => 2,
            DhGroup::Modp14 => 14,
        }
    }

    fn modulus_len(self) -> usize {
        match self {
            DhGroup::Modp2 => 128,
            DhGroup::Modp14 => 256,
        }
    }

    fn prime(self) -> Result<BigUint, KrbError> {
        let hex = match self {
            DhGroup::Modp2 => MODP_GROUP_2_PRIME,
            DhGroup::Modp14 => MODP_GROUP_14_PRIME,
        };
        BigUint::parse_bytes(hex.as_bytes(), 16).ok_or(KrbError::ConfigInvalid)
    }
}

impl TryFrom<i32> for DhGroup {
    type Error = KrbError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(DhGroup::Modp2),
            14 => Ok(DhGroup::Modp14),
            group => {
                error!(group, "unsupported dh group");
                Err(KrbError::PreauthUnsupported)
            }
        }
    }
}

/// Left pad a big endian integer to the modulus length.
fn to_fixed_len(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

/// One side's ephemeral DH secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhSecret {
    #[zeroize(skip)]
    group: DhGroup,
    exponent: Vec<u8>,
}

impl std::fmt::Debug for DhSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhSecret")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl DhSecret {
    pub fn generate(group: DhGroup) -> Self {
        let mut exponent = vec![0u8; PRIVATE_EXPONENT_LEN];
        rand::rng().fill_bytes(&mut exponent);
        DhSecret { group, exponent }
    }

    pub fn group(&self) -> DhGroup {
        self.group
    }

    /// `g ^ x mod p`, padded to the length of the modulus.
    pub fn public_value(&self) -> Result<Vec<u8>, KrbError> {
        let p = self.group.prime()?;
        let x = BigUint::from_bytes_be(&self.exponent);
        let y = BigUint::from(GENERATOR).modpow(&x, &p);
        Ok(to_fixed_len(&y, self.group.modulus_len()))
    }

    /// The shared secret `ZZ = y ^ x mod p` for the peers public value `y`.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, KrbError> {
        let p = self.group.prime()?;
        let y = BigUint::from_bytes_be(peer_public);

        // Reject the small subgroup values 0, 1 and p - 1 and anything out of range.
        let one = BigUint::from(1u32);
        let p_minus_one = &p - &one;
        if y <= one || y >= p_minus_one {
            error!("peer dh public value is out of range");
            return Err(KrbError::PreauthDhInvalidPublicValue);
        }

        let x = BigUint::from_bytes_be(&self.exponent);
        let zz = y.modpow(&x, &p);
        Ok(to_fixed_len(&zz, self.group.modulus_len()))
    }
}

/// `octetstring2key(x)`: SHA1 over a counter byte and `x`, concatenated,
/// truncated to the key input size and passed through random-to-key.
pub fn octetstring2key(x: &[u8], etype: EncryptionType) -> Result<EncryptionKey, KrbError> {
    let handler = handler_for(etype)?;
    let n = handler.key_input_size();

    let mut seed = Vec::with_capacity(n + 20);
    let mut counter = 0u8;
    while seed.len() < n {
        let mut sha1 = Sha1::new();
        sha1.update([counter]);
        sha1.update(x);
        seed.extend_from_slice(&sha1.finalize());
        counter = counter.wrapping_add(1);
    }
    seed.truncate(n);

    let key = handler.random2key(&seed);
    seed.zeroize();
    EncryptionKey::new(etype, key?, None)
}

/// The PKINIT reply key, `octetstring2key(ZZ || n_c || n_k)`.
pub fn reply_key_from_shared_secret(
    shared_secret: &[u8],
    client_nonce: Option<&[u8]>,
    server_nonce: Option<&[u8]>,
    etype: EncryptionType,
) -> Result<EncryptionKey, KrbError> {
    let mut x = shared_secret.to_vec();
    if let (Some(n_c), Some(n_k)) = (client_nonce, server_nonce) {
        x.extend_from_slice(n_c);
        x.extend_from_slice(n_k);
    }
    let key = octetstring2key(&x, etype);
    x.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::{octetstring2key, reply_key_from_shared_secret, DhGroup, DhSecret};
    use crate::asn1::constants::EncryptionType;
    use crate::error::KrbError;
    use assert_hex::assert_eq_hex;

    #[test]
    fn octetstring2key_vectors() {
        let x: Vec<u8> = (0..64).collect();

        let key = octetstring2key(&x, EncryptionType::AES256_CTS_HMAC_SHA1_96).unwrap();
        assert_eq_hex!(
            key.as_bytes(),
            hex::decode("322bd22cf094ad8240eb9ffdae847d2635ba6bcafc2b366bf31c5bc190f32a46")
                .unwrap()
                .as_slice()
        );

        let key = octetstring2key(&x, EncryptionType::DES3_CBC_SHA1_KD).unwrap();
        assert_eq_hex!(
            key.as_bytes(),
            hex::decode("322ad32cf194ad858340ea9efdae85387c2634ba6bcbfd2a")
                .unwrap()
                .as_slice()
        );
    }

    #[test]
    fn both_sides_agree() {
        for group in [DhGroup::Modp2, DhGroup::Modp14] {
            let client = DhSecret::generate(group);
            let kdc = DhSecret::generate(group);

            let client_public = client.public_value().unwrap();
            let kdc_public = kdc.public_value().unwrap();
            assert_eq!(client_public.len(), kdc_public.len());

            let zz_client = client.shared_secret(&kdc_public).unwrap();
            let zz_kdc = kdc.shared_secret(&client_public).unwrap();
            assert_eq!(zz_client, zz_kdc);

            let n_c = [1u8; 32];
            let n_k = [2u8; 32];
            let k1 = reply_key_from_shared_secret(
                &zz_client,
                Some(&n_c),
                Some(&n_k),
                EncryptionType::AES256_CTS_HMAC_SHA1_96,
            )
            .unwrap();
            let k2 = reply_key_from_shared_secret(
                &zz_kdc,
                Some(&n_c),
                Some(&n_k),
                EncryptionType::AES256_CTS_HMAC_SHA1_96,
            )
            .unwrap();
            assert_eq!(k1, k2);
        }
    }

    #[test]
    fn degenerate_public_values_are_rejected() {
        let secret = DhSecret::generate(DhGroup::Modp2);
        for bad in [vec![0u8], vec![1u8], vec![0xffu8; 128], vec![0xffu8; 200]] {
            assert!(matches!(
                secret.shared_secret(&bad),
                Err(KrbError::PreauthDhInvalidPublicValue)
            ));
        }
    }

    #[test]
    fn group_ids() {
        assert_eq!(DhGroup::try_from(14).unwrap(), DhGroup::Modp14);
        assert_eq!(DhGroup::Modp2.id(), 2);
        assert!(DhGroup::try_from(5).is_err());
    }
}
