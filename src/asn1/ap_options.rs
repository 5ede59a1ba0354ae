use super::kerberos_bit_string;
use bitmask_enum::bitmask;

/// ```text
/// APOptions       ::= KerberosFlags
///         -- reserved(0),
///         -- use-session-key(1),
///         -- mutual-required(2)
/// ```
#[bitmask(u32)]
pub enum ApOptions {
    Reserved = 1 << 0,
    UseSessionKey = 1 << 1,
    MutualRequired = 1 << 2,
}

kerberos_bit_string!(ApOptions);
