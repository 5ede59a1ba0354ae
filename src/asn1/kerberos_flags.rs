use super::kerberos_bit_string;
use bitmask_enum::bitmask;

/// ```text
/// KerberosFlags   ::= BIT STRING (SIZE (32..MAX))
///                     -- minimum number of bits shall be sent,
///                     -- but no fewer than 32
///
/// KDCOptions      ::= KerberosFlags
/// ````
#[bitmask(u32)]
pub enum KerberosFlags {
    Reserved = 1 << 0,
    Forwardable = 1 << 1,
    Forwarded = 1 << 2,
    Proxiable = 1 << 3,
    Proxy = 1 << 4,
    AllowPostdate = 1 << 5,
    Postdated = 1 << 6,
    Renewable = 1 << 8,
    OptHardwareAuth = 1 << 11,
    Canonicalize = 1 << 15,
    DisableTransitedCheck = 1 << 26,
    RenewableOk = 1 << 27,
    EncTktInSkey = 1 << 28,
    Renew = 1 << 30,
    Validate = 1 << 31,
}

kerberos_bit_string!(KerberosFlags);

pub(crate) type KdcOptions = KerberosFlags;
