use super::application_tagged;
use super::encryption_key::EncryptionKey;
use super::kerberos_time::KerberosTime;
use super::Microseconds;
use der::Sequence;

/// ```text
/// EncAPRepPart    ::= [APPLICATION 27] SEQUENCE {
///         ctime           [0] KerberosTime,
///         cusec           [1] Microseconds,
///         subkey          [2] EncryptionKey OPTIONAL,
///         seq-number      [3] UInt32 OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct EncApRepPartInner {
    #[asn1(context_specific = "0")]
    pub(crate) ctime: KerberosTime,
    #[asn1(context_specific = "1")]
    pub(crate) cusec: Microseconds,
    #[asn1(context_specific = "2", optional = "true")]
    pub(crate) subkey: Option<EncryptionKey>,
    #[asn1(context_specific = "3", optional = "true")]
    pub(crate) seq_number: Option<u32>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct EncApRepPart(pub(crate) EncApRepPartInner);

application_tagged!(EncApRepPart, EncApRepPartInner, 27);
