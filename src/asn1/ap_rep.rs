use super::application_tagged;
use super::constants::message_types::KrbMessageType;
use super::encrypted_data::EncryptedData;
use der::Sequence;

/// ```text
/// AP-REP          ::= [APPLICATION 15] SEQUENCE {
///         pvno            [0] INTEGER (5),
///         msg-type        [1] INTEGER (15),
///         enc-part        [2] EncryptedData -- EncAPRepPart
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct ApRepInner {
    #[asn1(context_specific = "0")]
    pub(crate) pvno: u8,
    #[asn1(context_specific = "1")]
    pub(crate) msg_type: u8,
    #[asn1(context_specific = "2")]
    pub(crate) enc_part: EncryptedData,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct ApRep(pub(crate) ApRepInner);

impl ApRep {
    pub fn new(enc_part: EncryptedData) -> Self {
        Self(ApRepInner {
            pvno: 5,
            msg_type: KrbMessageType::KrbApRep as u8,
            enc_part,
        })
    }
}

application_tagged!(ApRep, ApRepInner, 15);
