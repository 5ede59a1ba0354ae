use super::application_tagged;
use super::encrypted_data::EncryptedData;
use super::principal_name::PrincipalName;
use super::realm::Realm;
use der::Sequence;

/// ```text
/// Ticket          ::= [APPLICATION 1] SEQUENCE {
///         tkt-vno         [0] INTEGER (5),
///         realm           [1] Realm,
///         sname           [2] PrincipalName,
///         enc-part        [3] EncryptedData -- EncTicketPart
/// }
/// ````
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct Ticket {
    #[asn1(context_specific = "0")]
    pub(crate) tkt_vno: i8,
    #[asn1(context_specific = "1")]
    pub(crate) realm: Realm,
    #[asn1(context_specific = "2")]
    pub(crate) sname: PrincipalName,
    #[asn1(context_specific = "3")]
    pub(crate) enc_part: EncryptedData,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct TaggedTicket(pub(crate) Ticket);

impl TaggedTicket {
    pub fn new(ticket: Ticket) -> Self {
        Self(ticket)
    }
}

application_tagged!(TaggedTicket, Ticket, 1);

impl From<TaggedTicket> for Ticket {
    fn from(value: TaggedTicket) -> Self {
        value.0
    }
}
