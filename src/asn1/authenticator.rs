use super::application_tagged;
use super::authorization_data::AuthorizationData;
use super::checksum::Checksum;
use super::encryption_key::EncryptionKey;
use super::kerberos_time::KerberosTime;
use super::principal_name::PrincipalName;
use super::realm::Realm;
use super::Microseconds;
use der::Sequence;

/// ```text
/// Authenticator   ::= [APPLICATION 2] SEQUENCE  {
///        authenticator-vno       [0] INTEGER (5),
///        crealm                  [1] Realm,
///        cname                   [2] PrincipalName,
///        cksum                   [3] Checksum OPTIONAL,
///        cusec                   [4] Microseconds,
///        ctime                   [5] KerberosTime,
///        subkey                  [6] EncryptionKey OPTIONAL,
///        seq-number              [7] UInt32 OPTIONAL,
///        authorization-data      [8] AuthorizationData OPTIONAL
/// }
///```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct AuthenticatorInner {
    #[asn1(context_specific = "0")]
    pub(crate) authenticator_vno: u8,
    #[asn1(context_specific = "1")]
    pub(crate) crealm: Realm,
    #[asn1(context_specific = "2")]
    pub(crate) cname: PrincipalName,
    // A checksum of the application data that accompanies the KRB_AP_REQ,
    // computed using a key usage value of 10 in normal application exchanges,
    // or 6 when used in the TGS-REQ PA-TGS-REQ AP-DATA field.
    #[asn1(context_specific = "3", optional = "true")]
    pub(crate) cksum: Option<Checksum>,
    #[asn1(context_specific = "4")]
    pub(crate) cusec: Microseconds,
    #[asn1(context_specific = "5")]
    pub(crate) ctime: KerberosTime,
    // The client's choice for an encryption key to protect this specific
    // application session. If left out, the session key from the ticket is used.
    #[asn1(context_specific = "6", optional = "true")]
    pub(crate) subkey: Option<EncryptionKey>,
    #[asn1(context_specific = "7", optional = "true")]
    pub(crate) seq_number: Option<u32>,
    #[asn1(context_specific = "8", optional = "true")]
    pub(crate) authorization_data: Option<AuthorizationData>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Authenticator(pub(crate) AuthenticatorInner);

application_tagged!(Authenticator, AuthenticatorInner, 2);

impl From<Authenticator> for AuthenticatorInner {
    fn from(value: Authenticator) -> Self {
        value.0
    }
}
