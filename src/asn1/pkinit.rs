//! Diffie-Hellman key agreement messages of RFC 4556. The CMS SignedData
//! envelopes are carried unsigned: `signed_auth_pack` and `dh_signed_data`
//! hold the DER of the inner content directly.

use super::context_zero_choice;
use super::kerberos_time::KerberosTime;
use super::Microseconds;
use der::asn1::OctetString;
use der::Sequence;

/// ```text
/// PKAuthenticator ::= SEQUENCE {
///         cusec                   [0] INTEGER (0..999999),
///         ctime                   [1] KerberosTime,
///         nonce                   [2] INTEGER (0..4294967295),
///         paChecksum              [3] OCTET STRING OPTIONAL,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct PkAuthenticator {
    #[asn1(context_specific = "0")]
    pub(crate) cusec: Microseconds,
    #[asn1(context_specific = "1")]
    pub(crate) ctime: KerberosTime,
    #[asn1(context_specific = "2")]
    pub(crate) nonce: u32,
    // SHA1 of the DER encoded KDC-REQ-BODY.
    #[asn1(context_specific = "3", optional = "true")]
    pub(crate) pa_checksum: Option<OctetString>,
}

/// The client or KDC public value. Stands in for SubjectPublicKeyInfo with
/// the domain parameters reduced to a well known group number.
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct DhPublicValue {
    #[asn1(context_specific = "0")]
    pub(crate) group: i32,
    // Big endian, unsigned.
    #[asn1(context_specific = "1")]
    pub(crate) public_value: OctetString,
}

/// ```text
/// AuthPack ::= SEQUENCE {
///         pkAuthenticator         [0] PKAuthenticator,
///         clientPublicValue       [1] SubjectPublicKeyInfo OPTIONAL,
///         supportedCMSTypes       [2] SEQUENCE OF AlgorithmIdentifier OPTIONAL,
///         clientDHNonce           [3] DHNonce OPTIONAL,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct AuthPack {
    #[asn1(context_specific = "0")]
    pub(crate) pk_authenticator: PkAuthenticator,
    #[asn1(context_specific = "1", optional = "true")]
    pub(crate) client_public_value: Option<DhPublicValue>,
    #[asn1(context_specific = "3", optional = "true")]
    pub(crate) client_dh_nonce: Option<OctetString>,
}

/// ```text
/// PA-PK-AS-REQ ::= SEQUENCE {
///         signedAuthPack          [0] IMPLICIT OCTET STRING,
///         trustedCertifiers       [1] SEQUENCE OF ExternalPrincipalIdentifier OPTIONAL,
///         kdcPkId                 [2] IMPLICIT OCTET STRING OPTIONAL,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct PaPkAsReq {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    pub(crate) signed_auth_pack: OctetString,
}

/// ```text
/// KDCDHKeyInfo ::= SEQUENCE {
///         subjectPublicKey        [0] BIT STRING,
///         nonce                   [1] INTEGER (0..4294967295),
///         dhKeyExpiration         [2] KerberosTime OPTIONAL,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KdcDhKeyInfo {
    #[asn1(context_specific = "0")]
    pub(crate) subject_public_key: DhPublicValue,
    #[asn1(context_specific = "1")]
    pub(crate) nonce: u32,
    #[asn1(context_specific = "2", optional = "true")]
    pub(crate) dh_key_expiration: Option<KerberosTime>,
}

/// ```text
/// DHRepInfo ::= SEQUENCE {
///         dhSignedData            [0] IMPLICIT OCTET STRING,
///         serverDHNonce           [1] DHNonce OPTIONAL,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct DhRepInfo {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    pub(crate) dh_signed_data: OctetString,
    #[asn1(context_specific = "1", optional = "true")]
    pub(crate) server_dh_nonce: Option<OctetString>,
}

// ```text
// PA-PK-AS-REP ::= CHOICE {
//         dhInfo                  [0] DHRepInfo,
//         encKeyPack              [1] IMPLICIT OCTET STRING,
//         ...
// }
// ```
context_zero_choice!(PaPkAsRep, DhRepInfo);
