//! Flexible Authentication Secure Tunneling, RFC 6113 section 5.4.

use super::checksum::Checksum;
use super::encrypted_data::EncryptedData;
use super::encryption_key::EncryptionKey;
use super::kdc_req_body::KdcReqBody;
use super::kerberos_flags::KerberosFlags;
use super::kerberos_time::KerberosTime;
use super::pa_data::PaData;
use super::principal_name::PrincipalName;
use super::realm::Realm;
use super::{context_zero_choice, Microseconds};
use der::asn1::OctetString;
use der::Sequence;

pub(crate) const FX_FAST_ARMOR_AP_REQUEST: i32 = 1;

/// ```text
/// KrbFastArmor ::= SEQUENCE {
///         armor-type   [0] Int32,
///         armor-value  [1] OCTET STRING,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KrbFastArmor {
    #[asn1(context_specific = "0")]
    pub(crate) armor_type: i32,
    #[asn1(context_specific = "1")]
    pub(crate) armor_value: OctetString,
}

/// ```text
/// KrbFastArmoredReq ::= SEQUENCE {
///         armor        [0] KrbFastArmor OPTIONAL,
///         req-checksum [1] Checksum,
///         enc-fast-req [2] EncryptedData, -- KrbFastReq --
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KrbFastArmoredReq {
    #[asn1(context_specific = "0", optional = "true")]
    pub(crate) armor: Option<KrbFastArmor>,
    // Keyed with the armor key over the outer KDC-REQ-BODY, usage 50.
    #[asn1(context_specific = "1")]
    pub(crate) req_checksum: Checksum,
    #[asn1(context_specific = "2")]
    pub(crate) enc_fast_req: EncryptedData,
}

/// FAST options. Bits 0 through 15 are critical, so a KDC that does not
/// understand a set bit in that range must reject the request.
///
/// ```text
/// FastOptions ::= KerberosFlags
///     -- reserved(0),
///     -- hide-client-names(1),
///     -- kdc-follow-referrals(16)
/// ```
pub(crate) type FastOptions = KerberosFlags;

/// ```text
/// KrbFastReq ::= SEQUENCE {
///         fast-options [0] FastOptions,
///         padata       [1] SEQUENCE OF PA-DATA,
///         req-body     [2] KDC-REQ-BODY,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KrbFastReq {
    #[asn1(context_specific = "0")]
    pub(crate) fast_options: FastOptions,
    #[asn1(context_specific = "1")]
    pub(crate) padata: Vec<PaData>,
    #[asn1(context_specific = "2")]
    pub(crate) req_body: KdcReqBody,
}

/// ```text
/// KrbFastArmoredRep ::= SEQUENCE {
///         enc-fast-rep      [0] EncryptedData, -- KrbFastResponse --
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KrbFastArmoredRep {
    #[asn1(context_specific = "0")]
    pub(crate) enc_fast_rep: EncryptedData,
}

/// ```text
/// KrbFastFinished ::= SEQUENCE {
///         timestamp       [0] KerberosTime,
///         usec            [1] Microseconds,
///         crealm          [2] Realm,
///         cname           [3] PrincipalName,
///         ticket-checksum [4] Checksum,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KrbFastFinished {
    #[asn1(context_specific = "0")]
    pub(crate) timestamp: KerberosTime,
    #[asn1(context_specific = "1")]
    pub(crate) usec: Microseconds,
    #[asn1(context_specific = "2")]
    pub(crate) crealm: Realm,
    #[asn1(context_specific = "3")]
    pub(crate) cname: PrincipalName,
    // Keyed with the armor key over the ticket, usage 53.
    #[asn1(context_specific = "4")]
    pub(crate) ticket_checksum: Checksum,
}

/// ```text
/// KrbFastResponse ::= SEQUENCE {
///         padata         [0] SEQUENCE OF PA-DATA,
///         strengthen-key [1] EncryptionKey OPTIONAL,
///         finished       [2] KrbFastFinished OPTIONAL,
///         nonce          [3] UInt32,
///         ...
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KrbFastResponse {
    #[asn1(context_specific = "0")]
    pub(crate) padata: Vec<PaData>,
    #[asn1(context_specific = "1", optional = "true")]
    pub(crate) strengthen_key: Option<EncryptionKey>,
    #[asn1(context_specific = "2", optional = "true")]
    pub(crate) finished: Option<KrbFastFinished>,
    #[asn1(context_specific = "3")]
    pub(crate) nonce: u32,
}

// ```text
// PA-FX-FAST-REQUEST ::= CHOICE {
//         armored-data [0] KrbFastArmoredReq,
//         ...
// }
// ```
context_zero_choice!(PaFxFastRequest, KrbFastArmoredReq);

// ```text
// PA-FX-FAST-REPLY ::= CHOICE {
//         armored-data [0] KrbFastArmoredRep,
//         ...
// }
// ```
context_zero_choice!(PaFxFastReply, KrbFastArmoredRep);
