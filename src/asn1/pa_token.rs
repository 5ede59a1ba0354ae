use super::kerberos_flags::KerberosFlags;
use der::asn1::OctetString;
use der::Sequence;

pub(crate) const TOKEN_FORMAT_JWT: i32 = 1;

/// ```text
/// TokenInfo ::= SEQUENCE {
///         flags           [0] TokenFlags,
///         token-vendor    [1] UTF8String
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct TokenInfo {
    #[asn1(context_specific = "0")]
    pub(crate) flags: KerberosFlags,
    #[asn1(context_specific = "1")]
    pub(crate) token_vendor: String,
}

/// ```text
/// KrbToken ::= SEQUENCE {
///         token-format    [0] Int32,
///         token-value     [1] OCTET STRING
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct KrbToken {
    #[asn1(context_specific = "0")]
    pub(crate) token_format: i32,
    #[asn1(context_specific = "1")]
    pub(crate) token_value: OctetString,
}

/// ```text
/// PA-TOKEN-REQUEST ::= SEQUENCE {
///         token-info      [0] TokenInfo,
///         auth-token      [1] KrbToken
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct PaTokenRequest {
    #[asn1(context_specific = "0")]
    pub(crate) token_info: TokenInfo,
    #[asn1(context_specific = "1")]
    pub(crate) auth_token: KrbToken,
}
