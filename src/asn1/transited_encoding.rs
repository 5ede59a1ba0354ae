use der::asn1::OctetString;
use der::Sequence;

/// ```text
/// TransitedEncoding       ::= SEQUENCE {
///        tr-type         [0] Int32 -- must be registered --,
///        contents        [1] OCTET STRING
///}
/// ````
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub(crate) struct TransitedEncoding {
    #[asn1(context_specific = "0")]
    pub(crate) tr_type: i32,
    #[asn1(context_specific = "1")]
    pub(crate) contents: OctetString,
}

impl TransitedEncoding {
    /// A ticket issued directly by the realm of the client carries an empty
    /// DOMAIN-X500-COMPRESS transited list.
    pub(crate) fn empty() -> Result<Self, der::Error> {
        Ok(TransitedEncoding {
            tr_type: 1,
            contents: OctetString::new(Vec::<u8>::new())?,
        })
    }
}
