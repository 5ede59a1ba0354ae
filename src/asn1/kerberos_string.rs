use crate::error::KrbError;
use der::asn1::Ia5String;
use der::DecodeValue;
use der::EncodeValue;
use der::FixedTag;
use der::Tag;
use std::fmt;
use std::str::FromStr;

/// ```text
/// KerberosString  ::= GeneralString (IA5String)
/// ````
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KerberosString(pub(crate) Ia5String);

impl FixedTag for KerberosString {
    const TAG: Tag = Tag::GeneralString;
}

impl<'a> DecodeValue<'a> for KerberosString {
    type Error = der::Error;

    fn decode_value<R: der::Reader<'a>>(reader: &mut R, header: der::Header) -> der::Result<Self> {
        let r: Ia5String = der::asn1::Ia5String::decode_value(reader, header)?;
        Ok(Self(r))
    }
}

impl EncodeValue for KerberosString {
    fn value_len(&self) -> der::Result<der::Length> {
        Ia5String::value_len(&self.0)
    }
    fn encode_value(&self, encoder: &mut impl der::Writer) -> der::Result<()> {
        Ia5String::encode_value(&self.0, encoder)
    }
}

impl fmt::Display for KerberosString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for KerberosString {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl KerberosString {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}


impl FromStr for KerberosString {
    type Err = KrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ia5String::new(s)
            .map_err(|_| KrbError::DerEncodeKerberosString)
            .map(KerberosString)
    }
}

#[cfg(test)]
mod tests {
    use super::KerberosString;
    use der::{Decode, Encode};
    use std::str::FromStr;

    #[test]
    fn kerberos_string_is_general_string() {
        let ks = KerberosString::from_str("EXAMPLE.COM").expect("Failed to build string");
        let encoded = ks.to_der().expect("Failed to encode");
        assert_eq!(encoded[0], 0x1b);
        assert_eq!(&encoded[2..], b"EXAMPLE.COM");

        let decoded = KerberosString::from_der(&encoded).expect("Failed to decode");
        assert_eq!(decoded, ks);
    }

    #[test]
    fn kerberos_string_rejects_non_ascii() {
        assert!(KerberosString::from_str("caf\u{e9}").is_err());
    }
}
