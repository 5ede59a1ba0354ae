use super::enc_kdc_rep_part::EncKdcRepPart;
use super::{application_tagged_len, encode_application_tagged};
use der::{Tag, TagNumber, Writer};

/// ```text
///  EncASRepPart    ::= [APPLICATION 25] EncKDCRepPart
///  EncTGSRepPart   ::= [APPLICATION 26] EncKDCRepPart
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum TaggedEncKdcRepPart {
    EncAsRepPart(EncKdcRepPart),
    EncTgsRepPart(EncKdcRepPart),
}

impl From<TaggedEncKdcRepPart> for EncKdcRepPart {
    fn from(value: TaggedEncKdcRepPart) -> Self {
        match value {
            TaggedEncKdcRepPart::EncAsRepPart(part) | TaggedEncKdcRepPart::EncTgsRepPart(part) => {
                part
            }
        }
    }
}

impl<'a> ::der::Decode<'a> for TaggedEncKdcRepPart {
    type Error = der::Error;

    fn decode<R: der::Reader<'a>>(decoder: &mut R) -> der::Result<Self> {
        let tag: der::Tag = decoder.decode()?;
        let _len: der::Length = decoder.decode()?;

        match tag {
            Tag::Application {
                constructed: true,
                number: TagNumber(25),
            } => decoder.decode().map(TaggedEncKdcRepPart::EncAsRepPart),
            // Some KDCs (Heimdal, older AD) reply to an AS-REQ with an
            // EncTGSRepPart. Accept either.
            Tag::Application {
                constructed: true,
                number: TagNumber(26),
            } => decoder.decode().map(TaggedEncKdcRepPart::EncTgsRepPart),
            _ => Err(der::Error::from(der::ErrorKind::TagUnexpected {
                expected: None,
                actual: tag,
            })),
        }
    }
}

impl ::der::Encode for TaggedEncKdcRepPart {
    fn encoded_len(&self) -> Result<der::Length, der::Error> {
        match self {
            TaggedEncKdcRepPart::EncAsRepPart(part) => application_tagged_len(25, part),
            TaggedEncKdcRepPart::EncTgsRepPart(part) => application_tagged_len(26, part),
        }
    }

    fn encode(&self, writer: &mut impl Writer) -> der::Result<()> {
        match self {
            TaggedEncKdcRepPart::EncAsRepPart(part) => encode_application_tagged(25, part, writer),
            TaggedEncKdcRepPart::EncTgsRepPart(part) => {
                encode_application_tagged(26, part, writer)
            }
        }
    }
}
