use super::kdc_rep::KdcRep;
use super::krb_error::KrbErrorInner;
use super::{application_tagged_len, encode_application_tagged};
use der::{Tag, TagNumber, Writer};

/// ```text
/// AS-REP          ::= [APPLICATION 11] KDC-REP
/// TGS-REP         ::= [APPLICATION 13] KDC-REP
/// KRB-ERROR       ::= [APPLICATION 30] SEQUENCE { ... }
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
// Each variant ends in "Rep" to match the names used in RFC4120.
#[allow(clippy::enum_variant_names)]
pub(crate) enum KrbKdcRep {
    AsRep(KdcRep),
    TgsRep(KdcRep),
    ErrRep(KrbErrorInner),
}

impl<'a> ::der::Decode<'a> for KrbKdcRep {
    type Error = der::Error;

    fn decode<R: der::Reader<'a>>(decoder: &mut R) -> der::Result<Self> {
        let tag: der::Tag = decoder.decode()?;
        let _len: der::Length = decoder.decode()?;

        match tag {
            Tag::Application {
                constructed: true,
                number: TagNumber(11),
            } => decoder.decode().map(KrbKdcRep::AsRep),
            Tag::Application {
                constructed: true,
                number: TagNumber(13),
            } => decoder.decode().map(KrbKdcRep::TgsRep),
            Tag::Application {
                constructed: true,
                number: TagNumber(30),
            } => decoder.decode().map(KrbKdcRep::ErrRep),
            _ => Err(der::Error::from(der::ErrorKind::TagUnexpected {
                expected: None,
                actual: tag,
            })),
        }
    }
}

impl ::der::Encode for KrbKdcRep {
    fn encoded_len(&self) -> Result<der::Length, der::Error> {
        match self {
            KrbKdcRep::AsRep(asrep) => application_tagged_len(11, asrep),
            KrbKdcRep::TgsRep(tgsrep) => application_tagged_len(13, tgsrep),
            KrbKdcRep::ErrRep(err_rep) => application_tagged_len(30, err_rep),
        }
    }

    fn encode(&self, writer: &mut impl Writer) -> der::Result<()> {
        match self {
            KrbKdcRep::AsRep(asrep) => encode_application_tagged(11, asrep, writer),
            KrbKdcRep::TgsRep(tgsrep) => encode_application_tagged(13, tgsrep, writer),
            KrbKdcRep::ErrRep(err_rep) => encode_application_tagged(30, err_rep, writer),
        }
    }
}
