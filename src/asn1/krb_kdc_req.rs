use super::kdc_req::KdcReq;
use der::{Encode, Tag, TagNumber, Writer};

/// ```text
/// AS-REQ          ::= [APPLICATION 10] KDC-REQ
/// TGS-REQ         ::= [APPLICATION 12] KDC-REQ
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum KrbKdcReq {
    AsReq(KdcReq),
    TgsReq(KdcReq),
}

impl<'a> ::der::Decode<'a> for KrbKdcReq {
    type Error = der::Error;

    fn decode<R: der::Reader<'a>>(decoder: &mut R) -> der::Result<Self> {
        let tag: der::Tag = decoder.decode()?;
        let _len: der::Length = decoder.decode()?;

        match tag {
            Tag::Application {
                constructed: true,
                number: TagNumber(10),
            } => {
                let kdc_req: KdcReq = decoder.decode()?;
                Ok(KrbKdcReq::AsReq(kdc_req))
            }
            Tag::Application {
                constructed: true,
                number: TagNumber(12),
            } => {
                let kdc_req: KdcReq = decoder.decode()?;
                Ok(KrbKdcReq::TgsReq(kdc_req))
            }
            _ => Err(der::Error::from(der::ErrorKind::TagUnexpected {
                expected: None,
                actual: tag,
            })),
        }
    }
}

impl ::der::Encode for KrbKdcReq {
    fn encoded_len(&self) -> Result<der::Length, der::Error> {
        let len: der::Length = match self {
            KrbKdcReq::AsReq(asreq) => {
                let tag_len = Tag::Application {
                    constructed: true,
                    number: TagNumber(10),
                }
                .encoded_len()?;

                let as_req_len = asreq.encoded_len()?;
                let as_req_len_len = as_req_len.encoded_len()?;

                tag_len + as_req_len + as_req_len_len
            }
            KrbKdcReq::TgsReq(tgsreq) => {
                let tag_len = Tag::Application {
                    constructed: true,
                    number: TagNumber(12),
                }
                .encoded_len()?;

                let tgs_req_len = tgsreq.encoded_len()?;
                let tgs_req_len_len = tgs_req_len.encoded_len()?;

                tag_len + tgs_req_len + tgs_req_len_len
            }
        }?;
        Ok(len)
    }

    fn encode(&self, writer: &mut impl Writer) -> der::Result<()> {
        match self {
            KrbKdcReq::AsReq(asreq) => {
                Tag::Application {
                    constructed: true,
                    number: TagNumber(10),
                }
                .encode(writer)?;
                asreq.encoded_len()?.encode(writer)?;
                asreq.encode(writer)
            }
            KrbKdcReq::TgsReq(tgsreq) => {
                Tag::Application {
                    constructed: true,
                    number: TagNumber(12),
                }
                .encode(writer)?;
                tgsreq.encoded_len()?.encode(writer)?;
                tgsreq.encode(writer)
            }
        }
    }
}
