use super::{kerberos_time, system_time, Name, PaData};
use crate::asn1::constants::KrbMessageType;
use crate::asn1::kdc_req::KdcReq;
use crate::asn1::kdc_req_body::KdcReqBody;
use crate::asn1::kerberos_flags::KerberosFlags;
use crate::asn1::krb_kdc_req::KrbKdcReq;
use crate::asn1::principal_name::PrincipalName;
use crate::asn1::realm::Realm;
use crate::constants::KRB5_PVNO;
use crate::error::KrbError;
use der::asn1::Any;
use der::{Decode, Encode};
use std::time::SystemTime;
use tracing::error;

/// The typed view of a KDC-REQ-BODY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub(crate) kdc_options: KerberosFlags,
    // Absent in a TGS-REQ, where the client comes from the ticket.
    pub(crate) client: Option<Name>,
    pub(crate) service: Name,
    pub(crate) from: Option<SystemTime>,
    pub(crate) until: SystemTime,
    pub(crate) renew_until: Option<SystemTime>,
    pub(crate) nonce: u32,
    pub(crate) etypes: Vec<i32>,
}

impl RequestBody {
    pub fn client(&self) -> Option<&Name> {
        self.client.as_ref()
    }

    pub fn service(&self) -> &Name {
        &self.service
    }

    pub fn until(&self) -> SystemTime {
        self.until
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn etypes(&self) -> &[i32] {
        &self.etypes
    }

    pub fn kdc_options(&self) -> KerberosFlags {
        self.kdc_options
    }

    pub(crate) fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        KdcReqBody::try_from(self)?.to_der().map_err(KrbError::from)
    }
}

impl TryFrom<&RequestBody> for KdcReqBody {
    type Error = KrbError;

    fn try_from(body: &RequestBody) -> Result<Self, Self::Error> {
        let (sname, realm) = <(PrincipalName, Realm)>::try_from(&body.service)?;

        let cname = body
            .client
            .as_ref()
            .map(|client| <(PrincipalName, Realm)>::try_from(client).map(|(cname, _)| cname))
            .transpose()?;

        let optional_time = |t: Option<SystemTime>| {
            t.map(|t| kerberos_time(t).map(|(k, _)| k)).transpose()
        };

        Ok(KdcReqBody {
            kdc_options: body.kdc_options,
            cname,
            realm,
            sname: Some(sname),
            from: optional_time(body.from)?,
            till: kerberos_time(body.until)?.0,
            rtime: optional_time(body.renew_until)?,
            nonce: body.nonce,
            etype: body.etypes.clone(),
            addresses: None,
            enc_authorization_data: None,
            additional_tickets: None,
        })
    }
}

impl TryFrom<&KdcReqBody> for RequestBody {
    type Error = KrbError;

    fn try_from(body: &KdcReqBody) -> Result<Self, Self::Error> {
        // The realm of the body is the service realm, and for an AS-REQ the
        // client realm as well.
        let Some(sname) = body.sname.as_ref() else {
            error!("request body carries no service name");
            return Err(KrbError::MissingServiceNameWithRealm);
        };

        let client = body
            .cname
            .as_ref()
            .map(|cname| Name::try_from((cname, &body.realm)))
            .transpose()?;
        let service = Name::try_from((sname, &body.realm))?;

        Ok(RequestBody {
            kdc_options: body.kdc_options,
            client,
            service,
            from: body.from.as_ref().map(|t| system_time(t, None)),
            until: system_time(&body.till, None),
            renew_until: body.rtime.as_ref().map(|t| system_time(t, None)),
            nonce: body.nonce,
            etypes: body.etype.clone(),
        })
    }
}

/// An AS-REQ or TGS-REQ. The body is kept as the exact bytes it was built or
/// received as, since the TGS authenticator and the FAST request checksum
/// cover those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcRequest {
    pub(crate) padata: Vec<PaData>,
    pub(crate) body: RequestBody,
    pub(crate) raw_body: Vec<u8>,
}

impl KdcRequest {
    pub fn new(body: RequestBody, padata: Vec<PaData>) -> Result<Self, KrbError> {
        let raw_body = body.to_der()?;
        Ok(KdcRequest {
            padata,
            body,
            raw_body,
        })
    }

    /// A request whose body is the inner body of a FAST request rather than
    /// the body on the outside of the message.
    pub(crate) fn from_wire_body(
        wire_body: &KdcReqBody,
        padata: Vec<PaData>,
    ) -> Result<Self, KrbError> {
        Ok(KdcRequest {
            padata,
            body: RequestBody::try_from(wire_body)?,
            raw_body: wire_body.to_der()?,
        })
    }

    pub fn padata(&self) -> &[PaData] {
        &self.padata
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    pub(crate) fn wire_body(&self) -> Result<KdcReqBody, KrbError> {
        KdcReqBody::from_der(&self.raw_body).map_err(KrbError::from)
    }

    fn to_wire(&self, msg_type: KrbMessageType) -> Result<KdcReq, KrbError> {
        let padata = if self.padata.is_empty() {
            None
        } else {
            Some(PaData::to_method_data(&self.padata)?)
        };

        Ok(KdcReq {
            pvno: KRB5_PVNO,
            msg_type: msg_type.into(),
            padata,
            req_body: Any::from_der(&self.raw_body)?,
        })
    }

    fn from_wire(kdc_req: &KdcReq, msg_type: KrbMessageType) -> Result<Self, KrbError> {
        if kdc_req.pvno != KRB5_PVNO {
            error!(pvno = kdc_req.pvno, "unsupported protocol version");
            return Err(KrbError::InvalidPvno);
        }

        if kdc_req.msg_type != u8::from(msg_type) {
            error!(msg_type = kdc_req.msg_type, "message type does not match tag");
            return Err(KrbError::InvalidMessageType);
        }

        let raw_body = kdc_req.req_body.to_der()?;
        let wire_body = KdcReqBody::from_der(&raw_body)?;

        Ok(KdcRequest {
            padata: kdc_req
                .padata
                .as_deref()
                .map(PaData::from_method_data)
                .unwrap_or_default(),
            body: RequestBody::try_from(&wire_body)?,
            raw_body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KerberosRequest {
    AS(Box<KdcRequest>),
    TGS(Box<KdcRequest>),
}

impl KerberosRequest {
    pub fn inner(&self) -> &KdcRequest {
        match self {
            KerberosRequest::AS(req) | KerberosRequest::TGS(req) => req,
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        KrbKdcReq::try_from(self)?.to_der().map_err(KrbError::from)
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self, KrbError> {
        let wire = KrbKdcReq::from_der(bytes)?;
        KerberosRequest::try_from(&wire)
    }
}

impl TryFrom<&KrbKdcReq> for KerberosRequest {
    type Error = KrbError;

    fn try_from(value: &KrbKdcReq) -> Result<Self, Self::Error> {
        match value {
            KrbKdcReq::AsReq(kdc_req) => {
                KdcRequest::from_wire(kdc_req, KrbMessageType::KrbAsReq)
                    .map(|req| KerberosRequest::AS(Box::new(req)))
            }
            KrbKdcReq::TgsReq(kdc_req) => {
                KdcRequest::from_wire(kdc_req, KrbMessageType::KrbTgsReq)
                    .map(|req| KerberosRequest::TGS(Box::new(req)))
            }
        }
    }
}

impl TryFrom<&KerberosRequest> for KrbKdcReq {
    type Error = KrbError;

    fn try_from(value: &KerberosRequest) -> Result<Self, Self::Error> {
        match value {
            KerberosRequest::AS(req) => req.to_wire(KrbMessageType::KrbAsReq).map(KrbKdcReq::AsReq),
            KerberosRequest::TGS(req) => req
                .to_wire(KrbMessageType::KrbTgsReq)
                .map(KrbKdcReq::TgsReq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{KdcRequest, KerberosRequest, RequestBody};
    use crate::asn1::constants::{EncryptionType, PaDataType};
    use crate::asn1::constants::KrbMessageType;
    use crate::asn1::kdc_req::KdcReq;
    use crate::asn1::kerberos_flags::KerberosFlags;
    use crate::asn1::constants::ChecksumType;
    use crate::constants::key_usage;
    use crate::crypto::{make_checksum, EncryptionKey};
    use crate::error::KrbError;
    use crate::proto::{Name, PaData};
    use assert_hex::assert_eq_hex;
    use der::asn1::Any;
    use der::Decode;
    use std::time::{Duration, UNIX_EPOCH};

    fn as_body() -> RequestBody {
        RequestBody {
            kdc_options: KerberosFlags::Renewable | KerberosFlags::Canonicalize,
            client: Some(Name::principal("alice", "EXAMPLE.COM")),
            service: Name::service_krbtgt("EXAMPLE.COM"),
            from: None,
            until: UNIX_EPOCH + Duration::from_secs(1_728_645_839),
            renew_until: Some(UNIX_EPOCH + Duration::from_secs(1_729_250_639)),
            nonce: 0x36ce306b,
            etypes: vec![
                EncryptionType::AES256_CTS_HMAC_SHA1_96.into(),
                EncryptionType::AES128_CTS_HMAC_SHA1_96.into(),
            ],
        }
    }

    #[test]
    fn as_request_der_round_trip() {
        let padata = vec![PaData::new(PaDataType::PaFxCookie, vec![0xaa; 4])];
        let request = KerberosRequest::AS(Box::new(KdcRequest::new(as_body(), padata).unwrap()));

        let der = request.to_der().unwrap();
        // APPLICATION 10
        assert_eq!(der[0], 0x6a);

        let decoded = KerberosRequest::from_der(&der).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.inner().body().nonce(), 0x36ce306b);
        assert_eq!(
            decoded.inner().body().client(),
            Some(&Name::principal("alice", "EXAMPLE.COM"))
        );
    }

    #[test]
    fn raw_body_is_kept_exactly() {
        // A TGS-REQ body as sent by MIT kinit, and the checksum it computed over
        // it with the TGT session key.
        let body = hex::decode("3072a0050303000081a20d1b0b4558414d504c452e434f4da3253023a003020103a11c301a1b04686f73741b127065707065722e6578616d706c652e636f6da511180f32303234313031313131303335395aa611180f32303234313031383130303335395aa706020436ce306ba8053003020112").unwrap();
        let key = EncryptionKey::new(
            EncryptionType::AES256_CTS_HMAC_SHA1_96,
            hex::decode("167391F64DA06DDE35752AFC110DCF6BFD797BF2B64027C98941ACDBDE3C356B")
                .unwrap(),
            None,
        )
        .unwrap();

        // Our encoder would send the options as a full 32 bit string, so
        // re-encoding would not reproduce these bytes.
        let wire = KdcReq {
            pvno: 5,
            msg_type: KrbMessageType::KrbTgsReq.into(),
            padata: None,
            req_body: Any::from_der(&body).unwrap(),
        };
        let request = KdcRequest::from_wire(&wire, KrbMessageType::KrbTgsReq).unwrap();
        assert_eq_hex!(request.raw_body(), body.as_slice());
        assert_eq!(
            request.body().service(),
            &Name::service("host", "pepper.example.com", "EXAMPLE.COM")
        );
        assert!(request.body().client().is_none());

        let checksum = make_checksum(
            ChecksumType::NONE,
            request.raw_body(),
            Some(&key),
            Some(key_usage::TGS_REQ_AUTH_CKSUM),
        )
        .unwrap();
        assert_eq_hex!(
            checksum.value,
            hex::decode("E101C395D98466F1FE8B6D79").unwrap()
        );
    }

    #[test]
    fn wrong_pvno_is_rejected() {
        let request = KerberosRequest::TGS(Box::new(KdcRequest::new(as_body(), vec![]).unwrap()));
        let mut der = request.to_der().unwrap();
        // The first integer in the message is the pvno.
        let pos = der.windows(3).position(|w| w == [0x02, 0x01, 0x05]).unwrap();
        der[pos + 2] = 4;
        assert!(matches!(
            KerberosRequest::from_der(&der),
            Err(KrbError::InvalidPvno)
        ));
    }
}
