use super::{kerberos_time, system_time, EncTicket, EncryptedData, Name, PaData};
use crate::asn1::constants::{KrbErrorCode, KrbMessageType};
use crate::asn1::encrypted_data::EncryptedData as KdcEncryptedData;
use crate::asn1::kdc_rep::KdcRep;
use crate::asn1::kerberos_string::KerberosString;
use crate::asn1::krb_error::KrbErrorInner;
use crate::asn1::krb_kdc_rep::KrbKdcRep;
use crate::asn1::pa_data::MethodData;
use crate::asn1::principal_name::PrincipalName;
use crate::asn1::realm::Realm;
use crate::asn1::tagged_ticket::TaggedTicket;
use crate::constants::KRB5_PVNO;
use crate::error::KrbError;
use der::asn1::OctetString;
use der::{Decode, Encode};
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{error, warn};

/// A successful AS or TGS reply, still sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReply {
    pub(crate) padata: Vec<PaData>,
    pub(crate) client: Name,
    pub(crate) ticket: EncTicket,
    pub(crate) enc_part: EncryptedData,
}

impl KdcReply {
    pub fn padata(&self) -> &[PaData] {
        &self.padata
    }

    pub fn client(&self) -> &Name {
        &self.client
    }

    pub fn ticket(&self) -> &EncTicket {
        &self.ticket
    }

    pub fn enc_part(&self) -> &EncryptedData {
        &self.enc_part
    }

    fn to_wire(&self, msg_type: KrbMessageType) -> Result<KdcRep, KrbError> {
        let (cname, crealm) = <(PrincipalName, Realm)>::try_from(&self.client)?;
        let padata = if self.padata.is_empty() {
            None
        } else {
            Some(PaData::to_method_data(&self.padata)?)
        };

        Ok(KdcRep {
            pvno: KRB5_PVNO,
            msg_type: msg_type.into(),
            padata,
            crealm,
            cname,
            ticket: TaggedTicket::try_from(&self.ticket)?,
            enc_part: KdcEncryptedData::try_from(&self.enc_part)?,
        })
    }

    fn from_wire(kdc_rep: &KdcRep, msg_type: KrbMessageType) -> Result<Self, KrbError> {
        if kdc_rep.pvno != KRB5_PVNO {
            error!(pvno = kdc_rep.pvno, "unsupported protocol version");
            return Err(KrbError::InvalidPvno);
        }

        if kdc_rep.msg_type != u8::from(msg_type) {
            error!(msg_type = kdc_rep.msg_type, "message type does not match tag");
            return Err(KrbError::InvalidMessageType);
        }

        Ok(KdcReply {
            padata: kdc_rep
                .padata
                .as_deref()
                .map(PaData::from_method_data)
                .unwrap_or_default(),
            client: Name::try_from((&kdc_rep.cname, &kdc_rep.crealm))?,
            ticket: EncTicket::try_from(&kdc_rep.ticket)?,
            enc_part: EncryptedData::from(&kdc_rep.enc_part),
        })
    }
}

/// A KRB-ERROR from the KDC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub(crate) code: KrbErrorCode,
    pub(crate) service: Name,
    pub(crate) client: Option<Name>,
    pub(crate) text: Option<String>,
    pub(crate) edata: Option<Vec<u8>>,
    pub(crate) stime: SystemTime,
}

impl ErrorReply {
    pub fn new(code: KrbErrorCode, service: Name, stime: SystemTime) -> Self {
        ErrorReply {
            code,
            service,
            client: None,
            text: None,
            edata: None,
            stime,
        }
    }

    pub fn with_client(mut self, client: Option<Name>) -> Self {
        self.client = client;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    /// Attach METHOD-DATA as the e-data, as a PREAUTH_REQUIRED error does.
    pub fn with_method_data(mut self, method_data: &[PaData]) -> Result<Self, KrbError> {
        let wire: MethodData = PaData::to_method_data(method_data)?;
        self.edata = Some(wire.to_der()?);
        Ok(self)
    }

    pub fn code(&self) -> KrbErrorCode {
        self.code
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn service(&self) -> &Name {
        &self.service
    }

    pub fn client(&self) -> Option<&Name> {
        self.client.as_ref()
    }

    pub fn stime(&self) -> SystemTime {
        self.stime
    }

    pub fn edata(&self) -> Option<&[u8]> {
        self.edata.as_deref()
    }

    /// The e-data read as METHOD-DATA. Empty when the KDC sent no e-data.
    pub fn method_data(&self) -> Result<Vec<PaData>, KrbError> {
        let Some(edata) = self.edata.as_deref() else {
            return Ok(Vec::new());
        };

        MethodData::from_der(edata)
            .map(|md| PaData::from_method_data(&md))
            .map_err(|err| {
                error!(?err, "unable to decode method data from error");
                KrbError::DerDecodePaData
            })
    }

    /// Surface this reply as an error for the caller.
    pub fn into_error(self) -> KrbError {
        KrbError::KdcError {
            code: self.code,
            text: self.text,
        }
    }
}

impl TryFrom<&ErrorReply> for KrbErrorInner {
    type Error = KrbError;

    fn try_from(value: &ErrorReply) -> Result<Self, Self::Error> {
        let (stime, susec) = kerberos_time(value.stime)?;
        let (service_name, service_realm) = <(PrincipalName, Realm)>::try_from(&value.service)?;

        let (cname, crealm) = match value.client.as_ref() {
            Some(client) => {
                let (cname, crealm) = <(PrincipalName, Realm)>::try_from(client)?;
                (Some(cname), Some(crealm))
            }
            None => (None, None),
        };

        // The text is a GeneralString. Anything outside of ascii is dropped
        // rather than failing the whole error.
        let error_text = value
            .text
            .as_deref()
            .and_then(|text| KerberosString::from_str(text).ok());

        Ok(KrbErrorInner {
            pvno: KRB5_PVNO,
            msg_type: KrbMessageType::KrbError.into(),
            ctime: None,
            cusec: None,
            stime,
            susec,
            error_code: value.code.into(),
            crealm,
            cname,
            service_realm,
            service_name,
            error_text,
            error_data: value
                .edata
                .as_deref()
                .map(OctetString::new)
                .transpose()?,
        })
    }
}

impl TryFrom<&KrbErrorInner> for ErrorReply {
    type Error = KrbError;

    fn try_from(value: &KrbErrorInner) -> Result<Self, Self::Error> {
        if value.pvno != KRB5_PVNO {
            error!(pvno = value.pvno, "unsupported protocol version");
            return Err(KrbError::InvalidPvno);
        }

        let code = KrbErrorCode::try_from(value.error_code).map_err(|_| {
            KrbError::InvalidEnumValue("KrbErrorCode".to_string(), value.error_code)
        })?;

        let client = match (value.cname.as_ref(), value.crealm.as_ref()) {
            (Some(cname), Some(crealm)) => Some(Name::try_from((cname, crealm))?),
            (Some(_), None) => {
                warn!("krb-error carries a client name without a realm");
                None
            }
            _ => None,
        };

        Ok(ErrorReply {
            code,
            service: Name::try_from((&value.service_name, &value.service_realm))?,
            client,
            text: value.error_text.as_ref().map(|t| t.to_string()),
            edata: value.error_data.as_ref().map(|d| d.as_bytes().to_vec()),
            stime: system_time(&value.stime, Some(value.susec)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KerberosReply {
    AS(Box<KdcReply>),
    TGS(Box<KdcReply>),
    Error(Box<ErrorReply>),
}

impl KerberosReply {
    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        KrbKdcRep::try_from(self)?.to_der().map_err(KrbError::from)
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self, KrbError> {
        let wire = KrbKdcRep::from_der(bytes)?;
        KerberosReply::try_from(&wire)
    }
}

impl From<ErrorReply> for KerberosReply {
    fn from(value: ErrorReply) -> Self {
        KerberosReply::Error(Box::new(value))
    }
}

impl TryFrom<&KrbKdcRep> for KerberosReply {
    type Error = KrbError;

    fn try_from(value: &KrbKdcRep) -> Result<Self, KrbError> {
        match value {
            KrbKdcRep::AsRep(kdc_rep) => KdcReply::from_wire(kdc_rep, KrbMessageType::KrbAsRep)
                .map(|rep| KerberosReply::AS(Box::new(rep))),
            KrbKdcRep::TgsRep(kdc_rep) => KdcReply::from_wire(kdc_rep, KrbMessageType::KrbTgsRep)
                .map(|rep| KerberosReply::TGS(Box::new(rep))),
            KrbKdcRep::ErrRep(err) => {
                ErrorReply::try_from(err).map(|rep| KerberosReply::Error(Box::new(rep)))
            }
        }
    }
}

impl TryFrom<&KerberosReply> for KrbKdcRep {
    type Error = KrbError;

    fn try_from(value: &KerberosReply) -> Result<Self, Self::Error> {
        match value {
            KerberosReply::AS(rep) => rep.to_wire(KrbMessageType::KrbAsRep).map(KrbKdcRep::AsRep),
            KerberosReply::TGS(rep) => rep
                .to_wire(KrbMessageType::KrbTgsRep)
                .map(KrbKdcRep::TgsRep),
            KerberosReply::Error(err) => KrbErrorInner::try_from(err.as_ref()).map(KrbKdcRep::ErrRep),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorReply, KdcReply, KerberosReply};
    use crate::asn1::constants::{EncryptionType, KrbErrorCode, PaDataType};
    use crate::crypto::EncryptionKey;
    use crate::proto::{EncTicket, EncryptedData, EtypeInfo2, Name, PaData};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn preauth_required_carries_method_data() {
        let stime = UNIX_EPOCH + Duration::from_secs(1_728_645_839);
        let etype_info = EtypeInfo2::to_padata(&[EtypeInfo2 {
            etype: EncryptionType::AES256_CTS_HMAC_SHA1_96,
            salt: Some("EXAMPLE.COMalice".to_string()),
            s2kparams: None,
        }])
        .unwrap();

        let error = ErrorReply::new(
            KrbErrorCode::KdcErrPreauthRequired,
            Name::service_krbtgt("EXAMPLE.COM"),
            stime,
        )
        .with_client(Some(Name::principal("alice", "EXAMPLE.COM")))
        .with_text("preauthentication required")
        .with_method_data(&[
            PaData::new(PaDataType::PaEncTimestamp, Vec::new()),
            etype_info,
        ])
        .unwrap();

        let reply = KerberosReply::from(error);
        let der = reply.to_der().unwrap();
        // APPLICATION 30
        assert_eq!(der[0], 0x7e);

        let KerberosReply::Error(decoded) = KerberosReply::from_der(&der).unwrap() else {
            unreachable!();
        };
        assert_eq!(decoded.code(), KrbErrorCode::KdcErrPreauthRequired);
        assert_eq!(decoded.text(), Some("preauthentication required"));
        assert_eq!(decoded.stime(), stime);

        let method_data = decoded.method_data().unwrap();
        assert_eq!(method_data.len(), 2);
        assert_eq!(method_data[0].pa_type(), Some(PaDataType::PaEncTimestamp));
        let entries = EtypeInfo2::from_padata(&method_data).unwrap();
        assert_eq!(entries[0].salt(), Some("EXAMPLE.COMalice"));
    }

    #[test]
    fn as_reply_round_trip() {
        let key = EncryptionKey::random(EncryptionType::AES128_CTS_HMAC_SHA1_96).unwrap();
        let reply = KerberosReply::AS(Box::new(KdcReply {
            padata: Vec::new(),
            client: Name::principal("alice", "EXAMPLE.COM"),
            ticket: EncTicket::new(
                Name::service_krbtgt("EXAMPLE.COM"),
                EncryptedData::seal(&key, b"ticket", 2).unwrap(),
            ),
            enc_part: EncryptedData::seal(&key, b"reply", 3).unwrap(),
        }));

        let der = reply.to_der().unwrap();
        assert_eq!(der[0], 0x6b);
        assert_eq!(KerberosReply::from_der(&der).unwrap(), reply);
    }

    #[test]
    fn error_without_edata_has_no_method_data() {
        let error = ErrorReply::new(
            KrbErrorCode::KdcErrCPrincipalUnknown,
            Name::service_krbtgt("EXAMPLE.COM"),
            UNIX_EPOCH,
        );
        assert!(error.method_data().unwrap().is_empty());
        assert!(matches!(
            error.into_error(),
            crate::error::KrbError::KdcError {
                code: KrbErrorCode::KdcErrCPrincipalUnknown,
                text: None
            }
        ));
    }
}
