//! Owned, validated forms of the messages the exchanges put on the wire. The
//! `asn1` structures stay private to the crate, everything above this layer
//! works in terms of these types.

mod reply;
mod request;

pub use self::reply::{ErrorReply, KdcReply, KerberosReply};
pub use self::request::{KdcRequest, KerberosRequest, RequestBody};

use crate::asn1::constants::{EncryptionType, PaDataType, PrincipalNameType};
use crate::asn1::enc_kdc_rep_part::EncKdcRepPart;
use crate::asn1::enc_ticket_part::{EncTicketPart, TaggedEncTicketPart};
use crate::asn1::encrypted_data::EncryptedData as KdcEncryptedData;
use crate::asn1::encryption_key::EncryptionKey as KdcEncryptionKey;
use crate::asn1::etype_info2::{ETypeInfo2, ETypeInfo2Entry};
use crate::asn1::kerberos_string::KerberosString;
use crate::asn1::kerberos_time::KerberosTime;
use crate::asn1::pa_data::PaData as KdcPaData;
use crate::asn1::principal_name::PrincipalName;
use crate::asn1::realm::Realm;
use crate::asn1::tagged_enc_kdc_rep_part::TaggedEncKdcRepPart;
use crate::asn1::tagged_ticket::{TaggedTicket, Ticket as Asn1Ticket};
use crate::asn1::ticket_flags::TicketFlags;
use crate::asn1::transited_encoding::TransitedEncoding;
use crate::asn1::{decode_padded, Microseconds};
use crate::constants::key_usage;
use crate::crypto::{EncryptionKey, EncryptionPolicy};
use crate::error::KrbError;
use der::asn1::OctetString;
use der::{Decode, Encode};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, trace};

/// Split a time into the whole second `KerberosTime` the wire carries and the
/// microseconds that travel beside it.
pub(crate) fn kerberos_time(time: SystemTime) -> Result<(KerberosTime, Microseconds), KrbError> {
    let since_epoch = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| KrbError::DoYouHaveATimeMachine)?;

    let whole_seconds = Duration::from_secs(since_epoch.as_secs());
    let ktime = KerberosTime::from_unix_duration(whole_seconds).map_err(|err| {
        error!(?err, "unable to represent time as kerberos time");
        KrbError::DerEncodeKerberosTime
    })?;

    Ok((ktime, since_epoch.subsec_micros()))
}

pub(crate) fn system_time(ktime: &KerberosTime, usec: Option<Microseconds>) -> SystemTime {
    ktime.to_system_time() + Duration::from_micros(u64::from(usec.unwrap_or(0)))
}

/// Truncate to the precision a `KerberosTime` can carry.
pub(crate) fn whole_seconds(time: SystemTime) -> Result<SystemTime, KrbError> {
    let (ktime, _) = kerberos_time(time)?;
    Ok(ktime.to_system_time())
}

/// The absolute distance between two instants.
pub(crate) fn time_distance(a: SystemTime, b: SystemTime) -> Duration {
    match a.duration_since(b) {
        Ok(d) => d,
        Err(e) => e.duration(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Name {
    Principal {
        name: String,
        realm: String,
    },
    SrvInst {
        service: String,
        instance: Vec<String>,
        realm: String,
    },
    SrvHst {
        service: String,
        host: String,
        realm: String,
    },
}

impl Name {
    pub fn principal(name: &str, realm: &str) -> Self {
        Self::Principal {
            name: name.to_string(),
            realm: realm.to_string(),
        }
    }

    pub fn service(service: &str, host: &str, realm: &str) -> Self {
        Self::SrvHst {
            service: service.to_string(),
            host: host.to_string(),
            realm: realm.to_string(),
        }
    }

    /// RFC4120 section 7.3. The TGS of a realm is `krbtgt/REALM@REALM`.
    pub fn service_krbtgt(realm: &str) -> Self {
        Self::SrvInst {
            service: "krbtgt".to_string(),
            instance: vec![realm.to_string()],
            realm: realm.to_string(),
        }
    }

    /// RFC6112 section 3. `WELLKNOWN/ANONYMOUS@REALM`, kept in the same
    /// variant a wire name with these components decodes to.
    pub fn anonymous(realm: &str) -> Self {
        Self::service("WELLKNOWN", "ANONYMOUS", realm)
    }

    pub fn is_anonymous(&self) -> bool {
        self.components() == ["WELLKNOWN", "ANONYMOUS"]
    }

    pub fn is_service_krbtgt(&self, check_realm: &str) -> bool {
        match self {
            Self::SrvInst { service, realm, .. } | Self::SrvHst { service, realm, .. } => {
                service == "krbtgt" && realm == check_realm
            }
            Self::Principal { .. } => false,
        }
    }

    pub fn realm(&self) -> &str {
        match self {
            Self::Principal { realm, .. }
            | Self::SrvInst { realm, .. }
            | Self::SrvHst { realm, .. } => realm.as_str(),
        }
    }

    pub fn components(&self) -> Vec<&str> {
        match self {
            Self::Principal { name, .. } => vec![name.as_str()],
            Self::SrvInst {
                service, instance, ..
            } => std::iter::once(service.as_str())
                .chain(instance.iter().map(String::as_str))
                .collect(),
            Self::SrvHst { service, host, .. } => vec![service.as_str(), host.as_str()],
        }
    }

    pub fn name_type(&self) -> PrincipalNameType {
        match self {
            Self::Principal { .. } => PrincipalNameType::NtPrincipal,
            Self::SrvInst { .. } => PrincipalNameType::NtSrvInst,
            Self::SrvHst { .. } => PrincipalNameType::NtSrvHst,
        }
    }

    /// The RFC4120 default salt: the realm followed by each component.
    pub fn default_salt(&self) -> String {
        let mut salt = self.realm().to_string();
        for component in self.components() {
            salt.push_str(component);
        }
        salt
    }

    /// Build a name from its components, choosing the variant the same way
    /// for text and for wire names.
    fn from_components(components: Vec<String>, realm: String) -> Result<Self, KrbError> {
        let mut components = components.into_iter();
        let first = components.next().ok_or_else(|| {
            error!("principal name has no components");
            KrbError::NameNumberOfComponents
        })?;
        let rest: Vec<String> = components.collect();

        if first.is_empty() || rest.iter().any(|c| c.is_empty()) {
            error!("principal name has an empty component");
            return Err(KrbError::PrincipalNameParse);
        }

        let host = match rest.as_slice() {
            [host] if first != "krbtgt" => Some(host.clone()),
            _ => None,
        };

        Ok(if rest.is_empty() {
            Self::Principal { name: first, realm }
        } else if let Some(host) = host {
            Self::SrvHst {
                service: first,
                host,
                realm,
            }
        } else {
            Self::SrvInst {
                service: first,
                instance: rest,
                realm,
            }
        })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components().join("/"), self.realm())
    }
}

impl FromStr for Name {
    type Err = KrbError;

    /// `name@REALM`, `service/host@REALM` or `krbtgt/REALM@REALM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((components, realm)) = s.rsplit_once('@') else {
            error!(name = %s, "principal name has no realm");
            return Err(KrbError::PrincipalNameParse);
        };

        if realm.is_empty() {
            error!(name = %s, "principal name has an empty realm");
            return Err(KrbError::MissingRealm);
        }

        let components = components.split('/').map(str::to_string).collect();
        Self::from_components(components, realm.to_string())
    }
}

impl TryFrom<&Name> for (PrincipalName, Realm) {
    type Error = KrbError;

    fn try_from(name: &Name) -> Result<Self, Self::Error> {
        let name_string = name
            .components()
            .into_iter()
            .map(KerberosString::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        let realm = KerberosString::from_str(name.realm())?;
        Ok((
            PrincipalName {
                name_type: name.name_type().into(),
                name_string,
            },
            realm,
        ))
    }
}

impl TryFrom<(&PrincipalName, &Realm)> for Name {
    type Error = KrbError;

    fn try_from((princ, realm): (&PrincipalName, &Realm)) -> Result<Self, Self::Error> {
        let name_type = PrincipalNameType::try_from(princ.name_type).map_err(|err| {
            error!(?err, name_type = princ.name_type, "invalid principal name type");
            KrbError::PrincipalNameInvalidType
        })?;
        trace!(?name_type, name_string = %princ);

        let components: Vec<String> = princ
            .name_string
            .iter()
            .map(|component| component.to_string())
            .collect();

        // The name type is a hint. MIT sends services as NT-PRINCIPAL, and
        // some KDCs send krbtgt without an instance.
        match (name_type, components.len()) {
            (PrincipalNameType::NtSrvInst, 1) if components[0] == "krbtgt" => {
                Ok(Name::service_krbtgt(realm.as_str()))
            }
            (PrincipalNameType::NtSrvHst, n) if n != 2 => {
                error!(n, "host based service name needs two components");
                Err(KrbError::NameNumberOfComponents)
            }
            (
                PrincipalNameType::NtUnknown
                | PrincipalNameType::NtPrincipal
                | PrincipalNameType::NtSrvInst
                | PrincipalNameType::NtSrvHst
                | PrincipalNameType::NtEnterprise,
                _,
            ) => Name::from_components(components, realm.to_string()),
            (name_type, _) => {
                error!(?name_type, "unsupported principal name type");
                Err(KrbError::PrincipalNameInvalidType)
            }
        }
    }
}

/// A PA-DATA element. The value is the DER of whatever the type carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaData {
    pub padata_type: u32,
    pub value: Vec<u8>,
}

impl PaData {
    pub fn new(pa_type: PaDataType, value: Vec<u8>) -> Self {
        PaData {
            padata_type: pa_type.into(),
            value,
        }
    }

    /// `None` for types we have no name for.
    pub fn pa_type(&self) -> Option<PaDataType> {
        PaDataType::try_from(self.padata_type).ok()
    }

    pub(crate) fn find(padata: &[PaData], pa_type: PaDataType) -> Option<&PaData> {
        let wanted = u32::from(pa_type);
        padata.iter().find(|pa| pa.padata_type == wanted)
    }

    pub(crate) fn from_method_data(method_data: &[KdcPaData]) -> Vec<PaData> {
        method_data.iter().map(PaData::from).collect()
    }

    pub(crate) fn to_method_data(padata: &[PaData]) -> Result<Vec<KdcPaData>, KrbError> {
        padata.iter().map(KdcPaData::try_from).collect()
    }
}

impl From<&KdcPaData> for PaData {
    fn from(value: &KdcPaData) -> Self {
        PaData {
            padata_type: value.padata_type,
            value: value.padata_value.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<&PaData> for KdcPaData {
    type Error = KrbError;

    fn try_from(value: &PaData) -> Result<Self, Self::Error> {
        Ok(KdcPaData {
            padata_type: value.padata_type,
            padata_value: OctetString::new(value.value.as_slice())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    etype: i32,
    kvno: Option<u32>,
    cipher: Vec<u8>,
}

impl EncryptedData {
    pub(crate) fn seal(
        key: &EncryptionKey,
        plaintext: &[u8],
        key_usage: i32,
    ) -> Result<Self, KrbError> {
        Ok(EncryptedData {
            etype: key.etype().into(),
            kvno: key.kvno(),
            cipher: key.encrypt(plaintext, key_usage)?,
        })
    }

    pub(crate) fn open(&self, key: &EncryptionKey, key_usage: i32) -> Result<Vec<u8>, KrbError> {
        key.decrypt_data(&KdcEncryptedData::try_from(self)?, key_usage)
    }

    /// `None` when the sender used a type we don't know.
    pub fn etype(&self) -> Option<EncryptionType> {
        EncryptionType::try_from(self.etype).ok()
    }

    pub fn kvno(&self) -> Option<u32> {
        self.kvno
    }
}

impl From<&KdcEncryptedData> for EncryptedData {
    fn from(value: &KdcEncryptedData) -> Self {
        EncryptedData {
            etype: value.etype,
            kvno: value.kvno,
            cipher: value.cipher.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<&EncryptedData> for KdcEncryptedData {
    type Error = KrbError;

    fn try_from(value: &EncryptedData) -> Result<Self, Self::Error> {
        Ok(KdcEncryptedData {
            etype: value.etype,
            kvno: value.kvno,
            cipher: OctetString::new(value.cipher.as_slice())?,
        })
    }
}

/// A ticket as the client holds it: opaque, sealed under the service key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncTicket {
    tkt_vno: i8,
    pub(crate) service: Name,
    pub(crate) enc_part: EncryptedData,
}

impl EncTicket {
    pub(crate) fn new(service: Name, enc_part: EncryptedData) -> Self {
        EncTicket {
            tkt_vno: 5,
            service,
            enc_part,
        }
    }

    pub fn service(&self) -> &Name {
        &self.service
    }

    pub fn enc_part(&self) -> &EncryptedData {
        &self.enc_part
    }

    pub(crate) fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        TaggedTicket::try_from(self)?.to_der().map_err(KrbError::from)
    }

    pub(crate) fn from_der(bytes: &[u8]) -> Result<Self, KrbError> {
        let tagged = TaggedTicket::from_der(bytes)?;
        EncTicket::try_from(&tagged)
    }
}

impl TryFrom<&TaggedTicket> for EncTicket {
    type Error = KrbError;

    fn try_from(value: &TaggedTicket) -> Result<Self, Self::Error> {
        let ticket = &value.0;
        if ticket.tkt_vno != 5 {
            error!(tkt_vno = ticket.tkt_vno, "unsupported ticket version");
            return Err(KrbError::InvalidPvno);
        }
        Ok(EncTicket {
            tkt_vno: ticket.tkt_vno,
            service: Name::try_from((&ticket.sname, &ticket.realm))?,
            enc_part: EncryptedData::from(&ticket.enc_part),
        })
    }
}

impl TryFrom<&EncTicket> for TaggedTicket {
    type Error = KrbError;

    fn try_from(value: &EncTicket) -> Result<Self, Self::Error> {
        let (sname, realm) = <(PrincipalName, Realm)>::try_from(&value.service)?;
        Ok(TaggedTicket::new(Asn1Ticket {
            tkt_vno: value.tkt_vno,
            realm,
            sname,
            enc_part: KdcEncryptedData::try_from(&value.enc_part)?,
        }))
    }
}

/// A ticket together with the session key and validity the KDC told us about.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub(crate) client: Name,
    pub(crate) session_key: EncryptionKey,
    pub(crate) enc_ticket: EncTicket,
    pub(crate) auth_time: SystemTime,
    pub(crate) start_time: SystemTime,
    pub(crate) end_time: SystemTime,
    pub(crate) renew_until: Option<SystemTime>,
    pub(crate) flags: TicketFlags,
}

impl Ticket {
    pub fn client(&self) -> &Name {
        &self.client
    }

    pub fn service(&self) -> &Name {
        &self.enc_ticket.service
    }

    pub fn realm(&self) -> &str {
        self.client.realm()
    }

    pub fn session_key(&self) -> &EncryptionKey {
        &self.session_key
    }

    pub fn enc_ticket(&self) -> &EncTicket {
        &self.enc_ticket
    }

    pub fn auth_time(&self) -> SystemTime {
        self.auth_time
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub fn end_time(&self) -> SystemTime {
        self.end_time
    }

    pub fn renew_until(&self) -> Option<SystemTime> {
        self.renew_until
    }

    pub fn flags(&self) -> TicketFlags {
        self.flags
    }

    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.start_time <= now && now < self.end_time
    }
}

/// The sealed contents of a ticket, as only the KDC and the service see them.
#[derive(Debug, Clone)]
pub(crate) struct TicketPart {
    pub(crate) flags: TicketFlags,
    pub(crate) key: EncryptionKey,
    pub(crate) client: Name,
    pub(crate) auth_time: SystemTime,
    pub(crate) start_time: SystemTime,
    pub(crate) end_time: SystemTime,
    pub(crate) renew_until: Option<SystemTime>,
}

impl TicketPart {
    pub(crate) fn seal(&self, service: Name, service_key: &EncryptionKey) -> Result<EncTicket, KrbError> {
        let (cname, crealm) = <(PrincipalName, Realm)>::try_from(&self.client)?;
        let renew_till = self
            .renew_until
            .map(|t| kerberos_time(t).map(|(k, _)| k))
            .transpose()?;

        let part = TaggedEncTicketPart(EncTicketPart {
            flags: self.flags,
            key: KdcEncryptionKey::try_from(&self.key)?,
            crealm,
            cname,
            transited: TransitedEncoding::empty()?,
            auth_time: kerberos_time(self.auth_time)?.0,
            start_time: Some(kerberos_time(self.start_time)?.0),
            end_time: kerberos_time(self.end_time)?.0,
            renew_till,
            client_addresses: None,
            authorization_data: None,
        });

        let enc_part = EncryptedData::seal(service_key, &part.to_der()?, key_usage::KDC_REP_TICKET)?;
        Ok(EncTicket::new(service, enc_part))
    }

    /// Decrypt errors are returned as is so that callers can tell a missing
    /// key from a forged ticket.
    pub(crate) fn open(enc_ticket: &EncTicket, service_key: &EncryptionKey) -> Result<Self, KrbError> {
        let plaintext = enc_ticket
            .enc_part
            .open(service_key, key_usage::KDC_REP_TICKET)?;

        let TaggedEncTicketPart(part) = decode_padded(&plaintext).map_err(|err| {
            error!(?err, "unable to decode enc-ticket-part");
            KrbError::DerDecodeEncTicketPart
        })?;

        let auth_time = system_time(&part.auth_time, None);
        Ok(TicketPart {
            flags: part.flags,
            key: EncryptionKey::try_from(&part.key)?,
            client: Name::try_from((&part.cname, &part.crealm))?,
            auth_time,
            start_time: part
                .start_time
                .as_ref()
                .map(|t| system_time(t, None))
                .unwrap_or(auth_time),
            end_time: system_time(&part.end_time, None),
            renew_until: part.renew_till.as_ref().map(|t| system_time(t, None)),
        })
    }

    pub(crate) fn into_ticket(self, enc_ticket: EncTicket) -> Ticket {
        Ticket {
            client: self.client,
            session_key: self.key,
            enc_ticket,
            auth_time: self.auth_time,
            start_time: self.start_time,
            end_time: self.end_time,
            renew_until: self.renew_until,
            flags: self.flags,
        }
    }
}

/// The decrypted `EncKDCRepPart` of an AS or TGS reply.
#[derive(Debug, Clone)]
pub struct KdcReplyPart {
    pub(crate) key: EncryptionKey,
    pub(crate) nonce: u32,
    pub(crate) key_expiration: Option<SystemTime>,
    pub(crate) flags: TicketFlags,
    pub(crate) auth_time: SystemTime,
    pub(crate) start_time: Option<SystemTime>,
    pub(crate) end_time: SystemTime,
    pub(crate) renew_until: Option<SystemTime>,
    pub(crate) server: Name,
    pub(crate) encrypted_pa_data: Vec<PaData>,
}

impl KdcReplyPart {
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn server(&self) -> &Name {
        &self.server
    }

    /// Seal as an EncASRepPart, or an EncTGSRepPart when `tgs` is set.
    pub(crate) fn seal(
        &self,
        key: &EncryptionKey,
        key_usage: i32,
        tgs: bool,
    ) -> Result<EncryptedData, KrbError> {
        let part = EncKdcRepPart::try_from(self)?;
        let tagged = if tgs {
            TaggedEncKdcRepPart::EncTgsRepPart(part)
        } else {
            TaggedEncKdcRepPart::EncAsRepPart(part)
        };
        EncryptedData::seal(key, &tagged.to_der()?, key_usage)
    }

    pub(crate) fn open(
        enc_part: &EncryptedData,
        key: &EncryptionKey,
        key_usage: i32,
    ) -> Result<Self, KrbError> {
        let plaintext = enc_part.open(key, key_usage)?;
        let tagged: TaggedEncKdcRepPart = decode_padded(&plaintext).map_err(|err| {
            error!(?err, "unable to decode reply enc-part");
            KrbError::DerDecodeEncKdcRepPart
        })?;
        KdcReplyPart::try_from(&EncKdcRepPart::from(tagged))
    }

    /// The ticket this reply delivered to `client`.
    pub(crate) fn into_ticket(self, client: Name, enc_ticket: EncTicket) -> Ticket {
        Ticket {
            client,
            start_time: self.start_time.unwrap_or(self.auth_time),
            session_key: self.key,
            enc_ticket,
            auth_time: self.auth_time,
            end_time: self.end_time,
            renew_until: self.renew_until,
            flags: self.flags,
        }
    }
}

impl TryFrom<&EncKdcRepPart> for KdcReplyPart {
    type Error = KrbError;

    fn try_from(enc_kdc_rep_part: &EncKdcRepPart) -> Result<Self, Self::Error> {
        let key = EncryptionKey::try_from(&enc_kdc_rep_part.key)?;
        let server = Name::try_from((
            &enc_kdc_rep_part.server_name,
            &enc_kdc_rep_part.server_realm,
        ))?;

        Ok(KdcReplyPart {
            key,
            nonce: enc_kdc_rep_part.nonce,
            key_expiration: enc_kdc_rep_part
                .key_expiration
                .as_ref()
                .map(|t| system_time(t, None)),
            flags: enc_kdc_rep_part.flags,
            auth_time: system_time(&enc_kdc_rep_part.auth_time, None),
            start_time: enc_kdc_rep_part
                .start_time
                .as_ref()
                .map(|t| system_time(t, None)),
            end_time: system_time(&enc_kdc_rep_part.end_time, None),
            renew_until: enc_kdc_rep_part
                .renew_till
                .as_ref()
                .map(|t| system_time(t, None)),
            server,
            encrypted_pa_data: enc_kdc_rep_part
                .encrypted_pa_data
                .as_deref()
                .map(PaData::from_method_data)
                .unwrap_or_default(),
        })
    }
}

impl TryFrom<&KdcReplyPart> for EncKdcRepPart {
    type Error = KrbError;

    fn try_from(part: &KdcReplyPart) -> Result<Self, Self::Error> {
        let (server_name, server_realm) = <(PrincipalName, Realm)>::try_from(&part.server)?;
        let optional_time = |t: Option<SystemTime>| -> Result<Option<KerberosTime>, KrbError> {
            t.map(|t| kerberos_time(t).map(|(k, _)| k)).transpose()
        };

        let encrypted_pa_data = if part.encrypted_pa_data.is_empty() {
            None
        } else {
            Some(PaData::to_method_data(&part.encrypted_pa_data)?)
        };

        Ok(EncKdcRepPart {
            key: KdcEncryptionKey::try_from(&part.key)?,
            last_req: Vec::new(),
            nonce: part.nonce,
            key_expiration: optional_time(part.key_expiration)?,
            flags: part.flags,
            auth_time: kerberos_time(part.auth_time)?.0,
            start_time: optional_time(part.start_time)?,
            end_time: kerberos_time(part.end_time)?.0,
            renew_till: optional_time(part.renew_until)?,
            server_realm,
            server_name,
            client_addresses: None,
            encrypted_pa_data,
        })
    }
}

/// One ETYPE-INFO2 entry: how the KDC wants the client to derive its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtypeInfo2 {
    pub(crate) etype: EncryptionType,
    pub(crate) salt: Option<String>,
    // For AES this is the four octet big endian PBKDF2 iteration count.
    pub(crate) s2kparams: Option<Vec<u8>>,
}

impl EtypeInfo2 {
    pub fn etype(&self) -> EncryptionType {
        self.etype
    }

    pub fn salt(&self) -> Option<&str> {
        self.salt.as_deref()
    }

    /// The salt to use for `client`, falling back to the default salt.
    pub(crate) fn salt_for(&self, client: &Name) -> String {
        self.salt
            .clone()
            .unwrap_or_else(|| client.default_salt())
    }

    /// Entries from the PA-ETYPE-INFO2 in `padata`, in the order the KDC sent
    /// them. Types we don't know are skipped.
    pub(crate) fn from_padata(padata: &[PaData]) -> Result<Vec<EtypeInfo2>, KrbError> {
        let Some(pa) = PaData::find(padata, PaDataType::PaEtypeInfo2) else {
            return Ok(Vec::new());
        };

        let entries = ETypeInfo2::from_der(&pa.value).map_err(|err| {
            error!(?err, "unable to decode etype-info2");
            KrbError::DerDecodeEtypeInfo2
        })?;

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let etype = EncryptionType::try_from(entry.etype).ok()?;
                Some(EtypeInfo2 {
                    etype,
                    salt: entry.salt.as_ref().map(|s| s.to_string()),
                    s2kparams: entry
                        .s2kparams
                        .as_ref()
                        .map(|p| p.as_bytes().to_vec()),
                })
            })
            .collect())
    }

    pub(crate) fn to_padata(entries: &[EtypeInfo2]) -> Result<PaData, KrbError> {
        let wire: ETypeInfo2 = entries
            .iter()
            .map(|entry| {
                Ok(ETypeInfo2Entry {
                    etype: entry.etype.into(),
                    salt: entry
                        .salt
                        .as_deref()
                        .map(KerberosString::from_str)
                        .transpose()?,
                    s2kparams: entry
                        .s2kparams
                        .as_deref()
                        .map(OctetString::new)
                        .transpose()?,
                })
            })
            .collect::<Result<_, KrbError>>()?;

        Ok(PaData::new(PaDataType::PaEtypeInfo2, wire.to_der()?))
    }

    /// The entry of the strongest type that `policy` allows.
    pub(crate) fn select<'a>(
        entries: &'a [EtypeInfo2],
        policy: &EncryptionPolicy,
    ) -> Option<&'a EtypeInfo2> {
        policy
            .allowed()
            .iter()
            .find_map(|allowed| entries.iter().find(|entry| entry.etype == *allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        kerberos_time, system_time, whole_seconds, EncTicket, EncryptedData, EtypeInfo2, Name,
        PaData, TicketPart,
    };
    use crate::asn1::constants::{EncryptionType, PaDataType};
    use crate::asn1::ticket_flags::TicketFlags;
    use crate::asn1::principal_name::PrincipalName;
    use crate::asn1::realm::Realm;
    use crate::crypto::{EncryptionKey, EncryptionPolicy};
    use crate::error::KrbError;
    use std::str::FromStr;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn name_parse_and_display() {
        let alice = Name::from_str("alice@EXAMPLE.COM").unwrap();
        assert_eq!(alice, Name::principal("alice", "EXAMPLE.COM"));
        assert_eq!(alice.to_string(), "alice@EXAMPLE.COM");

        let host = Name::from_str("host/pepper.example.com@EXAMPLE.COM").unwrap();
        assert_eq!(
            host,
            Name::service("host", "pepper.example.com", "EXAMPLE.COM")
        );

        let tgt = Name::from_str("krbtgt/EXAMPLE.COM@EXAMPLE.COM").unwrap();
        assert_eq!(tgt, Name::service_krbtgt("EXAMPLE.COM"));
        assert!(tgt.is_service_krbtgt("EXAMPLE.COM"));
        assert!(!tgt.is_service_krbtgt("OTHER.COM"));
        assert!(!host.is_service_krbtgt("EXAMPLE.COM"));

        assert!(matches!(
            Name::from_str("alice"),
            Err(KrbError::PrincipalNameParse)
        ));
        assert!(matches!(
            Name::from_str("alice@"),
            Err(KrbError::MissingRealm)
        ));
        assert!(Name::from_str("a//b@EXAMPLE.COM").is_err());

        let anon = Name::from_str("WELLKNOWN/ANONYMOUS@EXAMPLE.COM").unwrap();
        assert_eq!(anon, Name::anonymous("EXAMPLE.COM"));
        assert!(anon.is_anonymous());
        assert!(!alice.is_anonymous());
    }

    #[test]
    fn name_wire_round_trip() {
        for text in [
            "alice@EXAMPLE.COM",
            "host/pepper.example.com@EXAMPLE.COM",
            "krbtgt/EXAMPLE.COM@EXAMPLE.COM",
            "a/b/c@EXAMPLE.COM",
        ] {
            let name = Name::from_str(text).unwrap();
            let (princ, realm) = <(PrincipalName, Realm)>::try_from(&name).unwrap();
            assert_eq!(Name::try_from((&princ, &realm)).unwrap(), name);
        }
    }

    #[test]
    fn name_type_is_a_hint() {
        // MIT sends host services as NT-PRINCIPAL.
        let princ = PrincipalName::try_from((1, "host/pepper.example.com")).unwrap();
        let realm = Realm::from_str("EXAMPLE.COM").unwrap();
        assert_eq!(
            Name::try_from((&princ, &realm)).unwrap(),
            Name::service("host", "pepper.example.com", "EXAMPLE.COM")
        );

        // And sometimes leave the instance off the krbtgt.
        let princ = PrincipalName::try_from((2, "krbtgt")).unwrap();
        assert_eq!(
            Name::try_from((&princ, &realm)).unwrap(),
            Name::service_krbtgt("EXAMPLE.COM")
        );

        let princ = PrincipalName::try_from((3, "a/b/c")).unwrap();
        assert!(matches!(
            Name::try_from((&princ, &realm)),
            Err(KrbError::NameNumberOfComponents)
        ));

        let princ = PrincipalName::try_from((99, "alice")).unwrap();
        assert!(matches!(
            Name::try_from((&princ, &realm)),
            Err(KrbError::PrincipalNameInvalidType)
        ));
    }

    #[test]
    fn default_salt() {
        assert_eq!(
            Name::principal("alice", "EXAMPLE.COM").default_salt(),
            "EXAMPLE.COMalice"
        );
        assert_eq!(
            Name::service("host", "pepper", "EXAMPLE.COM").default_salt(),
            "EXAMPLE.COMhostpepper"
        );
    }

    #[test]
    fn kerberos_time_drops_subseconds() {
        let t = UNIX_EPOCH + Duration::from_micros(1_728_645_839_123_456);
        let (ktime, usec) = kerberos_time(t).unwrap();
        assert_eq!(usec, 123_456);
        assert_eq!(system_time(&ktime, Some(usec)), t);
        assert_eq!(
            whole_seconds(t).unwrap(),
            UNIX_EPOCH + Duration::from_secs(1_728_645_839)
        );
    }

    #[test]
    fn etype_info2_selection_follows_policy() {
        let entries = vec![
            EtypeInfo2 {
                etype: EncryptionType::RC4_HMAC,
                salt: None,
                s2kparams: None,
            },
            EtypeInfo2 {
                etype: EncryptionType::AES128_CTS_HMAC_SHA1_96,
                salt: Some("EXAMPLE.COMalice".to_string()),
                s2kparams: Some(vec![0, 0, 0x10, 0]),
            },
            EtypeInfo2 {
                etype: EncryptionType::AES256_CTS_HMAC_SHA1_96,
                salt: Some("EXAMPLE.COMalice".to_string()),
                s2kparams: None,
            },
        ];

        let pa = EtypeInfo2::to_padata(&entries).unwrap();
        assert_eq!(pa.pa_type(), Some(PaDataType::PaEtypeInfo2));
        let decoded = EtypeInfo2::from_padata(&[pa]).unwrap();
        assert_eq!(decoded, entries);

        let chosen = EtypeInfo2::select(&decoded, &EncryptionPolicy::default()).unwrap();
        assert_eq!(chosen.etype(), EncryptionType::AES256_CTS_HMAC_SHA1_96);

        let legacy = EncryptionPolicy::new(vec![EncryptionType::RC4_HMAC]).unwrap();
        let chosen = EtypeInfo2::select(&decoded, &legacy).unwrap();
        assert_eq!(chosen.salt_for(&Name::principal("alice", "EXAMPLE.COM")), "EXAMPLE.COMalice");

        let des3 = EncryptionPolicy::new(vec![EncryptionType::DES3_CBC_SHA1_KD]).unwrap();
        assert!(EtypeInfo2::select(&decoded, &des3).is_none());
    }

    #[test]
    fn padata_lookup() {
        let padata = vec![
            PaData::new(PaDataType::PaFxCookie, vec![1, 2, 3]),
            PaData {
                padata_type: 9999,
                value: vec![],
            },
        ];
        assert_eq!(
            PaData::find(&padata, PaDataType::PaFxCookie).map(|p| p.value.as_slice()),
            Some([1u8, 2, 3].as_slice())
        );
        assert!(PaData::find(&padata, PaDataType::PaFxFast).is_none());
        assert_eq!(padata[1].pa_type(), None);
    }

    #[test]
    fn enc_ticket_der_round_trip() {
        let key = EncryptionKey::random(EncryptionType::AES256_CTS_HMAC_SHA1_96)
            .unwrap()
            .with_kvno(Some(3));
        let enc_part = EncryptedData::seal(&key, b"opaque", 2).unwrap();
        let ticket = EncTicket::new(Name::service_krbtgt("EXAMPLE.COM"), enc_part);

        let der = ticket.to_der().unwrap();
        let decoded = EncTicket::from_der(&der).unwrap();
        assert_eq!(decoded, ticket);
        assert_eq!(decoded.enc_part().kvno(), Some(3));
        assert_eq!(decoded.enc_part().open(&key, 2).unwrap(), b"opaque");
    }

    #[test]
    fn ticket_part_seal_and_open() {
        let service_key = EncryptionKey::random(EncryptionType::DES3_CBC_SHA1_KD)
            .unwrap()
            .with_kvno(Some(2));
        let start = UNIX_EPOCH + Duration::from_secs(1_728_645_839);
        let part = TicketPart {
            flags: TicketFlags::Initial | TicketFlags::PreAuthent,
            key: EncryptionKey::random(EncryptionType::AES256_CTS_HMAC_SHA1_96).unwrap(),
            client: Name::principal("alice", "EXAMPLE.COM"),
            auth_time: start,
            start_time: start,
            end_time: start + Duration::from_secs(3600),
            renew_until: None,
        };

        let enc_ticket = part
            .seal(Name::service_krbtgt("EXAMPLE.COM"), &service_key)
            .unwrap();
        assert_eq!(enc_ticket.enc_part().kvno(), Some(2));

        // DES3 leaves block padding behind the plaintext.
        let opened = TicketPart::open(&enc_ticket, &service_key).unwrap();
        assert_eq!(opened.client, part.client);
        assert_eq!(opened.key, part.key);
        assert_eq!(opened.end_time, part.end_time);
        assert_eq!(opened.flags, part.flags);

        let wrong = EncryptionKey::random(EncryptionType::DES3_CBC_SHA1_KD).unwrap();
        assert!(TicketPart::open(&enc_ticket, &wrong).is_err());
    }
}
