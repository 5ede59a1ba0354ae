//! The AP exchange. A client proves it holds a ticket by sealing a fresh
//! authenticator under the ticket session key, and the service may prove
//! itself back with an AP-REP.

use crate::asn1::ap_options::ApOptions;
use crate::asn1::ap_rep::ApRep as KdcApRep;
use crate::asn1::ap_req::ApReq as KdcApReq;
use crate::asn1::authenticator::{Authenticator, AuthenticatorInner};
use crate::asn1::checksum::Checksum as KdcChecksum;
use crate::asn1::constants::{ChecksumType, EncryptionType, KrbMessageType};
use crate::asn1::enc_ap_rep_part::{EncApRepPart, EncApRepPartInner};
use crate::asn1::encryption_key::EncryptionKey as KdcEncryptionKey;
use crate::asn1::principal_name::PrincipalName;
use crate::asn1::realm::Realm;
use crate::asn1::tagged_ticket::TaggedTicket;
use crate::asn1::ticket_flags::TicketFlags;
use crate::asn1::{decode_padded, Microseconds};
use crate::constants::{key_usage, DEFAULT_CLOCK_SKEW, KRB5_PVNO};
use crate::crypto::{make_checksum, verify_checksum, Checksum, EncryptionKey};
use crate::error::{ErrorClass, KrbError};
use crate::proto::{
    kerberos_time, system_time, time_distance, whole_seconds, EncTicket, EncryptedData, Name, Ticket, TicketPart,
};
use der::{Decode, Encode};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, instrument, trace};

/// Which exchange an AP-REQ belongs to. The key usages differ between a plain
/// application request and the PA-TGS-REQ of a TGS exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApUsage {
    Application,
    TgsRequest,
}

impl ApUsage {
    fn authenticator(self) -> i32 {
        match self {
            ApUsage::Application => key_usage::AP_REQ_AUTH,
            ApUsage::TgsRequest => key_usage::TGS_REQ_AUTH,
        }
    }

    fn checksum(self) -> i32 {
        match self {
            ApUsage::Application => key_usage::AP_REQ_AUTH_CKSUM,
            ApUsage::TgsRequest => key_usage::TGS_REQ_AUTH_CKSUM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReq {
    inner: KdcApReq,
}

impl ApReq {
    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        self.inner.to_der().map_err(KrbError::from)
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self, KrbError> {
        let inner = KdcApReq::from_der(bytes)?;

        if inner.0.pvno != KRB5_PVNO {
            error!(pvno = inner.0.pvno, "unsupported protocol version");
            return Err(KrbError::InvalidPvno);
        }

        if inner.0.msg_type != u8::from(KrbMessageType::KrbApReq) {
            error!(msg_type = inner.0.msg_type, "not an ap-req");
            return Err(KrbError::InvalidMessageType);
        }

        Ok(ApReq { inner })
    }

    /// The service the enclosed ticket was issued for.
    pub fn service(&self) -> Result<Name, KrbError> {
        let ticket = &self.inner.0.ticket.0;
        Name::try_from((&ticket.sname, &ticket.realm))
    }

    pub fn mutual_required(&self) -> bool {
        self.inner.0.ap_options.contains(ApOptions::MutualRequired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRep {
    inner: KdcApRep,
}

impl ApRep {
    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        self.inner.to_der().map_err(KrbError::from)
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self, KrbError> {
        let inner = KdcApRep::from_der(bytes)?;

        if inner.0.pvno != KRB5_PVNO {
            error!(pvno = inner.0.pvno, "unsupported protocol version");
            return Err(KrbError::InvalidPvno);
        }

        if inner.0.msg_type != u8::from(KrbMessageType::KrbApRep) {
            error!(msg_type = inner.0.msg_type, "not an ap-rep");
            return Err(KrbError::InvalidMessageType);
        }

        Ok(ApRep { inner })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApReqOptions {
    /// A subkey for the session. With mutual authentication the AP-REP is
    /// sealed under it.
    pub subkey: Option<EncryptionKey>,
    /// Application data to bind into the authenticator checksum.
    pub checksum_data: Option<Vec<u8>>,
    pub mutual: bool,
    pub seq_number: Option<u32>,
    /// Defaults to now.
    pub client_time: Option<SystemTime>,
}

/// An AP-REQ along with what the client needs to check the AP-REP.
#[derive(Debug, Clone)]
pub struct ApReqBuilt {
    pub ap_req: ApReq,
    pub ctime: SystemTime,
    pub cusec: Microseconds,
    pub subkey: Option<EncryptionKey>,
}

impl ApReqBuilt {
    /// The key the service seals its AP-REP under.
    pub fn reply_key<'a>(&'a self, ticket: &'a Ticket) -> &'a EncryptionKey {
        self.subkey.as_ref().unwrap_or(ticket.session_key())
    }
}

pub fn build_ap_req(ticket: &Ticket, options: ApReqOptions) -> Result<ApReqBuilt, KrbError> {
    build_ap_req_with_usage(ticket, options, ApUsage::Application)
}

#[instrument(level = "debug", skip_all)]
pub(crate) fn build_ap_req_with_usage(
    ticket: &Ticket,
    options: ApReqOptions,
    usage: ApUsage,
) -> Result<ApReqBuilt, KrbError> {
    let session_key = ticket.session_key();
    let client_time = options.client_time.unwrap_or_else(SystemTime::now);
    let (ctime, cusec) = kerberos_time(client_time)?;

    let cksum = options
        .checksum_data
        .as_deref()
        .map(|data| {
            make_checksum(ChecksumType::NONE, data, Some(session_key), Some(usage.checksum()))
                .and_then(|c| KdcChecksum::try_from(&c))
        })
        .transpose()?;

    let (cname, crealm) = <(PrincipalName, Realm)>::try_from(ticket.client())?;

    let authenticator = Authenticator(AuthenticatorInner {
        authenticator_vno: KRB5_PVNO,
        crealm,
        cname,
        cksum,
        cusec,
        ctime,
        subkey: options
            .subkey
            .as_ref()
            .map(KdcEncryptionKey::try_from)
            .transpose()?,
        seq_number: options.seq_number,
        authorization_data: None,
    });

    let enc_authenticator =
        session_key.encrypt_data(&authenticator.to_der()?, usage.authenticator())?;

    let ap_options = if options.mutual {
        ApOptions::MutualRequired
    } else {
        ApOptions::none()
    };

    let ap_req = KdcApReq::new(
        ap_options,
        TaggedTicket::try_from(ticket.enc_ticket())?,
        enc_authenticator,
    );

    Ok(ApReqBuilt {
        ap_req: ApReq { inner: ap_req },
        ctime: whole_seconds(client_time)?,
        cusec,
        subkey: options.subkey,
    })
}

/// Where a service finds its long term keys.
pub trait KeySource: Send + Sync {
    fn key_for(
        &self,
        service: &Name,
        etype: EncryptionType,
        kvno: Option<u32>,
    ) -> Option<EncryptionKey>;
}

/// A service with a single key.
impl KeySource for EncryptionKey {
    fn key_for(
        &self,
        _service: &Name,
        etype: EncryptionType,
        _kvno: Option<u32>,
    ) -> Option<EncryptionKey> {
        (self.etype() == etype).then(|| self.clone())
    }
}

/// A validated AP-REQ. The ticket has been decrypted, the authenticator
/// matched it, and it has not been seen before.
#[derive(Debug, Clone)]
pub struct ApReqValidated {
    ticket: Ticket,
    subkey: Option<EncryptionKey>,
    ctime: SystemTime,
    cusec: Microseconds,
    seq_number: Option<u32>,
    checksum: Option<Checksum>,
    mutual: bool,
    usage: ApUsage,
}

impl ApReqValidated {
    pub fn client(&self) -> &Name {
        self.ticket.client()
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn subkey(&self) -> Option<&EncryptionKey> {
        self.subkey.as_ref()
    }

    pub fn seq_number(&self) -> Option<u32> {
        self.seq_number
    }

    pub fn mutual_required(&self) -> bool {
        self.mutual
    }

    pub fn client_time(&self) -> (SystemTime, Microseconds) {
        (self.ctime, self.cusec)
    }

    /// Check the authenticator checksum over `data`. The checksum must be
    /// present and keyed with the ticket session key.
    pub fn verify_checksum(&self, data: &[u8]) -> Result<(), KrbError> {
        let (missing, failed) = match self.usage {
            ApUsage::Application => (KrbError::ApErrModified, KrbError::ApErrModified),
            ApUsage::TgsRequest => (
                KrbError::TgsAuthMissingChecksum,
                KrbError::TgsAuthChecksumFailure,
            ),
        };

        let Some(checksum) = self.checksum.as_ref() else {
            error!("authenticator carries no checksum");
            return Err(missing);
        };

        if !checksum.checksum_type.is_keyed() {
            error!(checksum_type = ?checksum.checksum_type, "authenticator checksum is not keyed");
            return Err(missing);
        }

        verify_checksum(
            checksum,
            data,
            Some(self.ticket.session_key()),
            Some(self.usage.checksum()),
        )
        .map_err(|err| {
            debug!(?err, "authenticator checksum mismatch");
            failed
        })
    }
}

pub fn validate_ap_req(
    ap_req: &ApReq,
    keys: &dyn KeySource,
    replay_cache: &ReplayCache,
    skew: Duration,
) -> Result<ApReqValidated, KrbError> {
    validate_ap_req_at(
        ap_req,
        keys,
        Some(replay_cache),
        skew,
        SystemTime::now(),
        ApUsage::Application,
    )
}

/// Validate at `now`. FAST armor is reused for every request of one
/// exchange, so it is checked without a replay cache.
#[instrument(level = "debug", skip_all)]
pub(crate) fn validate_ap_req_at(
    ap_req: &ApReq,
    keys: &dyn KeySource,
    replay_cache: Option<&ReplayCache>,
    skew: Duration,
    now: SystemTime,
    usage: ApUsage,
) -> Result<ApReqValidated, KrbError> {
    let wire = &ap_req.inner.0;
    let enc_ticket = EncTicket::try_from(&wire.ticket)?;

    let Some(etype) = enc_ticket.enc_part().etype() else {
        error!("ticket is sealed with an unknown encryption type");
        return Err(KrbError::ApErrNoKey);
    };

    let service_key = keys
        .key_for(enc_ticket.service(), etype, enc_ticket.enc_part().kvno())
        .ok_or_else(|| {
            error!(service = %enc_ticket.service(), ?etype, "no key for service");
            KrbError::ApErrNoKey
        })?;

    let ticket_part = TicketPart::open(&enc_ticket, &service_key).map_err(|err| match err {
        KrbError::KeyTypeMismatch | KrbError::KvnoMismatch => KrbError::ApErrNoKey,
        err if err.class() == ErrorClass::Integrity => KrbError::ApErrBadIntegrity,
        err => err,
    })?;

    let plaintext = EncryptedData::from(&wire.authenticator)
        .open(&ticket_part.key, usage.authenticator())
        .map_err(|err| {
            error!(?err, "unable to decrypt authenticator");
            KrbError::ApErrBadIntegrity
        })?;

    let Authenticator(authenticator) = decode_padded(&plaintext).map_err(|err| {
        error!(?err, "unable to decode authenticator");
        KrbError::DerDecodeAuthenticator
    })?;

    let auth_client = Name::try_from((&authenticator.cname, &authenticator.crealm))?;
    trace!(client = %auth_client, cusec = authenticator.cusec, "authenticator decrypted");
    if auth_client != ticket_part.client {
        error!(
            ticket = %ticket_part.client,
            authenticator = %auth_client,
            "authenticator client does not match ticket"
        );
        return Err(KrbError::ApErrBadMatch);
    }

    let ctime = system_time(&authenticator.ctime, None);
    let client_time = system_time(&authenticator.ctime, Some(authenticator.cusec));
    if time_distance(client_time, now) > skew {
        error!(?client_time, ?now, "authenticator outside of clock skew");
        return Err(KrbError::ApErrSkew);
    }

    if ticket_part.end_time + skew < now {
        error!(end_time = ?ticket_part.end_time, "ticket expired");
        return Err(KrbError::ApErrTicketExpired);
    }

    if ticket_part.start_time > now + skew || ticket_part.flags.contains(TicketFlags::Invalid) {
        error!(start_time = ?ticket_part.start_time, "ticket not yet valid");
        return Err(KrbError::ApErrTicketNotYetValid);
    }

    let subkey = authenticator
        .subkey
        .as_ref()
        .map(EncryptionKey::try_from)
        .transpose()?;

    let checksum = authenticator
        .cksum
        .as_ref()
        .map(Checksum::try_from)
        .transpose()?;

    // Last, so a request refused for any other reason keeps its slot.
    if let Some(replay_cache) = replay_cache {
        replay_cache.check_and_insert(&auth_client, ctime, authenticator.cusec, now)?;
    }

    Ok(ApReqValidated {
        ticket: ticket_part.into_ticket(enc_ticket),
        subkey,
        ctime,
        cusec: authenticator.cusec,
        seq_number: authenticator.seq_number,
        checksum,
        mutual: ap_req.mutual_required(),
        usage,
    })
}

/// Answer a validated AP-REQ, echoing the client time back under the
/// authenticator subkey, or the session key when there is none.
pub fn build_ap_rep(validated: &ApReqValidated) -> Result<ApRep, KrbError> {
    let key = validated
        .subkey
        .as_ref()
        .unwrap_or(validated.ticket.session_key());

    let (ctime, _) = kerberos_time(validated.ctime)?;
    let part = EncApRepPart(EncApRepPartInner {
        ctime,
        cusec: validated.cusec,
        subkey: None,
        seq_number: validated.seq_number,
    });

    let enc_part = key.encrypt_data(&part.to_der()?, key_usage::AP_REP_ENCPART)?;
    Ok(ApRep {
        inner: KdcApRep::new(enc_part),
    })
}

#[derive(Debug, Clone)]
pub struct ApRepVerified {
    pub subkey: Option<EncryptionKey>,
    pub seq_number: Option<u32>,
}

/// Client side of mutual authentication. `ctime` and `cusec` are the values
/// sent in the authenticator.
pub fn verify_ap_rep(
    ap_rep: &ApRep,
    key: &EncryptionKey,
    ctime: SystemTime,
    cusec: Microseconds,
) -> Result<ApRepVerified, KrbError> {
    let plaintext = key
        .decrypt_data(&ap_rep.inner.0.enc_part, key_usage::AP_REP_ENCPART)
        .map_err(|err| {
            error!(?err, "unable to decrypt ap-rep");
            KrbError::ApErrMutualFail
        })?;

    let EncApRepPart(part) = decode_padded(&plaintext).map_err(|err| {
        error!(?err, "unable to decode enc-ap-rep-part");
        KrbError::DerDecodeEncApRepPart
    })?;

    let (expected_ctime, _) = kerberos_time(ctime)?;
    if part.ctime != expected_ctime || part.cusec != cusec {
        error!("ap-rep does not echo our authenticator time");
        return Err(KrbError::ApErrMutualFail);
    }

    Ok(ApRepVerified {
        subkey: part
            .subkey
            .as_ref()
            .map(EncryptionKey::try_from)
            .transpose()?,
        seq_number: part.seq_number,
    })
}

type ReplayKey = (String, u64, Microseconds);

/// Authenticators seen within the skew window. An authenticator older than
/// the window is rejected for skew before the cache is consulted, so entries
/// are dropped once they leave it.
#[derive(Debug)]
pub struct ReplayCache {
    window: Duration,
    entries: Mutex<HashMap<ReplayKey, SystemTime>>,
}

impl Default for ReplayCache {
    fn default() -> Self {
        ReplayCache::new(DEFAULT_CLOCK_SKEW)
    }
}

impl ReplayCache {
    pub fn new(window: Duration) -> Self {
        ReplayCache {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `(client, ctime, cusec)`, failing if it is already present.
    pub fn check_and_insert(
        &self,
        client: &Name,
        ctime: SystemTime,
        cusec: Microseconds,
        now: SystemTime,
    ) -> Result<(), KrbError> {
        let seconds = ctime
            .duration_since(UNIX_EPOCH)
            .map_err(|_| KrbError::DoYouHaveATimeMachine)?
            .as_secs();
        let key = (client.to_string(), seconds, cusec);

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, expiry| *expiry >= now);

        if entries.contains_key(&key) {
            error!(%client, "authenticator replayed");
            return Err(KrbError::ApErrRepeat);
        }

        entries.insert(key, ctime + self.window);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
