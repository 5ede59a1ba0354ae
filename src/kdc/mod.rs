//! An in-process KDC. It answers AS and TGS requests from an
//! [`IdentityStore`], and implements [`Transport`] so a client can talk to it
//! directly.

mod store;

pub use self::store::{IdentityFlags, IdentityRecord, IdentityStore, MemoryIdentityStore};

use self::store::StoreKeys;
use crate::ap::{validate_ap_req_at, ApReq, ApUsage, ReplayCache};
use crate::asn1::constants::{EncryptionType, KrbErrorCode, PaDataType};
use crate::asn1::decode_padded;
use crate::asn1::encrypted_data::EncryptedData as KdcEncryptedData;
use crate::asn1::kerberos_flags::KerberosFlags;
use crate::asn1::pa_enc_ts_enc::PaEncTsEnc;
use crate::asn1::ticket_flags::TicketFlags;
use crate::client::Transport;
use crate::config::{Config, EngineConfig};
use crate::constants::key_usage;
use crate::crypto::fast::make_reply_key;
use crate::crypto::EncryptionKey;
use crate::error::KrbError;
use crate::preauth::fast::{self, FastRequest};
use crate::preauth::pkinit;
use crate::preauth::token::{token_from_padata, Hs256TokenVerifier, TokenVerifier};
use crate::proto::{
    system_time, time_distance, ErrorReply, EtypeInfo2, KdcReply, KdcReplyPart, KdcRequest,
    KerberosReply, KerberosRequest, Name, PaData, TicketPart,
};
use der::Decode;
use std::cmp::min;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, instrument, trace};

// Echoed back by clients inside the armor. This KDC keeps no state between
// the legs of an exchange, so the value only has to be present.
const FAST_COOKIE: &[u8] = b"kerbex";

/// Why a request was refused, and the method data to send with the refusal.
#[derive(Debug)]
struct Refusal {
    code: KrbErrorCode,
    method_data: Vec<PaData>,
}

impl Refusal {
    fn new(code: KrbErrorCode) -> Self {
        Refusal {
            code,
            method_data: Vec::new(),
        }
    }

    fn with_method_data(mut self, method_data: Vec<PaData>) -> Self {
        self.method_data = method_data;
        self
    }
}

impl From<KrbError> for Refusal {
    fn from(err: KrbError) -> Self {
        Refusal::new(err.to_kdc_error_code())
    }
}

pub struct Kdc {
    realm: String,
    store: Arc<dyn IdentityStore>,
    token_verifier: Option<Arc<dyn TokenVerifier>>,
    config: EngineConfig,
    require_fast: bool,
    replay_cache: ReplayCache,
}

impl Kdc {
    pub fn new(realm: &str, store: Arc<dyn IdentityStore>, config: EngineConfig) -> Self {
        let replay_cache = ReplayCache::new(config.clock_skew);
        Kdc {
            realm: realm.to_string(),
            store,
            token_verifier: None,
            config,
            require_fast: false,
            replay_cache,
        }
    }

    pub fn with_token_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.token_verifier = Some(verifier);
        self
    }

    /// Refuse AS requests that are not armored.
    pub fn with_require_fast(mut self, require_fast: bool) -> Self {
        self.require_fast = require_fast;
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn handle(&self, request: &KerberosRequest) -> KerberosReply {
        self.handle_at(request, SystemTime::now())
    }

    pub fn handle_at(&self, request: &KerberosRequest, now: SystemTime) -> KerberosReply {
        match request {
            KerberosRequest::AS(request) => self.process_authentication(request, now),
            KerberosRequest::TGS(request) => self.process_ticket_grant(request, now),
        }
    }

    fn refuse(
        &self,
        refusal: Refusal,
        service: Name,
        client: Option<Name>,
        now: SystemTime,
    ) -> KerberosReply {
        debug!(code = ?refusal.code, "refusing request");
        let reply = ErrorReply::new(refusal.code, service, now).with_client(client);
        if refusal.method_data.is_empty() {
            return reply.into();
        }
        match reply.clone().with_method_data(&refusal.method_data) {
            Ok(reply) => reply.into(),
            Err(err) => {
                error!(?err, "unable to encode method data, refusing without it");
                reply.into()
            }
        }
    }

    #[instrument(level = "info", skip_all)]
    fn process_authentication(&self, outer: &KdcRequest, now: SystemTime) -> KerberosReply {
        let krbtgt = Name::service_krbtgt(&self.realm);
        let keys = StoreKeys(self.store.as_ref());

        let (inner, armor_key) =
            match fast::unwrap_request(outer, &keys, self.config.clock_skew, now) {
                Ok(Some(FastRequest { armor_key, inner })) => (Some(inner), Some(armor_key)),
                Ok(None) => (None, None),
                Err(err) => {
                    error!(?err, "unable to remove fast armor");
                    let client = outer.body().client().cloned();
                    return self.refuse(Refusal::from(err), krbtgt, client, now);
                }
            };
        let request = inner.as_ref().unwrap_or(outer);
        let client = request.body().client().cloned();

        if armor_key.is_none() && self.require_fast {
            error!("unarmored request refused by policy");
            return self.refuse(Refusal::new(KrbErrorCode::KdcErrPolicy), krbtgt, client, now);
        }

        match self.authenticate(request, armor_key.as_ref(), now) {
            Ok(reply) => KerberosReply::AS(Box::new(reply)),
            Err(mut refusal) => {
                // Inside the tunnel, the method data only travels encrypted.
                if let Some(armor_key) = armor_key.as_ref() {
                    match fast::armor_reply(
                        armor_key,
                        &refusal.method_data,
                        None,
                        None,
                        request.body().nonce(),
                    ) {
                        Ok(pa) => refusal.method_data = vec![pa],
                        Err(err) => {
                            error!(?err, "unable to armor error");
                            refusal = Refusal::from(err);
                        }
                    }
                }
                self.refuse(refusal, krbtgt, client, now)
            }
        }
    }

    fn authenticate(
        &self,
        request: &KdcRequest,
        armor_key: Option<&EncryptionKey>,
        now: SystemTime,
    ) -> Result<KdcReply, Refusal> {
        let body = request.body();
        let krbtgt = Name::service_krbtgt(&self.realm);

        let Some(client) = body.client() else {
            error!("as request without a client name");
            return Err(Refusal::new(KrbErrorCode::KdcErrCPrincipalUnknown));
        };
        if body.service() != &krbtgt {
            error!(service = %body.service(), "as request not for krbtgt");
            return Err(Refusal::new(KrbErrorCode::KdcErrSPrincipalUnknown));
        }
        if client.realm() != self.realm {
            error!(%client, "client is not in our realm");
            return Err(Refusal::new(KrbErrorCode::KdcErrWrongRealm));
        }

        let Some(record) = self.store.lookup(client) else {
            error!(%client, "client not found");
            return Err(KrbError::KdcClientUnknown.into());
        };
        if record.flags.contains(IdentityFlags::Disabled) {
            error!(%client, "client is disabled");
            return Err(Refusal::new(KrbErrorCode::KdcErrClientRevoked));
        }
        if record.is_expired(now) {
            error!(%client, "client has expired");
            return Err(KrbError::KdcPrincipalExpired.into());
        }

        let Some(reply_etype) = self.negotiate(body.etypes(), &record) else {
            error!(etypes = ?body.etypes(), "no common encryption type");
            return Err(KrbError::EncryptionDisabledByPolicy.into());
        };
        let krbtgt_key = self.service_key(&krbtgt)?;

        let padata = request.padata();
        let mut reply_padata = Vec::new();

        let (reply_key, preauthenticated) = if let Some(pa) =
            PaData::find(padata, PaDataType::PaTokenRequest)
        {
            (self.verify_token(pa, client, &record, armor_key, now)?, true)
        } else if let Some(pa) = PaData::find(padata, PaDataType::PaPkAsReq) {
            // Unsigned DH agrees a key with someone, but proves nothing about who.
            if !client.is_anonymous() || !record.flags.contains(IdentityFlags::AllowPkinit) {
                error!(%client, "unsigned pkinit is only accepted for anonymous tickets");
                return Err(KrbError::PreauthFailed.into());
            }
            let (pa_rep, key) = pkinit::kdc_answer(
                pa,
                request.raw_body(),
                body.nonce(),
                reply_etype,
                now,
                self.config.clock_skew,
            )?;
            reply_padata.push(pa_rep);
            (key, false)
        } else if let Some(pa) = PaData::find(padata, PaDataType::PaEncTimestamp) {
            let key = self.verify_timestamp(pa, &record, body.etypes(), now)?;
            reply_padata.push(self.etype_info(&record, &[i32::from(key.etype())])?);
            (key, true)
        } else if record.flags.contains(IdentityFlags::RequiresPreauth) {
            info!(%client, "preauthentication required");
            let method_data = self.preauth_methods(&record, body.etypes(), armor_key.is_some())?;
            return Err(
                Refusal::new(KrbErrorCode::KdcErrPreauthRequired).with_method_data(method_data)
            );
        } else {
            let key = record
                .key(reply_etype)
                .cloned()
                .ok_or(KrbError::MissingKeyMaterial)?;
            reply_padata.push(self.etype_info(&record, &[i32::from(reply_etype)])?);
            (key, false)
        };

        trace!(preauthenticated, "issuing tgt");

        let end_time = min(body.until(), now + self.config.ticket_lifetime);
        if end_time <= now {
            error!("requested ticket would never be valid");
            return Err(Refusal::new(KrbErrorCode::KdcErrNeverValid));
        }

        let mut flags = TicketFlags::Initial;
        if preauthenticated {
            flags |= TicketFlags::PreAuthent;
        }
        if client.is_anonymous() {
            flags |= TicketFlags::Anonymous;
        }
        let renew_until = if body.kdc_options().contains(KerberosFlags::Renewable) {
            flags |= TicketFlags::Renewable;
            let limit = now + self.config.renew_lifetime;
            Some(body.renew_until.map_or(limit, |until| min(until, limit)))
        } else {
            None
        };

        let session_key = EncryptionKey::random(reply_etype)?;
        let enc_ticket = TicketPart {
            flags,
            key: session_key.clone(),
            client: client.clone(),
            auth_time: now,
            start_time: now,
            end_time,
            renew_until,
        }
        .seal(krbtgt.clone(), &krbtgt_key)?;

        let (reply_key, reply_padata) = match armor_key {
            Some(armor_key) => {
                let strengthen_key = EncryptionKey::random(reply_key.etype())?;
                let finished = fast::make_finished(armor_key, client, &enc_ticket, now)?;
                let pa = fast::armor_reply(
                    armor_key,
                    &reply_padata,
                    Some(&strengthen_key),
                    Some(finished),
                    body.nonce(),
                )?;
                (make_reply_key(&strengthen_key, &reply_key)?, vec![pa])
            }
            None => (reply_key, reply_padata),
        };

        let enc_part = KdcReplyPart {
            key: session_key,
            nonce: body.nonce(),
            key_expiration: record.expire_time,
            flags,
            auth_time: now,
            start_time: Some(now),
            end_time,
            renew_until,
            server: krbtgt,
            encrypted_pa_data: Vec::new(),
        }
        .seal(&reply_key, key_usage::AS_REP_ENC_PART, false)?;

        info!(%client, "tgt issued");
        Ok(KdcReply {
            padata: reply_padata,
            client: client.clone(),
            ticket: enc_ticket,
            enc_part,
        })
    }

    /// The first type in the client's preference that policy allows and the
    /// client has a key for.
    fn negotiate(&self, requested: &[i32], record: &IdentityRecord) -> Option<EncryptionType> {
        requested
            .iter()
            .filter_map(|etype| EncryptionType::try_from(*etype).ok())
            .find(|etype| self.config.policy.allows(*etype) && record.key(*etype).is_some())
    }

    fn service_key(&self, service: &Name) -> Result<EncryptionKey, KrbError> {
        let Some(record) = self.store.lookup(service) else {
            error!(%service, "service not found");
            return Err(KrbError::KdcServiceUnknown);
        };
        self.config
            .policy
            .allowed()
            .iter()
            .find_map(|etype| record.key(*etype))
            .or_else(|| record.keys.first())
            .cloned()
            .ok_or_else(|| {
                error!(%service, "service has no keys");
                KrbError::MissingKeyMaterial
            })
    }

    fn etype_info(&self, record: &IdentityRecord, requested: &[i32]) -> Result<PaData, KrbError> {
        let mut etypes: Vec<EncryptionType> = requested
            .iter()
            .filter_map(|etype| EncryptionType::try_from(*etype).ok())
            .filter(|etype| self.config.policy.allows(*etype) && record.key(*etype).is_some())
            .collect();
        if etypes.is_empty() {
            etypes = record
                .keys
                .iter()
                .map(EncryptionKey::etype)
                .filter(|etype| self.config.policy.allows(*etype))
                .collect();
        }

        let entries: Vec<EtypeInfo2> = etypes
            .into_iter()
            .map(|etype| EtypeInfo2 {
                etype,
                salt: Some(record.salt.clone()),
                s2kparams: None,
            })
            .collect();
        EtypeInfo2::to_padata(&entries)
    }

    fn preauth_methods(
        &self,
        record: &IdentityRecord,
        requested: &[i32],
        armored: bool,
    ) -> Result<Vec<PaData>, KrbError> {
        let mut method_data = vec![
            PaData::new(PaDataType::PaEncTimestamp, Vec::new()),
            self.etype_info(record, requested)?,
        ];
        if record.flags.contains(IdentityFlags::AllowPkinit) {
            method_data.push(PaData::new(PaDataType::PaPkAsReq, Vec::new()));
        }
        if armored {
            if record.flags.contains(IdentityFlags::AllowToken) && self.token_verifier.is_some() {
                method_data.push(PaData::new(PaDataType::PaTokenRequest, Vec::new()));
            }
            method_data.push(PaData::new(PaDataType::PaFxCookie, FAST_COOKIE.to_vec()));
        } else {
            method_data.push(PaData::new(PaDataType::PaFxFast, Vec::new()));
        }
        Ok(method_data)
    }

    #[instrument(level = "debug", skip_all)]
    fn verify_timestamp(
        &self,
        pa: &PaData,
        record: &IdentityRecord,
        requested: &[i32],
        now: SystemTime,
    ) -> Result<EncryptionKey, Refusal> {
        let enc = KdcEncryptedData::from_der(&pa.value).map_err(|err| {
            error!(?err, "unable to decode encrypted timestamp");
            Refusal::from(KrbError::DerDecodePaData)
        })?;

        let Some(key) = EncryptionType::try_from(enc.etype)
            .ok()
            .filter(|etype| self.config.policy.allows(*etype))
            .and_then(|etype| record.key(etype))
        else {
            error!(etype = enc.etype, "no client key for the timestamp type");
            return Err(KrbError::EncryptionDisabledByPolicy.into());
        };

        let failed = || -> Refusal {
            let refusal = Refusal::new(KrbErrorCode::KdcErrPreauthFailed);
            match self.etype_info(record, requested) {
                Ok(etype_info) => refusal.with_method_data(vec![etype_info]),
                Err(_) => refusal,
            }
        };

        let plain = key
            .decrypt_data(&enc, key_usage::AS_REQ_PA_ENC_TIMESTAMP)
            .map_err(|err| {
                error!(?err, "unable to decrypt timestamp");
                failed()
            })?;
        let timestamp: PaEncTsEnc = decode_padded(&plain).map_err(|err| {
            error!(?err, "unable to decode timestamp");
            failed()
        })?;

        let client_time = system_time(&timestamp.patimestamp, timestamp.pausec);
        let offset = time_distance(client_time, now);
        if offset > self.config.clock_skew {
            error!(?offset, "clock skew");
            return Err(KrbError::ApErrSkew.into());
        }

        Ok(key.clone())
    }

    #[instrument(level = "debug", skip_all)]
    fn verify_token(
        &self,
        pa: &PaData,
        client: &Name,
        record: &IdentityRecord,
        armor_key: Option<&EncryptionKey>,
        now: SystemTime,
    ) -> Result<EncryptionKey, Refusal> {
        let Some(armor_key) = armor_key else {
            error!("token offered outside of fast");
            return Err(KrbError::PreauthFastRequired.into());
        };
        if !record.flags.contains(IdentityFlags::AllowToken) {
            error!(%client, "client may not use token preauth");
            return Err(KrbError::PreauthFailed.into());
        }
        let Some(verifier) = self.token_verifier.as_ref() else {
            error!("no token issuer is trusted");
            return Err(KrbError::PreauthUnsupported.into());
        };

        let token = token_from_padata(pa)?;
        let claims = verifier.verify(&token, now)?;

        let principal = client.components().join("/");
        if claims.subject != principal && claims.subject != client.to_string() {
            error!(subject = %claims.subject, %client, "token subject is another principal");
            return Err(KrbError::PreauthTokenInvalid.into());
        }

        // The token proves identity but carries no key, so the reply is
        // sealed under the armor key.
        Ok(armor_key.clone())
    }

    #[instrument(level = "info", skip_all)]
    fn process_ticket_grant(&self, request: &KdcRequest, now: SystemTime) -> KerberosReply {
        match self.grant(request, now) {
            Ok(reply) => KerberosReply::TGS(Box::new(reply)),
            Err(refusal) => self.refuse(refusal, request.body().service().clone(), None, now),
        }
    }

    fn grant(&self, request: &KdcRequest, now: SystemTime) -> Result<KdcReply, Refusal> {
        let body = request.body();

        let Some(pa) = PaData::find(request.padata(), PaDataType::PaTgsReq) else {
            error!("tgs request without PA-TGS-REQ");
            return Err(KrbError::TgsMissingPaApReq.into());
        };
        let ap_req = ApReq::from_der(&pa.value)?;

        let keys = StoreKeys(self.store.as_ref());
        let validated = validate_ap_req_at(
            &ap_req,
            &keys,
            Some(&self.replay_cache),
            self.config.clock_skew,
            now,
            ApUsage::TgsRequest,
        )?;

        let tgt = validated.ticket();
        if !tgt.service().is_service_krbtgt(&self.realm) {
            error!(service = %tgt.service(), "tgs request not made with a tgt");
            return Err(KrbError::TgsTicketIsNotTgt.into());
        }
        // Clock skew covers the authenticator, not the lifetime of the TGT.
        if tgt.end_time() <= now {
            error!(end_time = ?tgt.end_time(), "tgt has expired");
            return Err(KrbError::ApErrTicketExpired.into());
        }
        validated.verify_checksum(request.raw_body())?;

        let service = body.service();
        let Some(record) = self.store.lookup(service) else {
            error!(%service, "service not found");
            return Err(KrbError::KdcServiceUnknown.into());
        };
        if !record.flags.contains(IdentityFlags::Service) {
            error!(%service, "tickets are only issued for services");
            return Err(KrbError::KdcServiceUnknown.into());
        }
        let service_key = self.service_key(service)?;

        let Some(session_etype) = body
            .etypes()
            .iter()
            .filter_map(|etype| EncryptionType::try_from(*etype).ok())
            .find(|etype| self.config.policy.allows(*etype))
        else {
            error!(etypes = ?body.etypes(), "no common encryption type");
            return Err(KrbError::EncryptionDisabledByPolicy.into());
        };

        let end_time = min(
            min(body.until(), tgt.end_time()),
            now + self.config.ticket_lifetime,
        );
        let flags = tgt.flags() & TicketFlags::PreAuthent;
        let session_key = EncryptionKey::random(session_etype)?;

        let enc_ticket = TicketPart {
            flags,
            key: session_key.clone(),
            client: tgt.client().clone(),
            auth_time: tgt.auth_time(),
            start_time: now,
            end_time,
            renew_until: None,
        }
        .seal(service.clone(), &service_key)?;

        let (reply_key, usage) = match validated.subkey() {
            Some(subkey) => (subkey, key_usage::TGS_REP_ENC_PART_SUB_KEY),
            None => (tgt.session_key(), key_usage::TGS_REP_ENC_PART_SESSION_KEY),
        };
        let enc_part = KdcReplyPart {
            key: session_key,
            nonce: body.nonce(),
            key_expiration: None,
            flags,
            auth_time: tgt.auth_time(),
            start_time: Some(now),
            end_time,
            renew_until: None,
            server: service.clone(),
            encrypted_pa_data: Vec::new(),
        }
        .seal(reply_key, usage, true)?;

        info!(client = %tgt.client(), %service, "service ticket issued");
        Ok(KdcReply {
            padata: Vec::new(),
            client: tgt.client().clone(),
            ticket: enc_ticket,
            enc_part,
        })
    }
}

impl TryFrom<&Config> for Kdc {
    type Error = KrbError;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        let store = MemoryIdentityStore::try_from(config)?;
        let mut kdc = Kdc::new(&config.realm, Arc::new(store), config.engine.clone())
            .with_require_fast(config.require_fast);
        if let Some(token) = config.token.as_ref() {
            kdc = kdc.with_token_verifier(Arc::new(Hs256TokenVerifier::from(token)));
        }
        Ok(kdc)
    }
}

impl Transport for Kdc {
    // Both directions go through DER so the exchange sees what a remote KDC
    // would.
    async fn send_recv(&self, request: KerberosRequest) -> Result<KerberosReply, KrbError> {
        let request = KerberosRequest::from_der(&request.to_der()?)?;
        let reply = self.handle(&request);
        KerberosReply::from_der(&reply.to_der()?)
    }
}
