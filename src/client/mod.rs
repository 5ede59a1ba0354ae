//! The requesting side of the ticket exchange. A `KrbClient` drives one AS or
//! TGS exchange at a time over any [`Transport`], negotiating preauth through
//! its [`PreauthRegistry`].

pub mod transport;

pub use self::transport::{TcpTransport, Transport, UdpTransport};

use crate::ap::{build_ap_req_with_usage, ApReqOptions, ApUsage};
use crate::asn1::constants::{KrbErrorCode, PaDataType};
use crate::asn1::kerberos_flags::KerberosFlags;
use crate::ccache::CredentialCache;
use crate::config::EngineConfig;
use crate::constants::key_usage;
use crate::crypto::fast::make_reply_key;
use crate::crypto::EncryptionKey;
use crate::error::KrbError;
use crate::preauth::{
    CredentialSource, FastArmor, Negotiation, PreauthRegistry, PreauthState, RequestContext,
};
use crate::proto::{
    time_distance, ErrorReply, KdcReply, KdcReplyPart, KdcRequest, KerberosReply,
    KerberosRequest, Name, PaData, RequestBody, Ticket,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, instrument};

// First request, the answer to PREAUTH_REQUIRED, and one retry each for a
// salt change and a cookie round.
const MAX_AS_EXCHANGES: usize = 4;

/// Request nonces. Positive 31 bit values so they survive a signed decode.
#[derive(Debug)]
pub struct NonceSource {
    rng: Mutex<StdRng>,
}

impl Default for NonceSource {
    fn default() -> Self {
        NonceSource {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl NonceSource {
    pub fn next(&self) -> u32 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_range(1..=0x7FFF_FFFF)
    }
}

pub struct KrbClient<T: Transport> {
    transport: T,
    config: EngineConfig,
    registry: PreauthRegistry,
    nonces: NonceSource,
}

impl<T: Transport> KrbClient<T> {
    pub fn new(transport: T, config: EngineConfig) -> Result<Self, KrbError> {
        let registry = PreauthRegistry::with_defaults(&config)?;
        Ok(Self::with_registry(transport, config, registry))
    }

    pub fn with_registry(transport: T, config: EngineConfig, registry: PreauthRegistry) -> Self {
        KrbClient {
            transport,
            config,
            registry,
            nonces: NonceSource::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &PreauthRegistry {
        &self.registry
    }

    /// Obtain a TGT for `principal` in its own realm.
    pub async fn request_tgt(
        &self,
        principal: &Name,
        credential: CredentialSource,
    ) -> Result<Ticket, KrbError> {
        self.as_exchange(principal, credential, None).await
    }

    /// As `request_tgt`, with the exchange tunnelled in FAST armor built from
    /// `armor_ticket`.
    pub async fn request_tgt_armored(
        &self,
        principal: &Name,
        credential: CredentialSource,
        armor_ticket: &Ticket,
    ) -> Result<Ticket, KrbError> {
        let armor = FastArmor::new(armor_ticket)?;
        self.as_exchange(principal, credential, Some(armor)).await
    }

    pub async fn request_tgt_with_armor(
        &self,
        principal: &Name,
        credential: CredentialSource,
        armor: FastArmor,
    ) -> Result<Ticket, KrbError> {
        self.as_exchange(principal, credential, Some(armor)).await
    }

    #[instrument(level = "debug", skip(self, credential, armor), fields(%principal))]
    async fn as_exchange(
        &self,
        principal: &Name,
        credential: CredentialSource,
        armor: Option<FastArmor>,
    ) -> Result<Ticket, KrbError> {
        let now = SystemTime::now();
        let service = Name::service_krbtgt(principal.realm());
        let nonce = self.nonces.next();

        let body = RequestBody {
            kdc_options: KerberosFlags::Renewable,
            client: Some(principal.clone()),
            service: service.clone(),
            from: None,
            until: now + self.config.ticket_lifetime,
            renew_until: Some(now + self.config.renew_lifetime),
            nonce,
            etypes: self.requested_etypes(),
        };

        let mut ctx = RequestContext::new(
            principal.clone(),
            service,
            credential,
            self.config.policy.clone(),
            nonce,
            now,
            self.config.clock_skew,
            armor,
        );
        ctx.req_body = body.to_der()?;

        let mut negotiation = self.registry.begin(&mut ctx)?;
        let mut padata = self.registry.first_padata(&mut ctx, &mut negotiation)?;

        let mut last_refusal = None;

        for _ in 0..MAX_AS_EXCHANGES {
            ctx.transition(PreauthState::AwaitingKdcResponse)?;

            let request = match ctx.armor.as_ref() {
                Some(armor) => armor.armor_request(body.clone(), &padata),
                None => KdcRequest::new(body.clone(), std::mem::take(&mut padata)),
            }
            .map_err(|err| ctx.fail(err))?;

            let reply = self
                .transport
                .send_recv(KerberosRequest::AS(Box::new(request)))
                .await
                .map_err(|err| ctx.fail(err))?;

            match reply {
                KerberosReply::AS(reply) => {
                    return self
                        .open_as_reply(&mut ctx, &mut negotiation, &reply)
                        .map_err(|err| ctx.fail(err));
                }
                KerberosReply::TGS(_) => {
                    error!("kdc answered an AS-REQ with a TGS-REP");
                    return Err(ctx.fail(KrbError::ReplyUnexpected));
                }
                KerberosReply::Error(err) => {
                    last_refusal = Some(err.as_ref().clone());
                    padata = self
                        .next_padata(&mut ctx, &mut negotiation, *err)
                        .map_err(|err| ctx.fail(err))?;
                    ctx.transition(PreauthState::RetryRequired)?;
                }
            }
        }

        error!("kdc kept rejecting the request");
        let err = last_refusal.map_or(KrbError::PreauthFailed, ErrorReply::into_error);
        Err(ctx.fail(err))
    }

    /// Work out what to send after the KDC refused the last request.
    fn next_padata(
        &self,
        ctx: &mut RequestContext,
        negotiation: &mut Negotiation,
        err: ErrorReply,
    ) -> Result<Vec<PaData>, KrbError> {
        let mut method_data = err.method_data()?;
        if let Some(armor) = ctx.armor.as_ref() {
            if PaData::find(&method_data, PaDataType::PaFxFast).is_some() {
                method_data = armor.unwrap_reply(&method_data, ctx.nonce)?.padata;
            }
        }

        debug!(code = ?err.code(), offered = method_data.len(), "kdc refused request");

        if err.code() == KrbErrorCode::KdcErrPreauthRequired && !negotiation.challenged() {
            return self
                .registry
                .answer_challenge(ctx, negotiation, &method_data)?
                .ok_or_else(|| {
                    error!("no configured mechanism can answer the kdc");
                    KrbError::PreauthNoMechanismAvailable
                });
        }

        if ctx.sent.is_empty() {
            return Err(err.into_error());
        }

        match self.registry.retry(ctx, negotiation, &method_data)? {
            Some(padata) => Ok(padata),
            None => Err(err.into_error()),
        }
    }

    fn open_as_reply(
        &self,
        ctx: &mut RequestContext,
        negotiation: &mut Negotiation,
        reply: &KdcReply,
    ) -> Result<Ticket, KrbError> {
        let (reply_padata, strengthen_key) = match ctx.armor.as_ref() {
            Some(armor) => {
                let fast = armor.unwrap_reply(reply.padata(), ctx.nonce)?;
                fast.verify_finished(armor.armor_key(), reply.ticket(), reply.client())?;
                (fast.padata, fast.strengthen_key)
            }
            None => (reply.padata().to_vec(), None),
        };

        ctx.reply_etype = reply.enc_part().etype();
        self.registry.finish(ctx, negotiation, &reply_padata)?;

        let Some(reply_key) = ctx.reply_key.clone() else {
            error!("no mechanism produced a reply key");
            return Err(KrbError::PreauthMissingCredential);
        };
        let reply_key = match strengthen_key {
            Some(strengthen_key) => make_reply_key(&strengthen_key, &reply_key)?,
            None => reply_key,
        };

        let part = KdcReplyPart::open(reply.enc_part(), &reply_key, key_usage::AS_REP_ENC_PART)?;
        check_reply_part(&part, ctx.nonce, &ctx.service, SystemTime::now(), ctx.skew)?;
        if time_distance(part.auth_time, SystemTime::now()) > ctx.skew {
            error!("as reply auth time is outside the clock skew");
            return Err(KrbError::ReplyClockSkew);
        }
        if reply.client() != &ctx.client {
            error!(client = %reply.client(), expected = %ctx.client, "as reply names another client");
            return Err(KrbError::ReplyNameMismatch);
        }

        ctx.transition(PreauthState::Satisfied)?;
        info!(client = %ctx.client, "tgt issued");
        Ok(part.into_ticket(reply.client().clone(), reply.ticket().clone()))
    }

    /// A ticket to `service` from `cache`, or a fresh one from the KDC which
    /// is then stored. The TGT itself is cached alongside.
    pub async fn service_ticket<C: CredentialCache + ?Sized>(
        &self,
        cache: &C,
        tgt: &Ticket,
        service: &Name,
    ) -> Result<Ticket, KrbError> {
        if let Some(ticket) = cache.load(service) {
            debug!(%service, "using cached ticket");
            return Ok(ticket);
        }

        if cache.load(tgt.service()).is_none() {
            cache.store(tgt)?;
        }
        let ticket = self.request_service_ticket(tgt, service).await?;
        cache.store(&ticket)?;
        Ok(ticket)
    }

    /// Exchange `tgt` for a ticket to `service`.
    #[instrument(level = "debug", skip(self, tgt), fields(%service))]
    pub async fn request_service_ticket(
        &self,
        tgt: &Ticket,
        service: &Name,
    ) -> Result<Ticket, KrbError> {
        let now = SystemTime::now();
        let nonce = self.nonces.next();

        let body = RequestBody {
            kdc_options: KerberosFlags::none(),
            client: None,
            service: service.clone(),
            from: None,
            until: std::cmp::min(now + self.config.ticket_lifetime, tgt.end_time()),
            renew_until: None,
            nonce,
            etypes: self.requested_etypes(),
        };
        let mut request = KdcRequest::new(body, Vec::new())?;

        let built = build_ap_req_with_usage(
            tgt,
            ApReqOptions {
                subkey: Some(EncryptionKey::random(tgt.session_key().etype())?),
                checksum_data: Some(request.raw_body().to_vec()),
                client_time: Some(now),
                ..Default::default()
            },
            ApUsage::TgsRequest,
        )?;
        request
            .padata
            .push(PaData::new(PaDataType::PaTgsReq, built.ap_req.to_der()?));

        let reply = match self
            .transport
            .send_recv(KerberosRequest::TGS(Box::new(request)))
            .await?
        {
            KerberosReply::TGS(reply) => reply,
            KerberosReply::Error(err) => {
                debug!(code = ?err.code(), "tgs request refused");
                return Err(err.into_error());
            }
            KerberosReply::AS(_) => {
                error!("kdc answered a TGS-REQ with an AS-REP");
                return Err(KrbError::ReplyUnexpected);
            }
        };

        let (reply_key, usage) = match built.subkey.as_ref() {
            Some(subkey) => (subkey, key_usage::TGS_REP_ENC_PART_SUB_KEY),
            None => (tgt.session_key(), key_usage::TGS_REP_ENC_PART_SESSION_KEY),
        };
        let part = KdcReplyPart::open(reply.enc_part(), reply_key, usage)?;
        check_reply_part(&part, nonce, service, SystemTime::now(), self.config.clock_skew)?;
        if reply.client() != tgt.client() {
            error!(client = %reply.client(), "tgs reply names another client");
            return Err(KrbError::ReplyNameMismatch);
        }

        info!(client = %tgt.client(), "service ticket issued");
        Ok(part.into_ticket(reply.client().clone(), reply.ticket().clone()))
    }

    fn requested_etypes(&self) -> Vec<i32> {
        self.config
            .policy
            .allowed()
            .iter()
            .map(|etype| i32::from(*etype))
            .collect()
    }
}

fn check_reply_part(
    part: &KdcReplyPart,
    nonce: u32,
    service: &Name,
    now: SystemTime,
    skew: Duration,
) -> Result<(), KrbError> {
    if part.nonce() != nonce {
        error!(expected = nonce, got = part.nonce(), "reply nonce does not match request");
        return Err(KrbError::ReplyNonceMismatch);
    }
    if part.server() != service {
        error!(server = %part.server(), expected = %service, "reply is for another service");
        return Err(KrbError::ReplyNameMismatch);
    }
    if part.end_time + skew <= now {
        error!("reply ticket has already expired");
        return Err(KrbError::ReplyClockSkew);
    }
    if let Some(start_time) = part.start_time {
        if start_time > now + skew {
            error!("reply ticket starts beyond the clock skew");
            return Err(KrbError::ReplyClockSkew);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{KrbClient, NonceSource, Transport};
    use crate::asn1::constants::{EncryptionType, KrbErrorCode, PaDataType};
    use crate::asn1::ticket_flags::TicketFlags;
    use crate::config::EngineConfig;
    use crate::constants::key_usage;
    use crate::crypto::EncryptionKey;
    use crate::error::KrbError;
    use crate::preauth::{
        CredentialSource, MechanismContext, PaFlags, PreauthMechanism, PreauthRegistry,
        RequestContext,
    };
    use crate::proto::{
        ErrorReply, EtypeInfo2, KdcReply, KdcReplyPart, KerberosReply, KerberosRequest, Name,
        PaData, TicketPart,
    };
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    /// Answers from a fixed script and keeps every request it saw.
    struct Scripted {
        replies: Mutex<VecDeque<Box<dyn Fn(&KerberosRequest) -> KerberosReply + Send>>>,
        seen: Mutex<Vec<KerberosRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Box<dyn Fn(&KerberosRequest) -> KerberosReply + Send>>) -> Self {
            Scripted {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for Scripted {
        async fn send_recv(&self, request: KerberosRequest) -> Result<KerberosReply, KrbError> {
            let answer = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(KrbError::TransportClosed)?;
            let reply = answer(&request);
            self.seen.lock().unwrap().push(request);
            Ok(reply)
        }
    }

    fn alice() -> Name {
        Name::principal("alice", "EXAMPLE.COM")
    }

    fn refuse(code: KrbErrorCode, method_data: Vec<PaData>) -> Box<dyn Fn(&KerberosRequest) -> KerberosReply + Send> {
        Box::new(move |_| {
            ErrorReply::new(code, Name::service_krbtgt("EXAMPLE.COM"), SystemTime::now())
                .with_client(Some(alice()))
                .with_method_data(&method_data)
                .unwrap()
                .into()
        })
    }

    /// An AS-REP for alice sealed under her password key, echoing `nonce`
    /// from the request unless told otherwise.
    fn issue(nonce_offset: u32) -> Box<dyn Fn(&KerberosRequest) -> KerberosReply + Send> {
        Box::new(move |request| {
            let now = SystemTime::now();
            let krbtgt = Name::service_krbtgt("EXAMPLE.COM");
            let session_key =
                EncryptionKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![7; 32], None)
                    .unwrap();
            let ticket_key =
                EncryptionKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![9; 32], Some(1))
                    .unwrap();
            let enc_ticket = TicketPart {
                flags: TicketFlags::none(),
                key: session_key.clone(),
                client: alice(),
                auth_time: now,
                start_time: now,
                end_time: now + Duration::from_secs(3600),
                renew_until: None,
            }
            .seal(krbtgt.clone(), &ticket_key)
            .unwrap();

            let user_key = EncryptionKey::from_password(
                EncryptionType::AES256_CTS_HMAC_SHA1_96,
                "correct horse",
                "EXAMPLE.COMalice",
                None,
            )
            .unwrap();
            let part = KdcReplyPart {
                key: session_key,
                nonce: request.inner().body().nonce().wrapping_add(nonce_offset),
                key_expiration: None,
                flags: TicketFlags::none(),
                auth_time: now,
                start_time: Some(now),
                end_time: now + Duration::from_secs(3600),
                renew_until: None,
                server: krbtgt,
                encrypted_pa_data: Vec::new(),
            };
            let entries = [EtypeInfo2 {
                etype: EncryptionType::AES256_CTS_HMAC_SHA1_96,
                salt: Some("EXAMPLE.COMalice".to_string()),
                s2kparams: None,
            }];

            KerberosReply::AS(Box::new(KdcReply {
                padata: vec![EtypeInfo2::to_padata(&entries).unwrap()],
                client: alice(),
                ticket: enc_ticket,
                enc_part: part
                    .seal(&user_key, key_usage::AS_REP_ENC_PART, false)
                    .unwrap(),
            }))
        })
    }

    fn challenge() -> Vec<PaData> {
        let entries = [EtypeInfo2 {
            etype: EncryptionType::AES256_CTS_HMAC_SHA1_96,
            salt: Some("EXAMPLE.COMalice".to_string()),
            s2kparams: None,
        }];
        vec![
            PaData::new(PaDataType::PaEncTimestamp, Vec::new()),
            EtypeInfo2::to_padata(&entries).unwrap(),
        ]
    }

    #[test]
    fn nonces_do_not_collide() {
        let nonces = NonceSource::default();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let nonce = nonces.next();
            assert!(nonce > 0 && nonce <= 0x7FFF_FFFF);
            assert!(seen.insert(nonce));
        }
    }

    #[tokio::test]
    async fn preauth_required_then_issued() {
        let _ = tracing_subscriber::fmt::try_init();

        let transport = Scripted::new(vec![
            refuse(KrbErrorCode::KdcErrPreauthRequired, challenge()),
            issue(0),
        ]);
        let client = KrbClient::new(transport, EngineConfig::default()).unwrap();

        let ticket = client
            .request_tgt(&alice(), CredentialSource::password("correct horse"))
            .await
            .unwrap();
        assert_eq!(ticket.client(), &alice());
        assert!(ticket.service().is_service_krbtgt("EXAMPLE.COM"));

        let seen = client.transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].inner().padata().is_empty());
        assert!(PaData::find(seen[1].inner().padata(), PaDataType::PaEncTimestamp).is_some());
        // Both attempts belong to one exchange.
        assert_eq!(seen[0].inner().body().nonce(), seen[1].inner().body().nonce());
    }

    #[tokio::test]
    async fn kdc_error_is_surfaced() {
        let transport = Scripted::new(vec![refuse(KrbErrorCode::KdcErrCPrincipalUnknown, vec![])]);
        let client = KrbClient::new(transport, EngineConfig::default()).unwrap();

        let err = client
            .request_tgt(&alice(), CredentialSource::password("correct horse"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KrbError::KdcError {
                code: KrbErrorCode::KdcErrCPrincipalUnknown,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn second_failure_without_retry_fails_with_kdc_code() {
        // Same salt both times, so enc-ts has nothing to correct.
        let transport = Scripted::new(vec![
            refuse(KrbErrorCode::KdcErrPreauthRequired, challenge()),
            refuse(KrbErrorCode::KdcErrPreauthFailed, challenge()),
        ]);
        let client = KrbClient::new(transport, EngineConfig::default()).unwrap();

        let err = client
            .request_tgt(&alice(), CredentialSource::password("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KrbError::KdcError {
                code: KrbErrorCode::KdcErrPreauthFailed,
                ..
            }
        ));
        assert_eq!(client.transport.seen.lock().unwrap().len(), 2);
    }

    /// Answers every challenge and retries every refusal.
    struct Insistent;

    impl PreauthMechanism for Insistent {
        fn pa_type(&self) -> PaDataType {
            PaDataType::PaEncTimestamp
        }

        fn flags(&self, _pa_type: PaDataType) -> PaFlags {
            PaFlags::Real
        }

        fn init_request_context(&self, _ctx: &RequestContext) -> Result<MechanismContext, KrbError> {
            Ok(Box::new(()))
        }

        fn try_first(
            &self,
            _ctx: &mut RequestContext,
            _mctx: &mut MechanismContext,
            _out: &mut Vec<PaData>,
        ) -> Result<(), KrbError> {
            Ok(())
        }

        fn process(
            &self,
            _ctx: &mut RequestContext,
            _mctx: &mut MechanismContext,
            _in_padata: &[PaData],
            out: &mut Vec<PaData>,
        ) -> Result<bool, KrbError> {
            out.push(PaData::new(PaDataType::PaEncTimestamp, vec![1]));
            Ok(true)
        }

        fn try_again(
            &self,
            _ctx: &mut RequestContext,
            _mctx: &mut MechanismContext,
            _failed_type: PaDataType,
            _error_padata: &[PaData],
            out: &mut Vec<PaData>,
        ) -> Result<bool, KrbError> {
            out.push(PaData::new(PaDataType::PaEncTimestamp, vec![2]));
            Ok(true)
        }
    }

    #[tokio::test]
    async fn last_kdc_error_is_kept_when_exchanges_run_out() {
        let config = EngineConfig::default();
        let mut registry = PreauthRegistry::empty();
        registry.register(Box::new(Insistent), &config).unwrap();

        let transport = Scripted::new(vec![
            refuse(KrbErrorCode::KdcErrPreauthRequired, challenge()),
            refuse(KrbErrorCode::KdcErrMorePreauthDataRequired, challenge()),
            refuse(KrbErrorCode::KdcErrMorePreauthDataRequired, challenge()),
            refuse(KrbErrorCode::KdcErrMorePreauthDataRequired, challenge()),
            issue(0),
        ]);
        let client = KrbClient::with_registry(transport, config, registry);

        let err = client
            .request_tgt(&alice(), CredentialSource::password("correct horse"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KrbError::KdcError {
                code: KrbErrorCode::KdcErrMorePreauthDataRequired,
                ..
            }
        ));
        // The exchange stopped before the reply it would have accepted.
        assert_eq!(client.transport.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn no_mechanism_for_challenge() {
        let transport = Scripted::new(vec![refuse(
            KrbErrorCode::KdcErrPreauthRequired,
            vec![PaData::new(PaDataType::PaPkAsReq, Vec::new())],
        )]);
        let client = KrbClient::new(transport, EngineConfig::default()).unwrap();

        // PKINIT is offered but this client only has a password.
        let err = client
            .request_tgt(&alice(), CredentialSource::password("correct horse"))
            .await
            .unwrap_err();
        assert!(matches!(err, KrbError::PreauthNoMechanismAvailable));
    }

    #[tokio::test]
    async fn reply_with_wrong_nonce_is_rejected() {
        let transport = Scripted::new(vec![
            refuse(KrbErrorCode::KdcErrPreauthRequired, challenge()),
            issue(1),
        ]);
        let client = KrbClient::new(transport, EngineConfig::default()).unwrap();

        let err = client
            .request_tgt(&alice(), CredentialSource::password("correct horse"))
            .await
            .unwrap_err();
        assert!(matches!(err, KrbError::ReplyNonceMismatch));
    }
}
