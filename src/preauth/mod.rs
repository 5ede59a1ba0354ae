//! Client side preauthentication. Each mechanism is a trait object in a
//! registry keyed by its PA-DATA type, and every AS exchange owns a
//! [`RequestContext`] that the mechanisms read from and write their reply
//! key into.

mod enc_ts;
pub(crate) mod fast;
pub(crate) mod pkinit;
pub mod token;

pub use self::enc_ts::EncTimestamp;
pub use self::fast::{FastArmor, FastMechanism};
pub use self::pkinit::PkinitDh;
pub use self::token::TokenPreauth;

use crate::asn1::constants::{EncryptionType, PaDataType};
use crate::config::EngineConfig;
use crate::crypto::{EncryptionKey, EncryptionPolicy};
use crate::error::KrbError;
use crate::proto::{Name, PaData};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, trace};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreauthState {
    NotStarted,
    ContextInitialized,
    QuestionsPrepared,
    AwaitingKdcResponse,
    Satisfied,
    RetryRequired,
    Failed,
}

impl PreauthState {
    fn is_terminal(self) -> bool {
        matches!(self, PreauthState::Satisfied | PreauthState::Failed)
    }

    fn can_move_to(self, next: PreauthState) -> bool {
        use PreauthState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (NotStarted, ContextInitialized)
            | (ContextInitialized, QuestionsPrepared)
            | (QuestionsPrepared, AwaitingKdcResponse)
            | (AwaitingKdcResponse, Satisfied)
            | (AwaitingKdcResponse, RetryRequired)
            | (RetryRequired, AwaitingKdcResponse) => true,
            _ => false,
        }
    }
}

/// A real mechanism authenticates the client. An info mechanism only carries
/// supporting data such as a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaFlags {
    Real,
    Info,
}

/// What the client authenticates with.
pub enum CredentialSource {
    Password(Zeroizing<String>),
    /// A signed JWT. Only sent inside a FAST tunnel.
    Token(String),
    /// An ephemeral Diffie-Hellman exchange in the configured group.
    Pkinit,
}

impl CredentialSource {
    pub fn password(password: &str) -> Self {
        CredentialSource::Password(Zeroizing::new(password.to_string()))
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Password(_) => f.write_str("Password(..)"),
            CredentialSource::Token(_) => f.write_str("Token(..)"),
            CredentialSource::Pkinit => f.write_str("Pkinit"),
        }
    }
}

/// Per mechanism state for one exchange, downcast by the mechanism that
/// created it.
pub type MechanismContext = Box<dyn Any + Send>;

/// Everything one AS exchange knows. A fresh context is built for every
/// request and never outlives it.
#[derive(Debug)]
pub struct RequestContext {
    pub(crate) client: Name,
    pub(crate) service: Name,
    pub(crate) credential: CredentialSource,
    pub(crate) policy: EncryptionPolicy,
    pub(crate) nonce: u32,
    pub(crate) now: SystemTime,
    pub(crate) skew: Duration,
    /// DER of the request body the mechanisms bind to. With FAST this is the
    /// inner body.
    pub(crate) req_body: Vec<u8>,
    pub(crate) reply_key: Option<EncryptionKey>,
    /// The type of the reply enc-part, known once the AS-REP arrives.
    pub(crate) reply_etype: Option<EncryptionType>,
    pub(crate) armor: Option<FastArmor>,
    pub(crate) cookie: Option<Vec<u8>>,
    /// Real mechanisms that contributed to the last request.
    pub(crate) sent: Vec<PaDataType>,
    state: PreauthState,
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: Name,
        service: Name,
        credential: CredentialSource,
        policy: EncryptionPolicy,
        nonce: u32,
        now: SystemTime,
        skew: Duration,
        armor: Option<FastArmor>,
    ) -> Self {
        RequestContext {
            client,
            service,
            credential,
            policy,
            nonce,
            now,
            skew,
            req_body: Vec::new(),
            reply_key: None,
            reply_etype: None,
            armor,
            cookie: None,
            sent: Vec::new(),
            state: PreauthState::NotStarted,
        }
    }

    pub fn state(&self) -> PreauthState {
        self.state
    }

    pub fn client(&self) -> &Name {
        &self.client
    }

    pub fn service(&self) -> &Name {
        &self.service
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn reply_key(&self) -> Option<&EncryptionKey> {
        self.reply_key.as_ref()
    }

    pub fn is_armored(&self) -> bool {
        self.armor.is_some()
    }

    pub(crate) fn transition(&mut self, next: PreauthState) -> Result<(), KrbError> {
        if !self.state.can_move_to(next) {
            error!(from = ?self.state, to = ?next, "invalid preauth state transition");
            return Err(KrbError::PreauthInvalidStateTransition);
        }
        trace!(from = ?self.state, to = ?next, "preauth state");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` and hand back `err`. Used on every abort path.
    pub(crate) fn fail(&mut self, err: KrbError) -> KrbError {
        if !self.state.is_terminal() {
            self.state = PreauthState::Failed;
        }
        err
    }
}

/// A preauthentication mechanism. Mechanisms are stateless between
/// exchanges: anything request scoped lives in the context they create.
pub trait PreauthMechanism: Send + Sync {
    fn pa_type(&self) -> PaDataType;

    fn flags(&self, pa_type: PaDataType) -> PaFlags;

    fn init(&mut self, _config: &EngineConfig) -> Result<(), KrbError> {
        Ok(())
    }

    fn init_request_context(&self, ctx: &RequestContext) -> Result<MechanismContext, KrbError>;

    fn prepare_questions(
        &self,
        _ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
    ) -> Result<(), KrbError> {
        Ok(())
    }

    /// Optimistic padata for the first request, before the KDC has asked
    /// for anything.
    fn try_first(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        out: &mut Vec<PaData>,
    ) -> Result<(), KrbError>;

    /// Answer a PREAUTH_REQUIRED challenge. Returns true when padata was added
    /// and the exchange should continue.
    fn process(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        in_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError>;

    /// The KDC rejected what this mechanism sent. Returns true when a
    /// corrected attempt was added to `out`.
    fn try_again(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        failed_type: PaDataType,
        error_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError>;

    /// Inspect the padata of a successful reply, deriving the reply key if
    /// this mechanism is responsible for it.
    fn process_reply(
        &self,
        _ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        _reply_padata: &[PaData],
    ) -> Result<(), KrbError> {
        Ok(())
    }
}

/// Downcast a mechanism context, failing if another mechanism's context was
/// handed over.
pub(crate) fn context_mut<T: 'static>(mctx: &mut MechanismContext) -> Result<&mut T, KrbError> {
    mctx.downcast_mut::<T>().ok_or_else(|| {
        error!("mechanism handed a context it did not create");
        KrbError::PreauthInvalidStateTransition
    })
}

/// The mechanism contexts of one exchange.
pub(crate) struct Negotiation {
    contexts: BTreeMap<PaDataType, MechanismContext>,
    challenged: bool,
}

impl Negotiation {
    pub(crate) fn challenged(&self) -> bool {
        self.challenged
    }
}

pub struct PreauthRegistry {
    mechanisms: BTreeMap<PaDataType, Box<dyn PreauthMechanism>>,
    preference: Vec<PaDataType>,
}

impl fmt::Debug for PreauthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreauthRegistry")
            .field("preference", &self.preference)
            .finish()
    }
}

impl PreauthRegistry {
    pub fn empty() -> Self {
        PreauthRegistry {
            mechanisms: BTreeMap::new(),
            preference: Vec::new(),
        }
    }

    /// Token, PKINIT, encrypted timestamp and FAST, in that order of
    /// preference.
    pub fn with_defaults(config: &EngineConfig) -> Result<Self, KrbError> {
        let mut registry = PreauthRegistry::empty();
        registry.register(Box::new(TokenPreauth::default()), config)?;
        registry.register(Box::new(PkinitDh::default()), config)?;
        registry.register(Box::new(EncTimestamp), config)?;
        registry.register(Box::new(FastMechanism), config)?;
        Ok(registry)
    }

    /// Register after the mechanisms already present. A mechanism for a type
    /// that is already registered replaces it in place.
    pub fn register(
        &mut self,
        mut mechanism: Box<dyn PreauthMechanism>,
        config: &EngineConfig,
    ) -> Result<(), KrbError> {
        mechanism.init(config)?;
        let pa_type = mechanism.pa_type();
        if self.mechanisms.insert(pa_type, mechanism).is_none() {
            self.preference.push(pa_type);
        }
        Ok(())
    }

    pub fn get(&self, pa_type: PaDataType) -> Option<&dyn PreauthMechanism> {
        self.mechanisms.get(&pa_type).map(|m| m.as_ref())
    }

    pub fn preference(&self) -> &[PaDataType] {
        &self.preference
    }

    fn mechanisms(&self) -> impl Iterator<Item = (PaDataType, &dyn PreauthMechanism)> {
        self.preference
            .iter()
            .filter_map(|pa_type| self.get(*pa_type).map(|m| (*pa_type, m)))
    }

    /// Create every mechanism context and let each prepare its questions.
    pub(crate) fn begin(&self, ctx: &mut RequestContext) -> Result<Negotiation, KrbError> {
        let mut contexts = BTreeMap::new();
        for (pa_type, mechanism) in self.mechanisms() {
            let mctx = mechanism
                .init_request_context(ctx)
                .map_err(|err| ctx.fail(err))?;
            contexts.insert(pa_type, mctx);
        }
        ctx.transition(PreauthState::ContextInitialized)?;

        for (pa_type, mechanism) in self.mechanisms() {
            if let Some(mctx) = contexts.get_mut(&pa_type) {
                mechanism
                    .prepare_questions(ctx, mctx)
                    .map_err(|err| ctx.fail(err))?;
            }
        }
        ctx.transition(PreauthState::QuestionsPrepared)?;

        Ok(Negotiation {
            contexts,
            challenged: false,
        })
    }

    pub(crate) fn first_padata(
        &self,
        ctx: &mut RequestContext,
        negotiation: &mut Negotiation,
    ) -> Result<Vec<PaData>, KrbError> {
        let mut out = Vec::new();
        ctx.sent.clear();

        for (pa_type, mechanism) in self.mechanisms() {
            let Some(mctx) = negotiation.contexts.get_mut(&pa_type) else {
                continue;
            };
            let before = out.len();
            mechanism
                .try_first(ctx, mctx, &mut out)
                .map_err(|err| ctx.fail(err))?;
            if out.len() > before && mechanism.flags(pa_type) == PaFlags::Real {
                ctx.sent.push(pa_type);
            }
        }

        Ok(out)
    }

    /// Answer PREAUTH_REQUIRED. Info mechanisms all contribute, then real
    /// mechanisms are tried in the order the KDC listed them until one
    /// succeeds. A failing mechanism fails this attempt only.
    pub(crate) fn answer_challenge(
        &self,
        ctx: &mut RequestContext,
        negotiation: &mut Negotiation,
        method_data: &[PaData],
    ) -> Result<Option<Vec<PaData>>, KrbError> {
        negotiation.challenged = true;
        ctx.sent.clear();
        let mut out = Vec::new();

        for (pa_type, mechanism) in self.mechanisms() {
            if mechanism.flags(pa_type) != PaFlags::Info {
                continue;
            }
            if let Some(mctx) = negotiation.contexts.get_mut(&pa_type) {
                mechanism
                    .process(ctx, mctx, method_data, &mut out)
                    .map_err(|err| ctx.fail(err))?;
            }
        }

        for pa_type in method_data.iter().filter_map(PaData::pa_type) {
            let Some(mechanism) = self.get(pa_type) else {
                continue;
            };
            if mechanism.flags(pa_type) != PaFlags::Real {
                continue;
            }
            let Some(mctx) = negotiation.contexts.get_mut(&pa_type) else {
                continue;
            };

            let mut attempt = Vec::new();
            match mechanism.process(ctx, mctx, method_data, &mut attempt) {
                Ok(true) => {
                    debug!(?pa_type, "answering preauth challenge");
                    out.extend(attempt);
                    ctx.sent.push(pa_type);
                    return Ok(Some(out));
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(?err, ?pa_type, "mechanism failed, trying the next one");
                }
            }
        }

        Ok(None)
    }

    /// The KDC rejected our preauth. Give each mechanism that took part a
    /// chance to correct itself.
    pub(crate) fn retry(
        &self,
        ctx: &mut RequestContext,
        negotiation: &mut Negotiation,
        error_padata: &[PaData],
    ) -> Result<Option<Vec<PaData>>, KrbError> {
        let failed: Vec<PaDataType> = std::mem::take(&mut ctx.sent);
        let mut out = Vec::new();
        let mut retrying = false;

        for failed_type in failed {
            let Some(mechanism) = self.get(failed_type) else {
                continue;
            };
            let Some(mctx) = negotiation.contexts.get_mut(&failed_type) else {
                continue;
            };
            if mechanism.try_again(ctx, mctx, failed_type, error_padata, &mut out)? {
                debug!(?failed_type, "mechanism is retrying");
                ctx.sent.push(failed_type);
                retrying = true;
            }
        }

        if !retrying {
            return Ok(None);
        }

        // Info mechanisms still carry the cookie on a retry.
        for (pa_type, mechanism) in self.mechanisms() {
            if mechanism.flags(pa_type) != PaFlags::Info {
                continue;
            }
            if let Some(mctx) = negotiation.contexts.get_mut(&pa_type) {
                mechanism.try_again(ctx, mctx, pa_type, error_padata, &mut out)?;
            }
        }

        Ok(Some(out))
    }

    pub(crate) fn finish(
        &self,
        ctx: &mut RequestContext,
        negotiation: &mut Negotiation,
        reply_padata: &[PaData],
    ) -> Result<(), KrbError> {
        for (pa_type, mechanism) in self.mechanisms() {
            if let Some(mctx) = negotiation.contexts.get_mut(&pa_type) {
                mechanism.process_reply(ctx, mctx, reply_padata)?;
            }
        }
        Ok(())
    }
}
