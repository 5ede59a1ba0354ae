use super::{context_mut, CredentialSource, MechanismContext, PaFlags, PreauthMechanism, RequestContext};
use crate::asn1::constants::{EncryptionType, PaDataType};
use crate::asn1::pa_enc_ts_enc::PaEncTsEnc;
use crate::constants::key_usage;
use crate::crypto::EncryptionKey;
use crate::error::KrbError;
use crate::proto::{kerberos_time, EtypeInfo2, PaData};
use der::Encode;
use tracing::{debug, error, instrument};

/// PA-ENC-TIMESTAMP: the current time encrypted in the password derived key.
#[derive(Debug, Default)]
pub struct EncTimestamp;

#[derive(Default)]
struct EncTsContext {
    // The type and salt the last timestamp was encrypted with.
    used: Option<(EncryptionType, String)>,
    retried: bool,
}

impl EncTimestamp {
    /// Derive the key for the strongest entry our policy allows. With no
    /// ETYPE-INFO2 at all we assume our first type and the default salt.
    fn derive_key(
        ctx: &RequestContext,
        password: &str,
        entries: &[EtypeInfo2],
    ) -> Result<(EncryptionKey, String), KrbError> {
        let (etype, salt, params) = if entries.is_empty() {
            let etype = ctx
                .policy
                .allowed()
                .first()
                .copied()
                .ok_or(KrbError::EncryptionDisabledByPolicy)?;
            (etype, ctx.client.default_salt(), None)
        } else {
            let entry = EtypeInfo2::select(entries, &ctx.policy).ok_or_else(|| {
                error!("kdc offered no encryption type our policy allows");
                KrbError::EncryptionDisabledByPolicy
            })?;
            (
                entry.etype(),
                entry.salt_for(&ctx.client),
                entry.s2kparams.as_deref(),
            )
        };

        let key = EncryptionKey::from_password(etype, password, &salt, params)?;
        Ok((key, salt))
    }

    fn encrypt_timestamp(ctx: &RequestContext, key: &EncryptionKey) -> Result<PaData, KrbError> {
        let (patimestamp, usec) = kerberos_time(ctx.now)?;
        let plain = PaEncTsEnc {
            patimestamp,
            pausec: Some(usec),
        }
        .to_der()?;

        let enc = key.encrypt_data(&plain, key_usage::AS_REQ_PA_ENC_TIMESTAMP)?;
        Ok(PaData::new(PaDataType::PaEncTimestamp, enc.to_der()?))
    }

    fn answer(
        ctx: &mut RequestContext,
        state: &mut EncTsContext,
        entries: &[EtypeInfo2],
        out: &mut Vec<PaData>,
    ) -> Result<(), KrbError> {
        let CredentialSource::Password(password) = &ctx.credential else {
            return Err(KrbError::PreauthMissingCredential);
        };
        let (key, salt) = Self::derive_key(ctx, password, entries)?;
        out.push(Self::encrypt_timestamp(ctx, &key)?);
        state.used = Some((key.etype(), salt));
        ctx.reply_key = Some(key);
        Ok(())
    }
}

impl PreauthMechanism for EncTimestamp {
    fn pa_type(&self) -> PaDataType {
        PaDataType::PaEncTimestamp
    }

    fn flags(&self, _pa_type: PaDataType) -> PaFlags {
        PaFlags::Real
    }

    fn init_request_context(&self, _ctx: &RequestContext) -> Result<MechanismContext, KrbError> {
        Ok(Box::new(EncTsContext::default()))
    }

    // The salt is only known once the KDC sends ETYPE-INFO2, so nothing is
    // sent optimistically.
    fn try_first(
        &self,
        _ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        _out: &mut Vec<PaData>,
    ) -> Result<(), KrbError> {
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    fn process(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        in_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError> {
        if !matches!(ctx.credential, CredentialSource::Password(_))
            || PaData::find(in_padata, PaDataType::PaEncTimestamp).is_none()
        {
            return Ok(false);
        }

        let state = context_mut::<EncTsContext>(mctx)?;
        let entries = EtypeInfo2::from_padata(in_padata)?;
        Self::answer(ctx, state, &entries, out)?;
        Ok(true)
    }

    fn try_again(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        failed_type: PaDataType,
        error_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError> {
        let state = context_mut::<EncTsContext>(mctx)?;
        if failed_type != PaDataType::PaEncTimestamp || state.retried {
            return Ok(false);
        }
        state.retried = true;

        let entries = EtypeInfo2::from_padata(error_padata)?;
        let Some(entry) = EtypeInfo2::select(&entries, &ctx.policy) else {
            return Ok(false);
        };

        // Only worth another attempt if the KDC told us something new.
        let offered = (entry.etype(), entry.salt_for(&ctx.client));
        if state.used.as_ref() == Some(&offered) {
            debug!("kdc rejected the timestamp with the parameters we used");
            return Ok(false);
        }

        Self::answer(ctx, state, &entries, out)?;
        Ok(true)
    }

    /// The KDC may have encrypted the reply in a different type than the one
    /// we guessed. Rederive from the ETYPE-INFO2 in the reply when it did.
    fn process_reply(
        &self,
        ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        reply_padata: &[PaData],
    ) -> Result<(), KrbError> {
        let CredentialSource::Password(password) = &ctx.credential else {
            return Ok(());
        };
        let Some(reply_etype) = ctx.reply_etype else {
            return Ok(());
        };
        if ctx
            .reply_key
            .as_ref()
            .is_some_and(|key| key.etype() == reply_etype)
        {
            return Ok(());
        }

        let entries = EtypeInfo2::from_padata(reply_padata)?;
        let entry = entries.iter().find(|entry| entry.etype() == reply_etype);
        let salt = entry
            .map(|entry| entry.salt_for(&ctx.client))
            .unwrap_or_else(|| ctx.client.default_salt());
        let params = entry.and_then(|entry| entry.s2kparams.as_deref());

        debug!(?reply_etype, "deriving reply key from password");
        ctx.reply_key = Some(EncryptionKey::from_password(
            reply_etype,
            password,
            &salt,
            params,
        )?);
        Ok(())
    }
}
