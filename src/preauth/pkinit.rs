//! PKINIT in Diffie-Hellman mode, RFC 4556. Certificates and CMS signatures
//! are out of scope: the auth pack and the KDC key info travel as plain DER,
//! so this only establishes a reply key from an ephemeral key agreement.

use super::{
    context_mut, CredentialSource, MechanismContext, PaFlags, PreauthMechanism, RequestContext,
};
use crate::asn1::constants::{EncryptionType, PaDataType};
use crate::asn1::pkinit::{
    AuthPack, DhPublicValue, DhRepInfo, KdcDhKeyInfo, PaPkAsRep, PaPkAsReq, PkAuthenticator,
};
use crate::config::EngineConfig;
use crate::crypto::dh::{reply_key_from_shared_secret, DhGroup, DhSecret};
use crate::crypto::EncryptionKey;
use crate::error::KrbError;
use crate::proto::{kerberos_time, system_time, time_distance, PaData};
use der::asn1::OctetString;
use der::{Decode, Encode};
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, instrument};

const DH_NONCE_LEN: usize = 32;

fn dh_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; DH_NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

#[derive(Debug)]
pub struct PkinitDh {
    group: DhGroup,
}

impl Default for PkinitDh {
    fn default() -> Self {
        PkinitDh {
            group: EngineConfig::default().pkinit_group,
        }
    }
}

struct PkinitContext {
    secret: DhSecret,
    client_nonce: Vec<u8>,
}

impl PkinitDh {
    fn auth_pack(ctx: &RequestContext, state: &PkinitContext) -> Result<PaData, KrbError> {
        let (ctime, cusec) = kerberos_time(ctx.now)?;
        let pa_checksum = Sha1::digest(&ctx.req_body).to_vec();

        let auth_pack = AuthPack {
            pk_authenticator: PkAuthenticator {
                cusec,
                ctime,
                nonce: ctx.nonce,
                pa_checksum: Some(OctetString::new(pa_checksum)?),
            },
            client_public_value: Some(DhPublicValue {
                group: state.secret.group().id(),
                public_value: OctetString::new(state.secret.public_value()?)?,
            }),
            client_dh_nonce: Some(OctetString::new(state.client_nonce.as_slice())?),
        };

        let request = PaPkAsReq {
            signed_auth_pack: OctetString::new(auth_pack.to_der()?)?,
        };
        Ok(PaData::new(PaDataType::PaPkAsReq, request.to_der()?))
    }
}

impl PreauthMechanism for PkinitDh {
    fn pa_type(&self) -> PaDataType {
        PaDataType::PaPkAsReq
    }

    fn flags(&self, _pa_type: PaDataType) -> PaFlags {
        PaFlags::Real
    }

    fn init(&mut self, config: &EngineConfig) -> Result<(), KrbError> {
        self.group = config.pkinit_group;
        Ok(())
    }

    // Only pay for the key generation when it will be used.
    fn init_request_context(&self, ctx: &RequestContext) -> Result<MechanismContext, KrbError> {
        if !matches!(ctx.credential, CredentialSource::Pkinit) {
            return Ok(Box::new(None::<PkinitContext>));
        }
        Ok(Box::new(Some(PkinitContext {
            secret: DhSecret::generate(self.group),
            client_nonce: dh_nonce(),
        })))
    }

    fn try_first(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        out: &mut Vec<PaData>,
    ) -> Result<(), KrbError> {
        if let Some(state) = context_mut::<Option<PkinitContext>>(mctx)? {
            out.push(Self::auth_pack(ctx, state)?);
        }
        Ok(())
    }

    fn process(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        in_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError> {
        if PaData::find(in_padata, PaDataType::PaPkAsReq).is_none() {
            return Ok(false);
        }
        match context_mut::<Option<PkinitContext>>(mctx)? {
            Some(state) => {
                out.push(Self::auth_pack(ctx, state)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn try_again(
        &self,
        _ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        _failed_type: PaDataType,
        _error_padata: &[PaData],
        _out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError> {
        Ok(false)
    }

    #[instrument(level = "debug", skip_all)]
    fn process_reply(
        &self,
        ctx: &mut RequestContext,
        mctx: &mut MechanismContext,
        reply_padata: &[PaData],
    ) -> Result<(), KrbError> {
        let Some(state) = context_mut::<Option<PkinitContext>>(mctx)? else {
            return Ok(());
        };
        if !ctx.sent.contains(&PaDataType::PaPkAsReq) {
            return Ok(());
        }

        let Some(pa) = PaData::find(reply_padata, PaDataType::PaPkAsRep) else {
            error!("pkinit request answered without PA-PK-AS-REP");
            return Err(KrbError::ReplyUnexpected);
        };
        let Some(reply_etype) = ctx.reply_etype else {
            return Err(KrbError::ReplyUnexpected);
        };

        let PaPkAsRep(rep_info) = PaPkAsRep::from_der(&pa.value).map_err(|err| {
            error!(?err, "unable to decode PA-PK-AS-REP");
            KrbError::DerDecodePaData
        })?;
        let key_info = KdcDhKeyInfo::from_der(rep_info.dh_signed_data.as_bytes()).map_err(|err| {
            error!(?err, "unable to decode kdc dh key info");
            KrbError::DerDecodePaData
        })?;

        if key_info.nonce != ctx.nonce {
            error!(
                expected = ctx.nonce,
                got = key_info.nonce,
                "pkinit reply nonce does not match"
            );
            return Err(KrbError::ReplyNonceMismatch);
        }

        let kdc_public = &key_info.subject_public_key;
        if kdc_public.group != state.secret.group().id() {
            error!(group = kdc_public.group, "kdc answered in another dh group");
            return Err(KrbError::PreauthDhInvalidPublicValue);
        }

        let shared_secret = state
            .secret
            .shared_secret(kdc_public.public_value.as_bytes())?;
        let server_nonce = rep_info.server_dh_nonce.as_ref().map(|n| n.as_bytes());

        debug!(?reply_etype, "pkinit reply key agreed");
        ctx.reply_key = Some(reply_key_from_shared_secret(
            &shared_secret,
            server_nonce.map(|_| state.client_nonce.as_slice()),
            server_nonce,
            reply_etype,
        )?);
        Ok(())
    }
}

/// KDC side of the exchange: check the auth pack against the request and
/// produce the PA-PK-AS-REP along with the reply key.
#[instrument(level = "debug", skip_all)]
pub(crate) fn kdc_answer(
    pa: &PaData,
    raw_body: &[u8],
    body_nonce: u32,
    reply_etype: EncryptionType,
    now: SystemTime,
    skew: Duration,
) -> Result<(PaData, EncryptionKey), KrbError> {
    let request = PaPkAsReq::from_der(&pa.value).map_err(|err| {
        error!(?err, "unable to decode PA-PK-AS-REQ");
        KrbError::DerDecodePaData
    })?;
    let auth_pack = AuthPack::from_der(request.signed_auth_pack.as_bytes()).map_err(|err| {
        error!(?err, "unable to decode auth pack");
        KrbError::DerDecodePaData
    })?;
    let authenticator = &auth_pack.pk_authenticator;

    let ctime = system_time(&authenticator.ctime, Some(authenticator.cusec));
    if time_distance(ctime, now) > skew {
        error!(?ctime, ?now, "pkinit authenticator outside of clock skew");
        return Err(KrbError::ApErrSkew);
    }

    if authenticator.nonce != body_nonce {
        error!("pkinit authenticator nonce does not match request");
        return Err(KrbError::PreauthFailed);
    }

    let Some(pa_checksum) = authenticator.pa_checksum.as_ref() else {
        error!("pkinit authenticator carries no request checksum");
        return Err(KrbError::PreauthFailed);
    };
    if pa_checksum.as_bytes() != Sha1::digest(raw_body).as_slice() {
        error!("pkinit request checksum mismatch");
        return Err(KrbError::PreauthFailed);
    }

    let Some(client_public) = auth_pack.client_public_value.as_ref() else {
        error!("only diffie-hellman pkinit is supported");
        return Err(KrbError::PreauthUnsupported);
    };
    let group = DhGroup::try_from(client_public.group)?;

    let secret = DhSecret::generate(group);
    let shared_secret = secret.shared_secret(client_public.public_value.as_bytes())?;

    let client_nonce = auth_pack.client_dh_nonce.as_ref().map(|n| n.as_bytes());
    let server_nonce = client_nonce.map(|_| dh_nonce());

    let reply_key = reply_key_from_shared_secret(
        &shared_secret,
        client_nonce,
        server_nonce.as_deref(),
        reply_etype,
    )?;

    let key_info = KdcDhKeyInfo {
        subject_public_key: DhPublicValue {
            group: group.id(),
            public_value: OctetString::new(secret.public_value()?)?,
        },
        nonce: authenticator.nonce,
        dh_key_expiration: None,
    };
    let reply = PaPkAsRep(DhRepInfo {
        dh_signed_data: OctetString::new(key_info.to_der()?)?,
        server_dh_nonce: server_nonce.map(OctetString::new).transpose()?,
    });

    Ok((
        PaData::new(PaDataType::PaPkAsRep, reply.to_der()?),
        reply_key,
    ))
}
