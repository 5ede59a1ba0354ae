//! Bearer token preauthentication. The client presents a signed JWT inside a
//! FAST tunnel and the KDC trusts the token subject once a [`TokenVerifier`]
//! accepts it. The armor key becomes the reply key.

use super::{CredentialSource, MechanismContext, PaFlags, PreauthMechanism, RequestContext};
use crate::asn1::constants::PaDataType;
use crate::asn1::kerberos_flags::KerberosFlags;
use crate::asn1::pa_token::{KrbToken, PaTokenRequest, TokenInfo, TOKEN_FORMAT_JWT};
use crate::config::{EngineConfig, TokenConfig};
use crate::error::KrbError;
use crate::proto::PaData;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use der::asn1::OctetString;
use der::{Decode, Encode};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const JWT_ALG_HS256: &str = "HS256";

/// The claims of a token after decoding. Nothing here is trusted until
/// [`TokenVerifier::verify`] has succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub issuer: String,
    pub subject: String,
    pub audience: String,
    pub expiry: SystemTime,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    iss: String,
    sub: String,
    aud: String,
    exp: u64,
    #[serde(flatten)]
    rest: BTreeMap<String, serde_json::Value>,
}

impl From<JwtClaims> for TokenClaims {
    fn from(claims: JwtClaims) -> Self {
        TokenClaims {
            issuer: claims.iss,
            subject: claims.sub,
            audience: claims.aud,
            expiry: UNIX_EPOCH + Duration::from_secs(claims.exp),
            attributes: claims.rest,
        }
    }
}

/// Split a compact JWT into header, payload and signature.
fn split_token(token: &str) -> Result<(&str, &str, &str), KrbError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => {
            error!("token is not a compact jwt");
            Err(KrbError::TokenDecode)
        }
    }
}

fn decode_part<T: for<'de> Deserialize<'de>>(part: &str) -> Result<T, KrbError> {
    let bytes = URL_SAFE_NO_PAD.decode(part)?;
    serde_json::from_slice(&bytes).map_err(KrbError::from)
}

/// Checks tokens on behalf of the KDC.
pub trait TokenVerifier: Send + Sync {
    fn decode(&self, token: &str) -> Result<TokenClaims, KrbError>;

    fn verify_signature(&self, token: &str) -> bool;

    fn trusted_issuer(&self) -> &str;

    fn expected_audience(&self) -> &str;

    fn verify(&self, token: &str, now: SystemTime) -> Result<TokenClaims, KrbError> {
        if !self.verify_signature(token) {
            error!("token signature is invalid");
            return Err(KrbError::PreauthTokenInvalid);
        }

        let claims = self.decode(token).map_err(|err| {
            error!(?err, "unable to decode token claims");
            KrbError::PreauthTokenInvalid
        })?;

        if claims.issuer != self.trusted_issuer() {
            error!(issuer = %claims.issuer, "token from an untrusted issuer");
            return Err(KrbError::PreauthTokenInvalid);
        }

        if claims.audience != self.expected_audience() {
            error!(audience = %claims.audience, "token is for another audience");
            return Err(KrbError::PreauthTokenInvalid);
        }

        if claims.expiry <= now {
            error!(expiry = ?claims.expiry, "token has expired");
            return Err(KrbError::PreauthTokenExpired);
        }

        Ok(claims)
    }
}

/// HMAC-SHA256 signed tokens with a secret shared with the issuer.
pub struct Hs256TokenVerifier {
    issuer: String,
    audience: String,
    secret: Zeroizing<Vec<u8>>,
}

impl Hs256TokenVerifier {
    pub fn new(issuer: &str, audience: &str, secret: &[u8]) -> Self {
        Hs256TokenVerifier {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            secret: Zeroizing::new(secret.to_vec()),
        }
    }
}

impl From<&TokenConfig> for Hs256TokenVerifier {
    fn from(config: &TokenConfig) -> Self {
        Hs256TokenVerifier::new(&config.issuer, &config.audience, &config.secret)
    }
}

impl TokenVerifier for Hs256TokenVerifier {
    fn decode(&self, token: &str) -> Result<TokenClaims, KrbError> {
        let (_, payload, _) = split_token(token)?;
        decode_part::<JwtClaims>(payload).map(TokenClaims::from)
    }

    fn verify_signature(&self, token: &str) -> bool {
        let Ok((header, payload, signature)) = split_token(token) else {
            return false;
        };

        match decode_part::<JwtHeader>(header) {
            Ok(header) if header.alg == JWT_ALG_HS256 => {}
            Ok(header) => {
                debug!(alg = %header.alg, "unsupported token algorithm");
                return false;
            }
            Err(_) => return false,
        }

        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    fn trusted_issuer(&self) -> &str {
        &self.issuer
    }

    fn expected_audience(&self) -> &str {
        &self.audience
    }
}

/// Issues HS256 tokens. Used by issuers and in tests.
pub struct TokenEncoder {
    secret: Zeroizing<Vec<u8>>,
}

impl TokenEncoder {
    pub fn new(secret: &[u8]) -> Self {
        TokenEncoder {
            secret: Zeroizing::new(secret.to_vec()),
        }
    }

    pub fn encode(&self, claims: &TokenClaims) -> Result<String, KrbError> {
        let exp = claims
            .expiry
            .duration_since(UNIX_EPOCH)
            .map_err(|_| KrbError::DoYouHaveATimeMachine)?
            .as_secs();

        let header = serde_json::to_vec(&JwtHeader {
            alg: JWT_ALG_HS256.to_string(),
            typ: Some("JWT".to_string()),
        })?;
        let payload = serde_json::to_vec(&JwtClaims {
            iss: claims.issuer.clone(),
            sub: claims.subject.clone(),
            aud: claims.audience.clone(),
            exp,
            rest: claims.attributes.clone(),
        })?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| KrbError::InvalidHmacKey)?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

/// The token carried in a PA-TOKEN-REQUEST.
pub(crate) fn token_from_padata(pa: &PaData) -> Result<String, KrbError> {
    let request = PaTokenRequest::from_der(&pa.value).map_err(|err| {
        error!(?err, "unable to decode token request");
        KrbError::DerDecodePaData
    })?;

    if request.auth_token.token_format != TOKEN_FORMAT_JWT {
        error!(
            format = request.auth_token.token_format,
            "unsupported token format"
        );
        return Err(KrbError::PreauthUnsupported);
    }

    String::from_utf8(request.auth_token.token_value.as_bytes().to_vec()).map_err(|_| {
        error!("token is not utf8");
        KrbError::TokenDecode
    })
}

/// PA-TOKEN-REQUEST on the client. Refuses to send a token outside a FAST
/// tunnel.
#[derive(Debug)]
pub struct TokenPreauth {
    vendor: String,
}

impl Default for TokenPreauth {
    fn default() -> Self {
        TokenPreauth {
            vendor: EngineConfig::default().token_vendor,
        }
    }
}

impl TokenPreauth {
    fn token_padata(&self, ctx: &mut RequestContext, out: &mut Vec<PaData>) -> Result<bool, KrbError> {
        let CredentialSource::Token(token) = &ctx.credential else {
            return Ok(false);
        };

        let Some(armor) = ctx.armor.as_ref() else {
            error!("refusing to send a token without fast armor");
            return Err(KrbError::PreauthFastRequired);
        };

        let request = PaTokenRequest {
            token_info: TokenInfo {
                flags: KerberosFlags::none(),
                token_vendor: self.vendor.clone(),
            },
            auth_token: KrbToken {
                token_format: TOKEN_FORMAT_JWT,
                token_value: OctetString::new(token.as_bytes())?,
            },
        };
        out.push(PaData::new(PaDataType::PaTokenRequest, request.to_der()?));

        let reply_key = armor.armor_key().clone();
        ctx.reply_key = Some(reply_key);
        Ok(true)
    }
}

impl PreauthMechanism for TokenPreauth {
    fn pa_type(&self) -> PaDataType {
        PaDataType::PaTokenRequest
    }

    fn flags(&self, _pa_type: PaDataType) -> PaFlags {
        PaFlags::Real
    }

    fn init(&mut self, config: &EngineConfig) -> Result<(), KrbError> {
        self.vendor = config.token_vendor.clone();
        Ok(())
    }

    fn init_request_context(&self, _ctx: &RequestContext) -> Result<MechanismContext, KrbError> {
        Ok(Box::new(()))
    }

    fn try_first(
        &self,
        ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        out: &mut Vec<PaData>,
    ) -> Result<(), KrbError> {
        self.token_padata(ctx, out).map(|_| ())
    }

    fn process(
        &self,
        ctx: &mut RequestContext,
        _mctx: &mut MechanismContext,
        in_padata: &[PaData],
        out: &mut Vec<PaData>,
    ) -> Result<bool, KrbError> {
        if PaData::find(in_padata, PaDataType::PaTokenRequest).is_none() {
            return Ok(false);
        }
        self.token_padata(ctx, out)
    }

    // A rejected token will not get better by resending it.
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
}

#[cfg(test)]
mod tests {
    use super::{
        token_from_padata, Hs256TokenVerifier, TokenClaims, TokenEncoder, TokenPreauth,
        TokenVerifier,
    };
    use crate::asn1::constants::PaDataType;
    use crate::config::EngineConfig;
    use crate::crypto::EncryptionPolicy;
    use crate::error::KrbError;
    use crate::preauth::fast::tests::test_armor;
    use crate::preauth::{CredentialSource, PreauthMechanism, RequestContext};
    use crate::proto::Name;
    use std::collections::BTreeMap;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    const ISSUER: &str = "https://issuer.example.com";
    const AUDIENCE: &str = "krbtgt/EXAMPLE.COM@EXAMPLE.COM";

    fn claims(expiry: SystemTime) -> TokenClaims {
        let mut attributes = BTreeMap::new();
        attributes.insert("groups".to_string(), serde_json::json!(["admins"]));
        TokenClaims {
            issuer: ISSUER.to_string(),
            subject: "alice".to_string(),
            audience: AUDIENCE.to_string(),
            expiry,
            attributes,
        }
    }

    fn verifier() -> Hs256TokenVerifier {
        Hs256TokenVerifier::new(ISSUER, AUDIENCE, b"secret")
    }

    #[test]
    fn signed_token_verifies() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let expected = claims(now + Duration::from_secs(600));
        let token = TokenEncoder::new(b"secret").encode(&expected).unwrap();

        assert_eq!(token.split('.').count(), 3);
        assert_eq!(verifier().verify(&token, now).unwrap(), expected);
    }

    #[test]
    fn rejected_tokens() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let valid = claims(now + Duration::from_secs(600));

        let forged = TokenEncoder::new(b"not the secret").encode(&valid).unwrap();
        assert!(matches!(
            verifier().verify(&forged, now),
            Err(KrbError::PreauthTokenInvalid)
        ));

        let expired = TokenEncoder::new(b"secret")
            .encode(&claims(now - Duration::from_secs(1)))
            .unwrap();
        assert!(matches!(
            verifier().verify(&expired, now),
            Err(KrbError::PreauthTokenExpired)
        ));

        let mut elsewhere = valid.clone();
        elsewhere.issuer = "https://evil.example.com".to_string();
        let elsewhere = TokenEncoder::new(b"secret").encode(&elsewhere).unwrap();
        assert!(matches!(
            verifier().verify(&elsewhere, now),
            Err(KrbError::PreauthTokenInvalid)
        ));

        let mut other_audience = valid;
        other_audience.audience = "host/pepper.example.com@EXAMPLE.COM".to_string();
        let other_audience = TokenEncoder::new(b"secret").encode(&other_audience).unwrap();
        assert!(matches!(
            verifier().verify(&other_audience, now),
            Err(KrbError::PreauthTokenInvalid)
        ));

        assert!(!verifier().verify_signature("not.a.jwt.at-all"));
        assert!(!verifier().verify_signature("garbage"));
    }

    fn context(armored: bool) -> RequestContext {
        RequestContext::new(
            Name::principal("alice", "EXAMPLE.COM"),
            Name::service_krbtgt("EXAMPLE.COM"),
            CredentialSource::Token("header.payload.sig".to_string()),
            EncryptionPolicy::default(),
            5,
            SystemTime::now(),
            Duration::from_secs(300),
            armored.then(test_armor),
        )
    }

    #[test]
    fn token_requires_fast() {
        let mech = TokenPreauth::default();
        let mut ctx = context(false);
        let mut mctx = mech.init_request_context(&ctx).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            mech.try_first(&mut ctx, &mut mctx, &mut out),
            Err(KrbError::PreauthFastRequired)
        ));
        assert!(out.is_empty());
        assert!(ctx.reply_key().is_none());
    }

    #[test]
    fn token_is_sent_inside_the_tunnel() {
        let mut mech = TokenPreauth::default();
        let config = EngineConfig {
            token_vendor: "example".to_string(),
            ..Default::default()
        };
        mech.init(&config).unwrap();

        let mut ctx = context(true);
        let mut mctx = mech.init_request_context(&ctx).unwrap();
        let mut out = Vec::new();
        mech.try_first(&mut ctx, &mut mctx, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pa_type(), Some(PaDataType::PaTokenRequest));
        assert_eq!(token_from_padata(&out[0]).unwrap(), "header.payload.sig");

        let armor_key = ctx.armor.as_ref().unwrap().armor_key().clone();
        assert_eq!(ctx.reply_key(), Some(&armor_key));
    }
}
