//! File configuration for the KDC daemon and the client engine.

use crate::constants::{
    DEFAULT_CLOCK_SKEW, DEFAULT_RENEW_LIFETIME, DEFAULT_TICKET_LIFETIME,
    DEFAULT_TRANSPORT_TIMEOUT,
};
use crate::crypto::dh::DhGroup;
use crate::crypto::EncryptionPolicy;
use crate::error::KrbError;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::error;

fn default_kvno() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_clock_skew() -> Duration {
    DEFAULT_CLOCK_SKEW
}

fn default_ticket_lifetime() -> Duration {
    DEFAULT_TICKET_LIFETIME
}

fn default_renew_lifetime() -> Duration {
    DEFAULT_RENEW_LIFETIME
}

fn default_transport_timeout() -> Duration {
    DEFAULT_TRANSPORT_TIMEOUT
}

fn default_token_vendor() -> String {
    "vendor".to_string()
}

fn default_pkinit_group() -> DhGroup {
    DhGroup::Modp14
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Settings shared by the exchange engine on both sides. Every preauth
/// mechanism is initialised from this before first use.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default, rename = "encryption_types")]
    pub policy: EncryptionPolicy,
    #[serde(
        default = "default_clock_skew",
        deserialize_with = "deserialize_secs",
        rename = "clock_skew_secs"
    )]
    pub clock_skew: Duration,
    #[serde(
        default = "default_ticket_lifetime",
        deserialize_with = "deserialize_secs",
        rename = "ticket_lifetime_secs"
    )]
    pub ticket_lifetime: Duration,
    #[serde(
        default = "default_renew_lifetime",
        deserialize_with = "deserialize_secs",
        rename = "renew_lifetime_secs"
    )]
    pub renew_lifetime: Duration,
    #[serde(
        default = "default_transport_timeout",
        deserialize_with = "deserialize_secs",
        rename = "transport_timeout_secs"
    )]
    pub transport_timeout: Duration,
    #[serde(default = "default_token_vendor")]
    pub token_vendor: String,
    #[serde(default = "default_pkinit_group")]
    pub pkinit_group: DhGroup,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            policy: EncryptionPolicy::default(),
            clock_skew: DEFAULT_CLOCK_SKEW,
            ticket_lifetime: DEFAULT_TICKET_LIFETIME,
            renew_lifetime: DEFAULT_RENEW_LIFETIME,
            transport_timeout: DEFAULT_TRANSPORT_TIMEOUT,
            token_vendor: default_token_vendor(),
            pkinit_group: default_pkinit_group(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UserPrincipal {
    pub name: String,
    pub password: String,
    #[serde(default = "default_kvno")]
    pub kvno: u32,
    #[serde(default = "default_true")]
    pub require_preauth: bool,
    #[serde(default)]
    pub allow_token: bool,
    /// Seconds since the epoch after which the principal can no longer
    /// authenticate.
    #[serde(default)]
    pub expire_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ServicePrincipal {
    pub hostname: String,
    pub srvname: String,
    pub password: String,
    #[serde(default = "default_kvno")]
    pub kvno: u32,
}

/// Tokens are HS256 JWTs signed with a secret shared with the issuer.
#[derive(Debug, Deserialize)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    #[serde(deserialize_with = "hex::serde::deserialize")]
    pub secret: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub realm: String,
    pub address: String,
    #[serde(deserialize_with = "hex::serde::deserialize")]
    pub primary_key: Vec<u8>,
    #[serde(default = "default_kvno")]
    pub primary_kvno: u32,
    /// Refuse unarmored AS requests.
    #[serde(default)]
    pub require_fast: bool,
    /// Answer unsigned PKINIT for `WELLKNOWN/ANONYMOUS` with anonymous TGTs.
    #[serde(default)]
    pub allow_anonymous: bool,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub user: Vec<UserPrincipal>,
    #[serde(default)]
    pub service: Vec<ServicePrincipal>,
    pub token: Option<TokenConfig>,
}

impl Config {
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, KrbError> {
        let contents = fs::read_to_string(&path)?;
        Config::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Config, KrbError> {
        toml::from_str(contents).map_err(|err| {
            error!(?err, "unable to parse configuration");
            KrbError::ConfigInvalid
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, EngineConfig};
    use crate::asn1::constants::EncryptionType;
    use crate::crypto::dh::DhGroup;
    use crate::error::KrbError;
    use std::io::Write;
    use std::time::Duration;

    const EXAMPLE: &str = r#"
realm = "EXAMPLE.COM"
address = "127.0.0.1:55000"
primary_key = "0101010101010101010101010101010101010101010101010101010101010101"
allow_anonymous = true

[engine]
encryption_types = ["aes256-cts-hmac-sha1-96", "des3-cbc-sha1-kd"]
clock_skew_secs = 120
pkinit_group = 2

[[user]]
name = "alice"
password = "password"
allow_token = true

[[user]]
name = "bob"
password = "hunter2"
kvno = 4
require_preauth = false

[[service]]
srvname = "host"
hostname = "pepper.example.com"
password = "service-password"

[token]
issuer = "https://issuer.example.com"
audience = "krbtgt/EXAMPLE.COM@EXAMPLE.COM"
secret = "736563726574"
"#;

    #[test]
    fn parse_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let config = Config::parse(file.path()).unwrap();
        assert_eq!(config.realm, "EXAMPLE.COM");
        assert_eq!(config.primary_key, vec![1u8; 32]);
        assert_eq!(config.primary_kvno, 1);
        assert!(!config.require_fast);
        assert!(config.allow_anonymous);

        assert_eq!(
            config.engine.policy.allowed(),
            &[
                EncryptionType::AES256_CTS_HMAC_SHA1_96,
                EncryptionType::DES3_CBC_SHA1_KD
            ]
        );
        assert_eq!(config.engine.clock_skew, Duration::from_secs(120));
        assert_eq!(config.engine.ticket_lifetime, Duration::from_secs(8 * 3600));
        assert_eq!(config.engine.pkinit_group, DhGroup::Modp2);
        assert_eq!(config.engine.token_vendor, "vendor");

        assert_eq!(config.user.len(), 2);
        assert!(config.user[0].require_preauth);
        assert!(config.user[0].allow_token);
        assert!(!config.user[1].require_preauth);
        assert_eq!(config.user[1].kvno, 4);
        assert_eq!(config.service[0].kvno, 1);

        let token = config.token.unwrap();
        assert_eq!(token.secret, b"secret");
    }

    #[test]
    fn engine_defaults() {
        let config = Config::from_toml(
            r#"
realm = "EXAMPLE.COM"
address = "127.0.0.1:88"
primary_key = "00"
"#,
        )
        .unwrap();

        let defaults = EngineConfig::default();
        assert_eq!(config.engine.policy, defaults.policy);
        assert_eq!(config.engine.clock_skew, Duration::from_secs(300));
        assert_eq!(config.engine.pkinit_group, DhGroup::Modp14);
        assert!(config.user.is_empty());
        assert!(config.token.is_none());
    }

    #[test]
    fn invalid_configuration() {
        // Not hex.
        assert!(matches!(
            Config::from_toml(
                r#"
realm = "EXAMPLE.COM"
address = "127.0.0.1:88"
primary_key = "zz"
"#
            ),
            Err(KrbError::ConfigInvalid)
        ));

        // Unknown encryption type.
        assert!(matches!(
            Config::from_toml(
                r#"
realm = "EXAMPLE.COM"
address = "127.0.0.1:88"
primary_key = "00"

[engine]
encryption_types = ["des-cbc-crc"]
"#
            ),
            Err(KrbError::ConfigInvalid)
        ));

        assert!(matches!(
            Config::parse("/nonexistent/kerbex.toml"),
            Err(KrbError::IoError(_))
        ));
    }
}
