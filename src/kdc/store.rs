use crate::ap::KeySource;
use crate::asn1::constants::EncryptionType;
use crate::config::{Config, ServicePrincipal, UserPrincipal};
use crate::crypto::EncryptionKey;
use crate::error::KrbError;
use crate::proto::Name;
use bitmask_enum::bitmask;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, trace};

#[bitmask(u8)]
pub enum IdentityFlags {
    RequiresPreauth,
    AllowPkinit,
    AllowToken,
    Service,
    Disabled,
}

/// What the KDC knows about one principal: one long term key per encryption
/// type it may be issued under.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub keys: Vec<EncryptionKey>,
    pub kvno: u32,
    pub flags: IdentityFlags,
    pub expire_time: Option<SystemTime>,
    pub salt: String,
}

impl IdentityRecord {
    pub fn key(&self, etype: EncryptionType) -> Option<&EncryptionKey> {
        self.keys.iter().find(|key| key.etype() == etype)
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expire_time.is_some_and(|expiry| expiry <= now)
    }
}

pub trait IdentityStore: Send + Sync {
    fn lookup(&self, name: &Name) -> Option<IdentityRecord>;
}

/// Adapts a store so the AP validator can find service keys in it.
pub(crate) struct StoreKeys<'a>(pub(crate) &'a dyn IdentityStore);

impl KeySource for StoreKeys<'_> {
    fn key_for(
        &self,
        service: &Name,
        etype: EncryptionType,
        kvno: Option<u32>,
    ) -> Option<EncryptionKey> {
        let record = self.0.lookup(service)?;
        if kvno.is_some_and(|kvno| kvno != record.kvno) {
            trace!(%service, ?kvno, current = record.kvno, "ticket kvno is not current");
            return None;
        }
        record.key(etype).cloned()
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    principals: BTreeMap<Name, IdentityRecord>,
}

impl MemoryIdentityStore {
    pub fn insert(&mut self, name: Name, record: IdentityRecord) {
        self.principals.insert(name, record);
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn lookup(&self, name: &Name) -> Option<IdentityRecord> {
        self.principals.get(name).cloned()
    }
}

fn password_keys(
    etypes: &[EncryptionType],
    password: &str,
    salt: &str,
    kvno: u32,
) -> Result<Vec<EncryptionKey>, KrbError> {
    etypes
        .iter()
        .map(|etype| {
            EncryptionKey::from_password(*etype, password, salt, None)
                .map(|key| key.with_kvno(Some(kvno)))
        })
        .collect()
}

impl TryFrom<&Config> for MemoryIdentityStore {
    type Error = KrbError;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        let Config {
            realm,
            primary_key,
            primary_kvno,
            allow_anonymous,
            engine,
            user,
            service,
            ..
        } = config;
        let etypes = engine.policy.allowed();

        let mut store = MemoryIdentityStore::default();

        let krbtgt_key = EncryptionKey::new(
            EncryptionType::AES256_CTS_HMAC_SHA1_96,
            primary_key.clone(),
            Some(*primary_kvno),
        )
        .map_err(|err| {
            error!(?err, "primary key must be 32 bytes of aes256 key material");
            KrbError::ConfigInvalid
        })?;
        let krbtgt = Name::service_krbtgt(realm);
        store.insert(
            krbtgt.clone(),
            IdentityRecord {
                keys: vec![krbtgt_key],
                kvno: *primary_kvno,
                flags: IdentityFlags::Service,
                expire_time: None,
                salt: krbtgt.default_salt(),
            },
        );

        for UserPrincipal {
            name,
            password,
            kvno,
            require_preauth,
            allow_token,
            expire_time,
        } in user
        {
            let principal = Name::principal(name, realm);
            let salt = principal.default_salt();

            let mut flags = IdentityFlags::none();
            if *require_preauth {
                flags |= IdentityFlags::RequiresPreauth;
            }
            if *allow_token {
                flags |= IdentityFlags::AllowToken;
            }

            store.insert(
                principal,
                IdentityRecord {
                    keys: password_keys(etypes, password, &salt, *kvno)?,
                    kvno: *kvno,
                    flags,
                    expire_time: expire_time.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
                    salt,
                },
            );
        }

        // Nobody knows the anonymous keys; the reply key always comes from DH.
        if *allow_anonymous {
            let anonymous = Name::anonymous(realm);
            let keys = etypes
                .iter()
                .map(|etype| EncryptionKey::random(*etype).map(|key| key.with_kvno(Some(1))))
                .collect::<Result<Vec<_>, _>>()?;
            store.insert(
                anonymous.clone(),
                IdentityRecord {
                    keys,
                    kvno: 1,
                    flags: IdentityFlags::RequiresPreauth | IdentityFlags::AllowPkinit,
                    expire_time: None,
                    salt: anonymous.default_salt(),
                },
            );
        }

        for ServicePrincipal {
            hostname,
            srvname,
            password,
            kvno,
        } in service
        {
            let principal = Name::service(srvname, hostname, realm);
            let salt = principal.default_salt();
            store.insert(
                principal,
                IdentityRecord {
                    keys: password_keys(etypes, password, &salt, *kvno)?,
                    kvno: *kvno,
                    flags: IdentityFlags::Service,
                    expire_time: None,
                    salt,
                },
            );
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityFlags, IdentityStore, MemoryIdentityStore, StoreKeys};
    use crate::ap::KeySource;
    use crate::asn1::constants::EncryptionType;
    use crate::config::Config;
    use crate::error::KrbError;
    use crate::proto::Name;
    use std::time::{Duration, UNIX_EPOCH};

    const CONFIG: &str = r#"
realm = "EXAMPLE.COM"
address = "127.0.0.1:88"
primary_key = "0101010101010101010101010101010101010101010101010101010101010101"
primary_kvno = 3

[engine]
encryption_types = ["aes256-cts-hmac-sha1-96", "aes128-cts-hmac-sha1-96"]

[[user]]
name = "alice"
password = "password"
allow_token = true
expire_time = 1000

[[service]]
srvname = "host"
hostname = "pepper.example.com"
password = "service-password"
kvno = 2
"#;

    #[test]
    fn store_from_config() {
        let config = Config::from_toml(CONFIG).unwrap();
        let store = MemoryIdentityStore::try_from(&config).unwrap();

        let alice = store
            .lookup(&Name::principal("alice", "EXAMPLE.COM"))
            .unwrap();
        assert_eq!(alice.keys.len(), 2);
        assert_eq!(alice.salt, "EXAMPLE.COMalice");
        assert!(alice.flags.contains(IdentityFlags::RequiresPreauth));
        assert!(alice.flags.contains(IdentityFlags::AllowToken));
        assert!(!alice.flags.contains(IdentityFlags::AllowPkinit));
        assert!(alice.is_expired(UNIX_EPOCH + Duration::from_secs(1000)));
        assert!(!alice.is_expired(UNIX_EPOCH + Duration::from_secs(999)));

        let krbtgt = store.lookup(&Name::service_krbtgt("EXAMPLE.COM")).unwrap();
        assert_eq!(krbtgt.kvno, 3);
        assert_eq!(
            krbtgt.keys[0].etype(),
            EncryptionType::AES256_CTS_HMAC_SHA1_96
        );

        assert!(store.lookup(&Name::principal("mallory", "EXAMPLE.COM")).is_none());
        assert!(store.lookup(&Name::anonymous("EXAMPLE.COM")).is_none());
    }

    #[test]
    fn anonymous_principal_is_opt_in() {
        let config = Config::from_toml(&format!("allow_anonymous = true\n{CONFIG}")).unwrap();
        let store = MemoryIdentityStore::try_from(&config).unwrap();

        let anonymous = store.lookup(&Name::anonymous("EXAMPLE.COM")).unwrap();
        assert!(anonymous.flags.contains(IdentityFlags::AllowPkinit));
        assert!(anonymous.flags.contains(IdentityFlags::RequiresPreauth));
        assert_eq!(anonymous.keys.len(), 2);
    }

    #[test]
    fn service_keys_follow_kvno() {
        let config = Config::from_toml(CONFIG).unwrap();
        let store = MemoryIdentityStore::try_from(&config).unwrap();
        let keys = StoreKeys(&store);
        let host = Name::service("host", "pepper.example.com", "EXAMPLE.COM");

        let key = keys
            .key_for(&host, EncryptionType::AES128_CTS_HMAC_SHA1_96, Some(2))
            .unwrap();
        assert_eq!(key.kvno(), Some(2));
        assert!(keys
            .key_for(&host, EncryptionType::AES128_CTS_HMAC_SHA1_96, Some(1))
            .is_none());
        assert!(keys
            .key_for(&host, EncryptionType::RC4_HMAC, None)
            .is_none());
    }

    #[test]
    fn short_primary_key_is_rejected() {
        let config = Config::from_toml(
            r#"
realm = "EXAMPLE.COM"
address = "127.0.0.1:88"
primary_key = "0101"
"#,
        )
        .unwrap();
        assert!(matches!(
            MemoryIdentityStore::try_from(&config),
            Err(KrbError::ConfigInvalid)
        ));
    }
}
