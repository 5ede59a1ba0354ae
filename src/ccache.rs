//! Where a client keeps the tickets it has been issued.

use crate::error::KrbError;
use crate::proto::{Name, Ticket};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, error};

pub trait CredentialCache: Send + Sync {
    /// Keep `ticket`, replacing any earlier ticket for the same service.
    fn store(&self, ticket: &Ticket) -> Result<(), KrbError>;

    /// A ticket for `service` that is valid now.
    fn load(&self, service: &Name) -> Option<Ticket>;
}

/// A cache for one client principal, held in memory. The principal is fixed
/// by the first ticket stored.
#[derive(Debug, Default)]
pub struct MemoryCredentialCache {
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    primary: Option<Name>,
    tickets: HashMap<Name, Ticket>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(&self) -> Option<Name> {
        self.lock().primary.clone()
    }

    /// Drop every ticket that has expired by `now`.
    pub fn purge_expired(&self, now: SystemTime) {
        let mut inner = self.lock();
        let before = inner.tickets.len();
        inner.tickets.retain(|_, ticket| ticket.end_time() > now);
        debug!(purged = before - inner.tickets.len(), "purged expired tickets");
    }

    pub fn len(&self) -> usize {
        self.lock().tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn store(&self, ticket: &Ticket) -> Result<(), KrbError> {
        let mut inner = self.lock();
        match inner.primary.as_ref() {
            Some(primary) if primary != ticket.client() => {
                error!(%primary, client = %ticket.client(), "ticket is for another principal");
                return Err(KrbError::ReplyNameMismatch);
            }
            Some(_) => {}
            None => inner.primary = Some(ticket.client().clone()),
        }
        inner
            .tickets
            .insert(ticket.service().clone(), ticket.clone());
        Ok(())
    }

    fn load(&self, service: &Name) -> Option<Ticket> {
        let now = SystemTime::now();
        self.lock()
            .tickets
            .get(service)
            .filter(|ticket| ticket.is_valid_at(now))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{CredentialCache, MemoryCredentialCache};
    use crate::asn1::constants::EncryptionType;
    use crate::asn1::ticket_flags::TicketFlags;
    use crate::crypto::EncryptionKey;
    use crate::error::KrbError;
    use crate::proto::{Name, Ticket, TicketPart};
    use std::time::{Duration, SystemTime};

    fn ticket(client: &str, service: Name, start: SystemTime, life: Duration) -> Ticket {
        let key = EncryptionKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![1; 32], None)
            .unwrap();
        let part = TicketPart {
            flags: TicketFlags::none(),
            key: key.clone(),
            client: Name::principal(client, "EXAMPLE.COM"),
            auth_time: start,
            start_time: start,
            end_time: start + life,
            renew_until: None,
        };
        let enc_ticket = part.seal(service, &key).unwrap();
        part.into_ticket(enc_ticket)
    }

    #[test]
    fn store_and_load() {
        let cache = MemoryCredentialCache::new();
        let now = SystemTime::now();
        let krbtgt = Name::service_krbtgt("EXAMPLE.COM");
        let host = Name::service("host", "pepper.example.com", "EXAMPLE.COM");

        cache
            .store(&ticket("alice", krbtgt.clone(), now, Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(cache.primary(), Some(Name::principal("alice", "EXAMPLE.COM")));
        assert!(cache.load(&krbtgt).is_some());
        assert!(cache.load(&host).is_none());

        let err = cache
            .store(&ticket("bob", host.clone(), now, Duration::from_secs(3600)))
            .unwrap_err();
        assert!(matches!(err, KrbError::ReplyNameMismatch));
    }

    #[test]
    fn expired_tickets_are_not_loaded() {
        let cache = MemoryCredentialCache::new();
        let krbtgt = Name::service_krbtgt("EXAMPLE.COM");
        let long_ago = SystemTime::now() - Duration::from_secs(7200);

        cache
            .store(&ticket("alice", krbtgt.clone(), long_ago, Duration::from_secs(3600)))
            .unwrap();
        assert!(cache.load(&krbtgt).is_none());
        assert_eq!(cache.len(), 1);

        cache.purge_expired(SystemTime::now());
        assert!(cache.is_empty());
    }
}
