//! Thread-safe store of live sessions and their binding graph.
//!
//! Both identifier indexes and every session's binding set live behind one
//! reader/writer lock: multi-entry mutations (bind, unbind, purge) hold the
//! write side for their whole duration, so the binding-symmetry invariant is
//! never observable in a broken state. Sends clone the target's outbound
//! queue handle under the read lock and enqueue after releasing it; the
//! per-session writer task is the only socket writer, which keeps writes to
//! one transport serialized.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use pulselink_core::{ClientRole, Event, InsecureId, RelayError, SecureId};

/// Snapshot of a bound peer, resolved under the lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub secure_id: SecureId,
    pub role: ClientRole,
}

struct SessionEntry {
    role: ClientRole,
    secure_id: SecureId,
    insecure_id: InsecureId,
    bindings: HashSet<SecureId>,
    /// Feeds the session's socket writer task; absent for request-response
    /// sessions.
    outbound: Option<mpsc::Sender<String>>,
    /// Unix seconds of the last observed heartbeat (or creation).
    last_seen: AtomicU64,
}

impl SessionEntry {
    fn peer(&self) -> Peer {
        Peer {
            secure_id: self.secure_id.clone(),
            role: self.role,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    by_secure: HashMap<SecureId, SessionEntry>,
    by_insecure: HashMap<InsecureId, SecureId>,
}

/// Registry of all live sessions.
pub struct ClientRegistry {
    inner: RwLock<RegistryInner>,
    send_queue: usize,
}

impl ClientRegistry {
    pub fn new(send_queue: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            send_queue,
        }
    }

    /// Create a session backed by a duplex transport. Returns the minted
    /// secure ID and the receiving end of the session's outbound queue.
    ///
    /// With `reject_duplicate`, an existing session under the same insecure
    /// ID denies the registration; the check and the insert happen under one
    /// write lock.
    pub fn new_streaming_session(
        &self,
        role: ClientRole,
        insecure_id: InsecureId,
        reject_duplicate: bool,
    ) -> Result<(SecureId, mpsc::Receiver<String>), RelayError> {
        let mut inner = self.inner.write();
        self.check_duplicate(&inner, &insecure_id, reject_duplicate)?;
        let (tx, rx) = mpsc::channel(self.send_queue);
        let secure_id = Self::insert_session(&mut inner, role, insecure_id, Some(tx));
        Ok((secure_id, rx))
    }

    /// Create a session with no live transport (single-request HTTP client).
    pub fn new_request_response_session(
        &self,
        insecure_id: InsecureId,
        reject_duplicate: bool,
    ) -> Result<SecureId, RelayError> {
        let mut inner = self.inner.write();
        self.check_duplicate(&inner, &insecure_id, reject_duplicate)?;
        Ok(Self::insert_session(
            &mut inner,
            ClientRole::ThirdPartyRequestResponse,
            insecure_id,
            None,
        ))
    }

    fn check_duplicate(
        &self,
        inner: &RegistryInner,
        insecure_id: &InsecureId,
        reject_duplicate: bool,
    ) -> Result<(), RelayError> {
        if reject_duplicate && inner.by_insecure.contains_key(insecure_id) {
            return Err(RelayError::RegistrationDenied(
                "insecure client IDs are enabled and your address is already registered"
                    .to_owned(),
            ));
        }
        Ok(())
    }

    fn insert_session(
        inner: &mut RegistryInner,
        role: ClientRole,
        insecure_id: InsecureId,
        outbound: Option<mpsc::Sender<String>>,
    ) -> SecureId {
        let secure_id = SecureId::mint();
        inner
            .by_insecure
            .insert(insecure_id.clone(), secure_id.clone());
        inner.by_secure.insert(
            secure_id.clone(),
            SessionEntry {
                role,
                secure_id: secure_id.clone(),
                insecure_id,
                bindings: HashSet::new(),
                outbound,
                last_seen: AtomicU64::new(now_secs()),
            },
        );
        secure_id
    }

    pub fn lookup_by_secure(&self, id: &SecureId) -> Result<Peer, RelayError> {
        let inner = self.inner.read();
        inner
            .by_secure
            .get(id)
            .map(SessionEntry::peer)
            .ok_or_else(|| RelayError::UnknownClient(id.to_string()))
    }

    pub fn lookup_by_insecure(&self, id: &InsecureId) -> Result<Peer, RelayError> {
        let inner = self.inner.read();
        inner
            .by_insecure
            .get(id)
            .and_then(|secure_id| inner.by_secure.get(secure_id))
            .map(SessionEntry::peer)
            .ok_or_else(|| RelayError::UnknownClient(id.to_string()))
    }

    /// Pair an app with a third party. Symmetric; a second call for the same
    /// pair fails rather than no-ops.
    pub fn bind(&self, app_id: &SecureId, third_party_id: &SecureId) -> Result<(), RelayError> {
        let mut inner = self.inner.write();
        if app_id == third_party_id {
            return Err(RelayError::BindViolation(
                "a session cannot be bound to itself".to_owned(),
            ));
        }
        let app = inner
            .by_secure
            .get(app_id)
            .ok_or_else(|| RelayError::UnknownClient(app_id.to_string()))?;
        if app.role != ClientRole::AppClient {
            return Err(RelayError::BindViolation(format!(
                "{app_id} is not an app session"
            )));
        }
        let third_party = inner
            .by_secure
            .get(third_party_id)
            .ok_or_else(|| RelayError::UnknownClient(third_party_id.to_string()))?;
        if !third_party.role.is_third_party() {
            return Err(RelayError::BindViolation(format!(
                "{third_party_id} is not a third-party session"
            )));
        }
        if app.bindings.contains(third_party_id) {
            return Err(RelayError::BindViolation(format!(
                "{app_id} and {third_party_id} are already bound"
            )));
        }

        if let Some(app) = inner.by_secure.get_mut(app_id) {
            app.bindings.insert(third_party_id.clone());
        }
        if let Some(third_party) = inner.by_secure.get_mut(third_party_id) {
            third_party.bindings.insert(app_id.clone());
        }
        Ok(())
    }

    /// Drop every binding the session participates in, on both sides.
    pub fn unbind_all(&self, id: &SecureId) -> Result<(), RelayError> {
        let mut inner = self.inner.write();
        Self::unbind_all_locked(&mut inner, id)
    }

    fn unbind_all_locked(inner: &mut RegistryInner, id: &SecureId) -> Result<(), RelayError> {
        let bindings = {
            let entry = inner
                .by_secure
                .get_mut(id)
                .ok_or_else(|| RelayError::UnknownClient(id.to_string()))?;
            std::mem::take(&mut entry.bindings)
        };
        for peer_id in &bindings {
            if let Some(peer) = inner.by_secure.get_mut(peer_id) {
                peer.bindings.remove(id);
            } else {
                tracing::warn!(peer = %peer_id, "bound peer missing during unbind");
            }
        }
        Ok(())
    }

    /// Resolve the session's current peers.
    pub fn peers_of(&self, id: &SecureId) -> Result<Vec<Peer>, RelayError> {
        let inner = self.inner.read();
        let entry = inner
            .by_secure
            .get(id)
            .ok_or_else(|| RelayError::UnknownClient(id.to_string()))?;
        let mut peers = Vec::with_capacity(entry.bindings.len());
        for peer_id in &entry.bindings {
            match inner.by_secure.get(peer_id) {
                Some(peer) => peers.push(peer.peer()),
                None => tracing::warn!(peer = %peer_id, "bound peer missing from registry"),
            }
        }
        Ok(peers)
    }

    /// Remove the session registered under this insecure ID, dropping its
    /// bindings on both sides.
    pub fn purge(&self, insecure_id: &InsecureId) {
        let mut inner = self.inner.write();
        let Some(secure_id) = inner.by_insecure.get(insecure_id).cloned() else {
            tracing::warn!(insecure_id = %insecure_id, "purge: no session for insecure id");
            return;
        };
        Self::remove_locked(&mut inner, &secure_id);
    }

    fn remove_locked(inner: &mut RegistryInner, secure_id: &SecureId) {
        if Self::unbind_all_locked(inner, secure_id).is_err() {
            return;
        }
        let Some(entry) = inner.by_secure.remove(secure_id) else {
            return;
        };
        // The insecure index may have been re-pointed by a later registration.
        if inner.by_insecure.get(&entry.insecure_id) == Some(secure_id) {
            inner.by_insecure.remove(&entry.insecure_id);
        }
        tracing::info!(client_id = %secure_id, role = entry.role.label(), "session purged");
    }

    /// Record a heartbeat from this session.
    pub fn touch(&self, id: &SecureId) {
        let inner = self.inner.read();
        if let Some(entry) = inner.by_secure.get(id) {
            entry.last_seen.store(now_secs(), Ordering::Relaxed);
        }
    }

    /// Remove request-response sessions whose last heartbeat is older than
    /// the TTL. Streaming sessions are torn down by their read loops instead.
    pub fn purge_idle_request_response(&self, ttl: Duration) -> usize {
        let now = now_secs();
        let mut inner = self.inner.write();
        let expired: Vec<SecureId> = inner
            .by_secure
            .values()
            .filter(|entry| {
                entry.role == ClientRole::ThirdPartyRequestResponse
                    && now.saturating_sub(entry.last_seen.load(Ordering::Relaxed))
                        >= ttl.as_secs()
            })
            .map(|entry| entry.secure_id.clone())
            .collect();
        for id in &expired {
            tracing::info!(client_id = %id, "purging idle request-response session");
            Self::remove_locked(&mut inner, id);
        }
        expired.len()
    }

    /// Serialize the event and enqueue it on the target's outbound queue.
    pub fn send(&self, id: &SecureId, event: &Event) -> Result<(), RelayError> {
        let json = event.encode()?.to_json()?;
        let tx = {
            let inner = self.inner.read();
            let entry = inner
                .by_secure
                .get(id)
                .ok_or_else(|| RelayError::SessionGone(id.to_string()))?;
            entry.outbound.clone().ok_or_else(|| {
                RelayError::TransportError("session has no live transport".to_owned())
            })?
        };
        match tx.try_send(json) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(RelayError::TransportError("send queue full".to_owned()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(RelayError::SessionGone(id.to_string()))
            }
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.read().by_secure.len()
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen_for_test(&self, id: &SecureId, secs: u64) {
        let inner = self.inner.read();
        if let Some(entry) = inner.by_secure.get(id) {
            entry.last_seen.store(secs, Ordering::Relaxed);
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
