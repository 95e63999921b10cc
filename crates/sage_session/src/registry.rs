//! Session registry: owns sessions, indexes them by id and by remote
//! DID, and expires them on a timer.
//!
//! One reader/writer lock guards both indices. Reads (`get`,
//! `get_by_did`, `list`) take shared access; every mutation — including
//! the sweeper's eviction pass — takes exclusive access, so handshake
//! updates and the sweep serialise against each other.
//!
//! The sweeper has an explicit start/stop lifecycle; nothing is left to
//! drop order. It holds only a Weak reference to the registry so a
//! forgotten `stop()` cannot keep the registry alive.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session::{Session, SessionStatus};

pub struct SessionRegistry {
    inner: RwLock<Inner>,
    ttl: Duration,
    sweeper: Mutex<Option<SweeperHandle>>,
}

struct Inner {
    by_id: HashMap<String, Session>,
    /// remote DID → session id; at most one current session per peer.
    by_did: HashMap<String, String>,
}

struct SweeperHandle {
    stop: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                by_did: HashMap::new(),
            }),
            ttl,
            sweeper: Mutex::new(None),
        }
    }

    /// Create a session towards `remote_did`, or return the existing one
    /// if it is still current (idempotent). An expired or closed entry
    /// is evicted first.
    pub fn create(&self, local_did: &str, remote_did: &str) -> Session {
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_did.get(remote_did).cloned() {
            match inner.by_id.get(&id) {
                Some(existing)
                    if !existing.is_expired() && existing.status != SessionStatus::Closed =>
                {
                    return existing.clone();
                }
                _ => {
                    inner.by_id.remove(&id);
                    inner.by_did.remove(remote_did);
                }
            }
        }
        let session = Session::new(local_did, remote_did, self.ttl);
        inner.by_did.insert(remote_did.to_string(), session.id.clone());
        inner.by_id.insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, remote_did, "session created");
        session
    }

    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        let inner = self.inner.read();
        let session = inner.by_id.get(id).ok_or_else(|| SessionError::NotFound {
            id: id.to_string(),
        })?;
        if session.is_expired() {
            return Err(SessionError::Expired {
                id: session.id.clone(),
                expires_at: session.expires_at,
            });
        }
        Ok(session.clone())
    }

    pub fn get_by_did(&self, remote_did: &str) -> Result<Session, SessionError> {
        let inner = self.inner.read();
        let id = inner
            .by_did
            .get(remote_did)
            .ok_or_else(|| SessionError::NotFoundForDid {
                did: remote_did.to_string(),
            })?;
        let session = inner.by_id.get(id).ok_or_else(|| SessionError::NotFound {
            id: id.clone(),
        })?;
        if session.is_expired() {
            return Err(SessionError::Expired {
                id: session.id.clone(),
                expires_at: session.expires_at,
            });
        }
        Ok(session.clone())
    }

    /// Install a mutated working copy back into the registry.
    pub fn update(&self, mut session: Session) -> Result<(), SessionError> {
        let mut inner = self.inner.write();
        if !inner.by_id.contains_key(&session.id) {
            return Err(SessionError::NotFound {
                id: session.id.clone(),
            });
        }
        session.touch();
        inner.by_id.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.write();
        let session = inner.by_id.remove(id).ok_or_else(|| SessionError::NotFound {
            id: id.to_string(),
        })?;
        if inner.by_did.get(&session.remote_did).map(String::as_str) == Some(id) {
            inner.by_did.remove(&session.remote_did);
        }
        Ok(())
    }

    /// All non-expired sessions.
    pub fn list(&self) -> Vec<Session> {
        let inner = self.inner.read();
        inner
            .by_id
            .values()
            .filter(|s| !s.is_expired())
            .cloned()
            .collect()
    }

    /// Evict every session past its expiry or already marked Expired.
    /// Returns the number evicted.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.write();
        let doomed: Vec<String> = inner
            .by_id
            .values()
            .filter(|s| s.is_expired())
            .map(|s| s.id.clone())
            .collect();
        for id in &doomed {
            if let Some(session) = inner.by_id.remove(id) {
                if inner.by_did.get(&session.remote_did).map(String::as_str)
                    == Some(id.as_str())
                {
                    inner.by_did.remove(&session.remote_did);
                }
            }
        }
        doomed.len()
    }

    /// Start the background expiry sweep. A second call while one is
    /// running is a no-op.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        let stop = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        });
        let weak: Weak<SessionRegistry> = Arc::downgrade(self);
        let stop_for_thread = stop.clone();
        let spawned = std::thread::Builder::new()
            .name("sage-session-sweeper".into())
            .spawn(move || {
                debug!(interval_secs = interval.as_secs(), "session sweeper started");
                loop {
                    {
                        let mut stopped = stop_for_thread.stopped.lock();
                        if *stopped {
                            break;
                        }
                        stop_for_thread.condvar.wait_for(&mut stopped, interval);
                        if *stopped {
                            break;
                        }
                    }
                    match weak.upgrade() {
                        Some(registry) => {
                            let evicted = registry.cleanup();
                            if evicted > 0 {
                                info!(evicted, "expired sessions evicted");
                            }
                        }
                        None => break,
                    }
                }
                debug!("session sweeper stopped");
            });
        match spawned {
            Ok(thread) => *slot = Some(SweeperHandle { stop, thread }),
            Err(e) => warn!(error = %e, "failed to spawn sweeper; expiry falls back to cleanup()"),
        }
    }

    /// Stop the sweeper and wait for it to exit. Safe to call twice.
    pub fn stop(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            *handle.stop.stopped.lock() = true;
            handle.stop.condvar.notify_all();
            let _ = handle.thread.join();
        }
    }
}
