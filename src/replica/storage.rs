use crate::replica::write_ahead_log::LogEntry;
use crate::replica::{ReplicaId, Term};
use std::io;
use std::sync::{Arc, Mutex};

/// DurableState is everything a replica must get back after a restart to stay safe.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DurableState {
    pub current_term: Term,
    pub voted_for: Option<ReplicaId>,
    pub log: Vec<LogEntry>,
}

/// Storage is the durability collaborator for a replica's persistent state.
///
/// `save_state()` is called synchronously, and must have durably stored the given values before it
/// returns `Ok`. The replica will not send any reply or grant any vote that depends on the new
/// values until it does.
pub trait Storage: Send + 'static {
    /// Called once at startup. `None` means this replica has never saved anything.
    fn load_state(&mut self) -> Result<Option<DurableState>, io::Error>;

    fn save_state(&mut self, current_term: Term, voted_for: Option<&ReplicaId>, log: &[LogEntry])
        -> Result<(), io::Error>;
}

/// InMemoryStorage keeps state in RAM. Clones share the same underlying state, so a test can
/// hand one clone to a replica, drop the replica, and start a new one from the other clone to
/// model a restart.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<Mutex<Option<DurableState>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of whatever was last saved.
    pub fn snapshot(&self) -> Option<DurableState> {
        self.state.lock().ok().and_then(|guard| guard.clone())
    }

    fn poisoned() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "InMemoryStorage mutex poisoned")
    }
}

impl Storage for InMemoryStorage {
    fn load_state(&mut self) -> Result<Option<DurableState>, io::Error> {
        let guard = self.state.lock().map_err(|_| Self::poisoned())?;
        Ok(guard.clone())
    }

    fn save_state(
        &mut self,
        current_term: Term,
        voted_for: Option<&ReplicaId>,
        log: &[LogEntry],
    ) -> Result<(), io::Error> {
        let mut guard = self.state.lock().map_err(|_| Self::poisoned())?;
        guard.replace(DurableState {
            current_term,
            voted_for: voted_for.cloned(),
            log: log.to_vec(),
        });
        Ok(())
    }
}
