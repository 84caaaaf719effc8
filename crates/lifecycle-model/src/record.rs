//! Machine records and their append-only state history

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::MachineState;

/// Which kind of machine a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    /// A single compute node
    Host,
    /// A failure domain (rack) grouping hosts
    Domain,
}

impl MachineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineKind::Host => "host",
            MachineKind::Domain => "domain",
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a machine's state history. Never edited once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStateRecord {
    pub state: MachineState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl MachineStateRecord {
    pub fn new(state: MachineState, timestamp: DateTime<Utc>) -> Self {
        Self {
            state,
            timestamp,
            message: None,
            user: None,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }
}

/// A host or domain with its full state history.
///
/// The history is never empty; the current state is always its last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub kind: MachineKind,

    /// Containing domain (hosts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,

    /// Network address the host offered from (hosts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// When the machine last offered capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "non_empty_history")]
    history: Vec<MachineStateRecord>,
}

fn non_empty_history<'de, D>(deserializer: D) -> Result<Vec<MachineStateRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let history = Vec::<MachineStateRecord>::deserialize(deserializer)?;
    if history.is_empty() {
        return Err(serde::de::Error::custom("machine history must not be empty"));
    }
    Ok(history)
}

impl Machine {
    /// Create a machine whose history starts with `initial`.
    pub fn new(id: impl Into<String>, kind: MachineKind, initial: MachineStateRecord) -> Self {
        Self {
            id: id.into(),
            kind,
            domain_id: None,
            address: None,
            last_seen_at: None,
            history: vec![initial],
        }
    }

    /// Create a host in `domain_id`.
    pub fn host(
        id: impl Into<String>,
        domain_id: impl Into<String>,
        initial: MachineStateRecord,
    ) -> Self {
        let mut machine = Self::new(id, MachineKind::Host, initial);
        machine.domain_id = Some(domain_id.into());
        machine
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// The most recent history entry.
    pub fn current_state(&self) -> &MachineStateRecord {
        // The constructor seeds one entry and nothing removes entries.
        &self.history[self.history.len() - 1]
    }

    pub fn state(&self) -> MachineState {
        self.current_state().state
    }

    /// Full history, oldest first.
    pub fn history(&self) -> &[MachineStateRecord] {
        &self.history
    }

    /// Compare-and-set token: the number of recorded states.
    pub fn version(&self) -> u64 {
        self.history.len() as u64
    }

    /// Return a copy with `record` appended.
    pub fn changed(&self, record: MachineStateRecord) -> Self {
        let mut next = self.clone();
        next.history.push(record);
        next
    }

    /// User attached to the request that started the current decommission,
    /// if any.
    pub fn decommission_requester(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .take_while(|record| record.state.is_decommissioning())
            .filter(|record| record.state == MachineState::StartingDecommission)
            .find_map(|record| record.user.as_deref())
    }
}
