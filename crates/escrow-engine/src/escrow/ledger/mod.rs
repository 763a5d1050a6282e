//! Durable storage for escrow transactions and their timelines.
//!
//! `append_event_and_set_status` is the only mutation available after creation. It is a
//! compare-and-set on the stored status: callers pass the status they read and lose with
//! [`LedgerError::Conflict`] if another writer got there first.

mod file;
mod memory;
mod table;

pub use file::FileLedger;
pub use memory::InMemoryLedger;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{
    EscrowStatus, EscrowTransaction, InvariantViolation, PartyId, ProjectId, TimelineEvent,
    TransactionId, UnreconciledSettlement,
};

/// Storage abstraction so the state machine can be exercised against any backend.
pub trait LedgerStore: Send + Sync {
    fn create(&self, transaction: EscrowTransaction) -> Result<EscrowTransaction, LedgerError>;
    fn get_by_id(&self, id: &TransactionId) -> Result<Option<EscrowTransaction>, LedgerError>;
    fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<EscrowTransaction>, LedgerError>;
    /// Atomically set status, stamp the matching timestamp, and append the event.
    fn append_event_and_set_status(
        &self,
        id: &TransactionId,
        change: StatusChange,
    ) -> Result<EscrowTransaction, LedgerError>;
    fn query(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError>;
    /// Attach a settlement that moved money without its transition committing. Status and
    /// timeline are left alone; a no-op when the transition it belongs to already committed.
    fn record_unreconciled(
        &self,
        id: &TransactionId,
        settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError>;
}

/// Write request for a single transition.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub expected: EscrowStatus,
    pub next: EscrowStatus,
    pub event: TimelineEvent,
}

/// Date window, `from` inclusive and `to` exclusive. Listings apply it to the creation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Period {
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day < to)
    }
}

/// Read-side filter shared by listings and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub status: Option<EscrowStatus>,
    pub client_id: Option<PartyId>,
    pub agent_id: Option<PartyId>,
    pub period: Option<Period>,
}

impl LedgerFilter {
    pub fn with_status(status: EscrowStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, transaction: &EscrowTransaction) -> bool {
        self.status.map_or(true, |status| transaction.status == status)
            && self
                .client_id
                .as_ref()
                .map_or(true, |client| &transaction.client_id == client)
            && self
                .agent_id
                .as_ref()
                .map_or(true, |agent| &transaction.agent_id == agent)
            && self
                .period
                .map_or(true, |period| period.contains(transaction.created_at.date_naive()))
    }
}

/// Error enumeration for ledger failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("transaction {0} already exists")]
    Duplicate(TransactionId),
    #[error("project {0} already has an escrow transaction")]
    ProjectAlreadyEscrowed(ProjectId),
    #[error("transaction {0} not found")]
    NotFound(TransactionId),
    #[error("transaction {id} is {actual}, expected {expected}")]
    Conflict {
        id: TransactionId,
        expected: EscrowStatus,
        actual: EscrowStatus,
    },
    #[error("transaction {id} violates ledger invariants: {violation}")]
    Corrupt {
        id: TransactionId,
        violation: InvariantViolation,
    },
    #[error("ledger file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}
