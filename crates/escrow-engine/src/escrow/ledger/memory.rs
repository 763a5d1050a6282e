use std::sync::{Mutex, MutexGuard};

use super::table::LedgerTable;
use super::{LedgerError, LedgerFilter, LedgerStore, StatusChange};
use crate::escrow::domain::{
    EscrowTransaction, ProjectId, TransactionId, UnreconciledSettlement,
};

/// Process-local ledger. The mutex is the per-write serialization point.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    table: Mutex<LedgerTable>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, LedgerTable>, LedgerError> {
        self.table
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }
}

impl LedgerStore for InMemoryLedger {
    fn create(&self, transaction: EscrowTransaction) -> Result<EscrowTransaction, LedgerError> {
        self.table()?.insert(transaction)
    }

    fn get_by_id(&self, id: &TransactionId) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.table()?.get(id)
    }

    fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.table()?.find_by_project(project_id)
    }

    fn append_event_and_set_status(
        &self,
        id: &TransactionId,
        change: StatusChange,
    ) -> Result<EscrowTransaction, LedgerError> {
        self.table()?.apply(id, change)
    }

    fn query(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError> {
        self.table()?.query(filter)
    }

    fn record_unreconciled(
        &self,
        id: &TransactionId,
        settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError> {
        self.table()?.note_unreconciled(id, settlement)
    }
}
