use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::table::{LedgerSnapshot, LedgerTable};
use super::{LedgerError, LedgerFilter, LedgerStore, StatusChange};
use crate::escrow::domain::{
    EscrowTransaction, ProjectId, TransactionId, UnreconciledSettlement,
};

/// Ledger persisted as a JSON snapshot, rewritten through a temp file and rename after
/// every successful mutation. A failed write leaves both disk and memory unchanged.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    table: Mutex<LedgerTable>,
}

impl FileLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let bytes = fs::read(&path).map_err(|source| io_error(&path, source))?;
            let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
            let table = LedgerTable::from_snapshot(snapshot)?;
            info!(path = %path.display(), "escrow ledger loaded");
            table
        } else {
            LedgerTable::default()
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> Result<MutexGuard<'_, LedgerTable>, LedgerError> {
        self.table
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }

    fn persist(&self, table: &LedgerTable) -> Result<(), LedgerError> {
        let encoded = serde_json::to_vec_pretty(&table.snapshot())?;
        let staging = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        fs::write(&staging, encoded).map_err(|source| io_error(&staging, source))?;
        fs::rename(&staging, &self.path).map_err(|source| io_error(&self.path, source))?;
        debug!(path = %self.path.display(), "escrow ledger persisted");
        Ok(())
    }

    /// Run a mutation against a copy of the table and only keep it once it is on disk.
    fn mutate<F>(&self, apply: F) -> Result<EscrowTransaction, LedgerError>
    where
        F: FnOnce(&mut LedgerTable) -> Result<EscrowTransaction, LedgerError>,
    {
        let mut guard = self.table()?;
        let mut staged = guard.clone();
        let result = apply(&mut staged)?;
        self.persist(&staged)?;
        *guard = staged;
        Ok(result)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl LedgerStore for FileLedger {
    fn create(&self, transaction: EscrowTransaction) -> Result<EscrowTransaction, LedgerError> {
        self.mutate(|table| table.insert(transaction))
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
        self.mutate(|table| table.apply(id, change))
    }

    fn query(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError> {
        self.table()?.query(filter)
    }

    fn record_unreconciled(
        &self,
        id: &TransactionId,
        settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError> {
        self.mutate(|table| table.note_unreconciled(id, settlement))
    }
}
