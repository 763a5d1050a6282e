use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{LedgerError, LedgerFilter, StatusChange};
use crate::escrow::domain::{
    EscrowTransaction, InvariantViolation, ProjectId, TransactionId, UnreconciledSettlement,
};
use crate::escrow::transitions;

/// Backend-neutral record keeping shared by the ledger implementations.
#[derive(Debug, Clone, Default)]
pub(super) struct LedgerTable {
    records: BTreeMap<TransactionId, EscrowTransaction>,
}

/// On-disk layout of the file ledger.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct LedgerSnapshot {
    pub(super) version: u32,
    pub(super) transactions: Vec<EscrowTransaction>,
}

pub(super) const SNAPSHOT_VERSION: u32 = 1;

fn corrupt(id: &TransactionId, violation: InvariantViolation) -> LedgerError {
    LedgerError::Corrupt {
        id: id.clone(),
        violation,
    }
}

fn verified(record: &EscrowTransaction) -> Result<EscrowTransaction, LedgerError> {
    record
        .check_invariants()
        .map_err(|violation| corrupt(&record.id, violation))?;
    Ok(record.clone())
}

impl LedgerTable {
    pub(super) fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let mut table = Self::default();
        for transaction in snapshot.transactions {
            table.insert(transaction)?;
        }
        Ok(table)
    }

    pub(super) fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            transactions: self.records.values().cloned().collect(),
        }
    }

    pub(super) fn insert(
        &mut self,
        transaction: EscrowTransaction,
    ) -> Result<EscrowTransaction, LedgerError> {
        transaction
            .check_invariants()
            .map_err(|violation| corrupt(&transaction.id, violation))?;

        if self.records.contains_key(&transaction.id) {
            return Err(LedgerError::Duplicate(transaction.id));
        }
        if self
            .records
            .values()
            .any(|existing| existing.project_id == transaction.project_id)
        {
            return Err(LedgerError::ProjectAlreadyEscrowed(transaction.project_id));
        }

        self.records
            .insert(transaction.id.clone(), transaction.clone());
        Ok(transaction)
    }

    pub(super) fn get(&self, id: &TransactionId) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.records.get(id).map(verified).transpose()
    }

    pub(super) fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.records
            .values()
            .find(|record| &record.project_id == project_id)
            .map(verified)
            .transpose()
    }

    pub(super) fn apply(
        &mut self,
        id: &TransactionId,
        change: StatusChange,
    ) -> Result<EscrowTransaction, LedgerError> {
        let stored = self
            .records
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        if stored.status != change.expected {
            return Err(LedgerError::Conflict {
                id: id.clone(),
                expected: change.expected,
                actual: stored.status,
            });
        }

        let recorded = change.event.kind.implied_status();
        if recorded != change.next || !transitions::is_edge(change.expected, change.next) {
            return Err(corrupt(
                id,
                InvariantViolation::IllegalEdge {
                    from: change.expected,
                    to: recorded,
                },
            ));
        }

        let mut updated = stored.clone();
        updated.status = change.next;
        if let Some(stamp) = updated.stamp_for(change.next) {
            stamp.get_or_insert(change.event.timestamp);
        }
        updated.updated_at = change.event.timestamp;
        updated
            .unreconciled
            .retain(|settlement| settlement.kind != change.event.kind);
        updated.timeline.push(change.event);

        let updated = verified(&updated)?;
        self.records.insert(id.clone(), updated.clone());
        Ok(updated)
    }

    pub(super) fn note_unreconciled(
        &mut self,
        id: &TransactionId,
        settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError> {
        let stored = self
            .records
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        let committed = stored.has_event(settlement.kind);
        let known = stored
            .unreconciled
            .iter()
            .any(|existing| existing.idempotency_key == settlement.idempotency_key);
        if !committed && !known {
            stored.unreconciled.push(settlement);
        }
        verified(stored)
    }

    pub(super) fn query(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError> {
        let mut matches = self
            .records
            .values()
            .filter(|record| filter.matches(record))
            .map(verified)
            .collect::<Result<Vec<_>, _>>()?;
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matches)
    }
}
