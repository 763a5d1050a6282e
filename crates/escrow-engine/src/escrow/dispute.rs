//! Dispute lock and arbiter resolution.
//!
//! Raising a dispute freezes the escrow: the transition table only offers the two arbiter
//! resolutions out of `dispute`, and both are terminal.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{Actor, EscrowEvent, EscrowStatus, EscrowTransaction, TransactionId};
use super::ledger::{LedgerFilter, LedgerStore};
use super::service::{EscrowError, EscrowService};

/// Arbiter decision on a disputed escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Pay the net amount to the agent.
    Release,
    /// Return the full gross amount to the client.
    Refund,
}

impl DisputeOutcome {
    pub const fn event(self) -> EscrowEvent {
        match self {
            DisputeOutcome::Release => EscrowEvent::ResolveRelease,
            DisputeOutcome::Refund => EscrowEvent::ResolveRefund,
        }
    }
}

impl<L> EscrowService<L>
where
    L: LedgerStore + 'static,
{
    /// Lock the escrow until an arbiter decides. Either party may raise it.
    pub fn raise_dispute(
        &self,
        actor: &Actor,
        id: &TransactionId,
        reason: &str,
    ) -> Result<EscrowTransaction, EscrowError> {
        let disputed = self.transition(actor, id, EscrowEvent::RaiseDispute, Some(reason))?;
        info!(
            transaction_id = %disputed.id,
            raised_by = %actor.id,
            role = %actor.role,
            "escrow dispute raised"
        );
        Ok(disputed)
    }

    /// Final arbiter decision. There is no way back into the work lifecycle afterwards.
    pub fn resolve_dispute(
        &self,
        actor: &Actor,
        id: &TransactionId,
        outcome: DisputeOutcome,
        reason: &str,
    ) -> Result<EscrowTransaction, EscrowError> {
        let resolved = self.transition(actor, id, outcome.event(), Some(reason))?;
        info!(
            transaction_id = %resolved.id,
            arbiter = %actor.id,
            outcome = ?outcome,
            "escrow dispute resolved"
        );
        Ok(resolved)
    }

    /// Arbiter work queue: disputes awaiting a decision, oldest first.
    pub fn open_disputes(&self) -> Result<Vec<EscrowTransaction>, EscrowError> {
        let mut disputes = self.list(&LedgerFilter::with_status(EscrowStatus::Dispute))?;
        disputes.sort_by_key(|transaction| transaction.disputed_at);
        Ok(disputes)
    }
}
