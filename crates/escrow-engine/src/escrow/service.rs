use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::collaborators::{
    AcceptedProposal, Clock, EscrowNotification, GatewayError, NotificationSink, PaymentGateway,
    PaymentRequest, ProposalDirectory, ProposalLookupError, Receipt,
};
use super::domain::{
    Actor, ActorRole, EscrowEvent, EscrowStatus, EscrowTransaction, PartyId, ProjectId,
    TimelineEvent, TimelineEventKind, TransactionId, UnreconciledSettlement,
};
use super::fees::{compute_fee, format_money, FeeError, FeeSchedule};
use super::ledger::{LedgerError, LedgerFilter, LedgerStore, StatusChange};
use super::reporting::EscrowReports;
use super::transitions::{self, Edge, Settlement};

const DEFAULT_REVIEW_WINDOW_HOURS: i64 = 72;

/// Business dials applied by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowPolicy {
    pub fees: FeeSchedule,
    /// How long a client has to review completed work before the platform releases it.
    pub review_window: Duration,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            review_window: Duration::hours(DEFAULT_REVIEW_WINDOW_HOURS),
        }
    }
}

/// External systems the engine talks to.
#[derive(Clone)]
pub struct EscrowCollaborators {
    pub proposals: Arc<dyn ProposalDirectory>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifications: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

/// Client request to fund a project's escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRequest {
    pub project_id: ProjectId,
    /// Amount the client believes it is paying; must equal the accepted proposal.
    pub amount: i64,
}

/// Outcome of a review-window sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub released: Vec<TransactionId>,
    pub failed: Vec<SweepFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub transaction_id: TransactionId,
    pub error: String,
}

/// Escrow state machine. Every mutation funnels through [`EscrowService::transition`].
pub struct EscrowService<L> {
    ledger: Arc<L>,
    collaborators: EscrowCollaborators,
    policy: EscrowPolicy,
    sequence: AtomicU64,
}

impl<L> EscrowService<L>
where
    L: LedgerStore + 'static,
{
    pub fn new(ledger: Arc<L>, collaborators: EscrowCollaborators, policy: EscrowPolicy) -> Self {
        let next = match ledger.query(&LedgerFilter::default()) {
            Ok(existing) => existing
                .iter()
                .filter_map(|tx| sequence_number(&tx.id))
                .max()
                .unwrap_or(0)
                + 1,
            Err(err) => {
                warn!(error = %err, "could not scan ledger for transaction ids; starting at 1");
                1
            }
        };

        Self {
            ledger,
            collaborators,
            policy,
            sequence: AtomicU64::new(next),
        }
    }

    pub fn policy(&self) -> &EscrowPolicy {
        &self.policy
    }

    pub fn reports(&self) -> EscrowReports<L> {
        EscrowReports::new(self.ledger.clone())
    }

    /// Fetch a transaction for API responses.
    pub fn get(&self, id: &TransactionId) -> Result<EscrowTransaction, EscrowError> {
        self.ledger
            .get_by_id(id)?
            .ok_or_else(|| EscrowError::NotFound(id.clone()))
    }

    pub fn list(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, EscrowError> {
        Ok(self.ledger.query(filter)?)
    }

    /// Open the project's escrow if needed and charge the client the accepted amount.
    pub fn fund(
        &self,
        actor: &Actor,
        request: FundRequest,
    ) -> Result<EscrowTransaction, EscrowError> {
        let edge = transitions::edge(EscrowEvent::Fund);
        let proposal = self
            .collaborators
            .proposals
            .accepted_proposal(&request.project_id)?
            .ok_or_else(|| EscrowError::ProjectNotFound(request.project_id.clone()))?;

        let existing = self.ledger.find_by_project(&request.project_id)?;
        match &existing {
            Some(transaction) => authorize(edge, actor, transaction)?,
            None => authorize_parties(
                edge,
                actor,
                &proposal.client_id,
                &proposal.agent_id,
                EscrowStatus::Unfunded,
            )?,
        }

        if request.amount != proposal.amount {
            return Err(EscrowError::AmountMismatch {
                expected: proposal.amount,
                provided: request.amount,
            });
        }

        let transaction = match existing {
            Some(transaction) => transaction,
            None => self.open(actor, &proposal)?,
        };

        if transaction.gross_amount != request.amount {
            return Err(EscrowError::AmountMismatch {
                expected: transaction.gross_amount,
                provided: request.amount,
            });
        }

        self.advance(edge, actor, transaction, None)
    }

    pub fn start(
        &self,
        actor: &Actor,
        id: &TransactionId,
    ) -> Result<EscrowTransaction, EscrowError> {
        self.transition(actor, id, EscrowEvent::Start, None)
    }

    pub fn complete(
        &self,
        actor: &Actor,
        id: &TransactionId,
    ) -> Result<EscrowTransaction, EscrowError> {
        self.transition(actor, id, EscrowEvent::Complete, None)
    }

    pub fn release(
        &self,
        actor: &Actor,
        id: &TransactionId,
    ) -> Result<EscrowTransaction, EscrowError> {
        self.transition(actor, id, EscrowEvent::Release, None)
    }

    /// Release every completed transaction whose review window closed at or before `now`.
    pub fn release_elapsed_reviews(&self, now: DateTime<Utc>) -> Result<SweepReport, EscrowError> {
        let platform = Actor::platform();
        let completed = self
            .ledger
            .query(&LedgerFilter::with_status(EscrowStatus::Completed))?;
        let mut report = SweepReport::default();

        for transaction in completed {
            let due = transaction
                .completed_at
                .and_then(|completed_at| completed_at.checked_add_signed(self.policy.review_window))
                .map_or(false, |deadline| deadline <= now);
            if !due {
                continue;
            }

            match self.transition(&platform, &transaction.id, EscrowEvent::AutoRelease, None) {
                Ok(released) => report.released.push(released.id),
                Err(err) => {
                    warn!(transaction_id = %transaction.id, error = %err, "auto-release failed");
                    report.failed.push(SweepFailure {
                        transaction_id: transaction.id,
                        error: err.to_string(),
                    });
                }
            }
        }

        if !report.released.is_empty() || !report.failed.is_empty() {
            info!(
                released = report.released.len(),
                failed = report.failed.len(),
                "review window sweep finished"
            );
        }
        Ok(report)
    }

    /// Single entry point for every transition on an existing transaction.
    pub(super) fn transition(
        &self,
        actor: &Actor,
        id: &TransactionId,
        event: EscrowEvent,
        reason: Option<&str>,
    ) -> Result<EscrowTransaction, EscrowError> {
        let edge = transitions::edge(event);
        let current = self.get(id)?;
        authorize(edge, actor, &current)?;
        self.advance(edge, actor, current, reason)
    }

    fn advance(
        &self,
        edge: &Edge,
        actor: &Actor,
        current: EscrowTransaction,
        reason: Option<&str>,
    ) -> Result<EscrowTransaction, EscrowError> {
        if edge.idempotent && current.status == edge.to {
            debug!(transaction_id = %current.id, event = %edge.event, "transition already applied");
            return Ok(current);
        }

        if !edge.leaves(current.status) {
            return Err(invalid(current.status, edge.event, blocked_reason(edge, current.status)));
        }

        let reason = reason.map(str::trim).unwrap_or_default();
        if edge.requires_reason && reason.is_empty() {
            return Err(invalid(
                current.status,
                edge.event,
                "a reason is required for the audit trail".to_string(),
            ));
        }

        if let Some(settled) = contradicting_settlement(edge, &current) {
            return Err(invalid(
                current.status,
                edge.event,
                format!(
                    "{} {} already settled at the gateway; resolve in its favor",
                    settled.kind.label(),
                    settled.reference
                ),
            ));
        }

        let receipt = self.settle(edge, &current)?;
        if let Some(receipt) = &receipt {
            debug!(
                transaction_id = %current.id,
                reference = %receipt.reference,
                amount = receipt.amount,
                "gateway settlement confirmed"
            );
        }

        let description = describe(edge, actor, &current, reason);
        let committed = self.commit(&current, edge, actor, description);
        if let (Some(receipt), Err(EscrowError::Conflict { actual, .. })) = (&receipt, &committed) {
            self.park_settlement(edge, &current, receipt, *actual);
        }
        committed
    }

    /// Money moved but the ledger did not. Keep the receipt on the record so the arbiter
    /// sees it; the idempotency key lets a later settlement of the same kind dedupe.
    fn park_settlement(
        &self,
        edge: &Edge,
        current: &EscrowTransaction,
        receipt: &Receipt,
        actual: EscrowStatus,
    ) {
        error!(
            transaction_id = %current.id,
            reference = %receipt.reference,
            idempotency_key = %receipt.idempotency_key,
            status = %actual,
            "gateway settled but the escrow moved concurrently; needs reconciliation"
        );

        let settlement = UnreconciledSettlement {
            kind: edge.records,
            reference: receipt.reference.clone(),
            idempotency_key: receipt.idempotency_key.clone(),
            amount: receipt.amount,
            recorded_at: self.collaborators.clock.now(),
        };
        if let Err(err) = self.ledger.record_unreconciled(&current.id, settlement) {
            error!(
                transaction_id = %current.id,
                reference = %receipt.reference,
                error = %err,
                "unreconciled settlement could not be recorded"
            );
        }
    }

    fn open(
        &self,
        actor: &Actor,
        proposal: &AcceptedProposal,
    ) -> Result<EscrowTransaction, EscrowError> {
        let unusable = |reason: &str| EscrowError::InvalidProposal {
            project_id: proposal.project_id.clone(),
            reason: reason.to_string(),
        };

        if proposal.client_id == proposal.agent_id {
            return Err(unusable("client and agent must be different parties"));
        }
        if !is_currency_code(&proposal.currency) {
            return Err(unusable("currency must be a three-letter ISO code"));
        }
        let breakdown = compute_fee(proposal.amount, &self.policy.fees)?;

        let now = self.collaborators.clock.now();
        let id = self.next_transaction_id();
        let created = TimelineEvent {
            id: event_id(&id, 1),
            kind: TimelineEventKind::Created,
            description: format!(
                "Escrow opened for project {} at {}",
                proposal.project_id,
                format_money(proposal.amount, &proposal.currency)
            ),
            timestamp: now,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
        };

        let transaction = EscrowTransaction {
            id,
            project_id: proposal.project_id.clone(),
            client_id: proposal.client_id.clone(),
            agent_id: proposal.agent_id.clone(),
            gross_amount: breakdown.gross,
            platform_fee: breakdown.fee,
            net_amount: breakdown.net,
            currency: proposal.currency.clone(),
            status: EscrowStatus::Unfunded,
            created_at: now,
            updated_at: now,
            funded_at: None,
            started_at: None,
            completed_at: None,
            disputed_at: None,
            released_at: None,
            refunded_at: None,
            timeline: vec![created],
            unreconciled: Vec::new(),
        };

        match self.ledger.create(transaction) {
            Ok(stored) => {
                info!(
                    transaction_id = %stored.id,
                    project_id = %stored.project_id,
                    gross = stored.gross_amount,
                    fee = stored.platform_fee,
                    "escrow opened"
                );
                Ok(stored)
            }
            // another request opened it first; continue against theirs
            Err(LedgerError::ProjectAlreadyEscrowed(project_id)) => self
                .ledger
                .find_by_project(&project_id)?
                .ok_or(EscrowError::ProjectNotFound(project_id)),
            Err(err) => Err(err.into()),
        }
    }

    fn settle(
        &self,
        edge: &Edge,
        transaction: &EscrowTransaction,
    ) -> Result<Option<Receipt>, EscrowError> {
        let gateway = &self.collaborators.gateway;
        let request = |party: &PartyId, amount: i64| PaymentRequest {
            party: party.clone(),
            amount,
            currency: transaction.currency.clone(),
            idempotency_key: format!("{}:{}", transaction.id, edge.records.label()),
        };

        let result = match edge.settlement {
            Settlement::None => return Ok(None),
            Settlement::ChargeClient => {
                gateway.charge(&request(&transaction.client_id, transaction.gross_amount))
            }
            Settlement::PayoutAgent => {
                gateway.payout(&request(&transaction.agent_id, transaction.net_amount))
            }
            Settlement::RefundClient => {
                gateway.refund(&request(&transaction.client_id, transaction.gross_amount))
            }
        };

        result.map(Some).map_err(|source| {
            warn!(
                transaction_id = %transaction.id,
                event = %edge.event,
                error = %source,
                "gateway call failed; no state change"
            );
            EscrowError::Gateway {
                transaction_id: transaction.id.clone(),
                event: edge.event,
                source,
            }
        })
    }

    fn commit(
        &self,
        current: &EscrowTransaction,
        edge: &Edge,
        actor: &Actor,
        description: String,
    ) -> Result<EscrowTransaction, EscrowError> {
        let event = TimelineEvent {
            id: event_id(&current.id, current.timeline.len() + 1),
            kind: edge.records,
            description,
            timestamp: self.collaborators.clock.now(),
            actor_id: actor.id.clone(),
            actor_role: actor.role,
        };

        let updated = self.ledger.append_event_and_set_status(
            &current.id,
            StatusChange {
                expected: current.status,
                next: edge.to,
                event,
            },
        )?;

        info!(
            transaction_id = %updated.id,
            event = %edge.event,
            status = %updated.status,
            actor = %actor.id,
            "escrow transition committed"
        );
        self.notify(&updated);
        Ok(updated)
    }

    fn notify(&self, transaction: &EscrowTransaction) {
        let Some(notification) = EscrowNotification::for_latest_event(transaction) else {
            return;
        };
        if let Err(err) = self.collaborators.notifications.publish(&notification) {
            warn!(
                transaction_id = %transaction.id,
                error = %err,
                "escrow notification not delivered"
            );
        }
    }

    fn next_transaction_id(&self) -> TransactionId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        TransactionId(format!("esc-{id:06}"))
    }
}

fn sequence_number(id: &TransactionId) -> Option<u64> {
    id.0.strip_prefix("esc-")?.parse().ok()
}

fn event_id(id: &TransactionId, position: usize) -> String {
    format!("{id}-evt-{position:03}")
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

/// A parked settlement that the edge would contradict: a refund after the agent was
/// already paid, or a payout after the client was already refunded.
fn contradicting_settlement<'a>(
    edge: &Edge,
    transaction: &'a EscrowTransaction,
) -> Option<&'a UnreconciledSettlement> {
    let opposite = match edge.settlement {
        Settlement::PayoutAgent => TimelineEventKind::Refunded,
        Settlement::RefundClient => TimelineEventKind::Released,
        Settlement::None | Settlement::ChargeClient => return None,
    };
    transaction
        .unreconciled
        .iter()
        .find(|settlement| settlement.kind == opposite)
}

fn invalid(status: EscrowStatus, event: EscrowEvent, reason: String) -> EscrowError {
    EscrowError::InvalidTransition {
        status,
        event,
        reason,
    }
}

fn authorize(edge: &Edge, actor: &Actor, transaction: &EscrowTransaction) -> Result<(), EscrowError> {
    authorize_parties(
        edge,
        actor,
        &transaction.client_id,
        &transaction.agent_id,
        transaction.status,
    )
}

/// Role gate shared by every edge: right role, and the right party for that role.
fn authorize_parties(
    edge: &Edge,
    actor: &Actor,
    client_id: &PartyId,
    agent_id: &PartyId,
    status: EscrowStatus,
) -> Result<(), EscrowError> {
    if !edge.permits(actor.role) {
        return Err(invalid(
            status,
            edge.event,
            format!("the {} role may not {}", actor.role, edge.event),
        ));
    }

    let denied = match actor.role {
        ActorRole::Client if &actor.id != client_id => Some("caller is not this escrow's client"),
        ActorRole::Agent if &actor.id != agent_id => Some("caller is not this escrow's agent"),
        ActorRole::Arbiter if &actor.id == client_id || &actor.id == agent_id => {
            Some("an arbiter cannot be a party to the escrow")
        }
        _ => None,
    };

    match denied {
        Some(reason) => Err(invalid(status, edge.event, reason.to_string())),
        None => Ok(()),
    }
}

fn blocked_reason(edge: &Edge, status: EscrowStatus) -> String {
    if status.is_terminal() {
        return format!("escrow is already {status} and cannot change");
    }
    if status == EscrowStatus::Dispute {
        return "escrow is under dispute; only an arbiter can resolve it".to_string();
    }
    let allowed = edge
        .from
        .iter()
        .map(|status| status.label())
        .collect::<Vec<_>>()
        .join(" or ");
    format!("requires status {allowed}")
}

fn describe(edge: &Edge, actor: &Actor, transaction: &EscrowTransaction, reason: &str) -> String {
    let currency = &transaction.currency;
    let gross = format_money(transaction.gross_amount, currency);
    let net = format_money(transaction.net_amount, currency);
    match edge.event {
        EscrowEvent::Fund => format!(
            "Client {} funded {gross} (platform fee {}, agent payout {net})",
            actor.id,
            format_money(transaction.platform_fee, currency)
        ),
        EscrowEvent::Start => format!("Agent {} started work", actor.id),
        EscrowEvent::Complete => format!("Agent {} marked the work complete", actor.id),
        EscrowEvent::Release => format!(
            "Client {} released {net} to agent {}",
            actor.id, transaction.agent_id
        ),
        EscrowEvent::AutoRelease => format!(
            "Review window elapsed; released {net} to agent {}",
            transaction.agent_id
        ),
        EscrowEvent::RaiseDispute => {
            format!("{} {} raised a dispute: {reason}", actor.role, actor.id)
        }
        EscrowEvent::ResolveRelease => format!(
            "Arbiter {} resolved the dispute for the agent, releasing {net}: {reason}",
            actor.id
        ),
        EscrowEvent::ResolveRefund => format!(
            "Arbiter {} resolved the dispute for the client, refunding {gross}: {reason}",
            actor.id
        ),
    }
}

/// Error raised by the escrow service.
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("cannot {event} an escrow in status {status}: {reason}")]
    InvalidTransition {
        status: EscrowStatus,
        event: EscrowEvent,
        reason: String,
    },
    #[error("escrow {id} moved from {expected} to {actual} concurrently; reload before retrying")]
    Conflict {
        id: TransactionId,
        expected: EscrowStatus,
        actual: EscrowStatus,
    },
    #[error("amount {provided} does not match the accepted proposal amount {expected}")]
    AmountMismatch { expected: i64, provided: i64 },
    #[error("payment gateway failed to {event} escrow {transaction_id}: {source}")]
    Gateway {
        transaction_id: TransactionId,
        event: EscrowEvent,
        #[source]
        source: GatewayError,
    },
    #[error("escrow {0} not found")]
    NotFound(TransactionId),
    #[error("no accepted proposal for project {0}")]
    ProjectNotFound(ProjectId),
    #[error("accepted proposal for project {project_id} cannot be escrowed: {reason}")]
    InvalidProposal { project_id: ProjectId, reason: String },
    #[error(transparent)]
    Proposals(#[from] ProposalLookupError),
    #[error(transparent)]
    Fee(#[from] FeeError),
    #[error(transparent)]
    Ledger(LedgerError),
}

impl EscrowError {
    /// Stable machine-readable discriminator for API payloads.
    pub const fn kind(&self) -> &'static str {
        match self {
            EscrowError::InvalidTransition { .. } => "invalid_transition",
            EscrowError::Conflict { .. } => "conflict",
            EscrowError::AmountMismatch { .. } => "amount_mismatch",
            EscrowError::Gateway { .. } => "gateway",
            EscrowError::NotFound(_) | EscrowError::ProjectNotFound(_) => "not_found",
            EscrowError::InvalidProposal { .. } | EscrowError::Fee(_) => "invalid_proposal",
            EscrowError::Proposals(_) | EscrowError::Ledger(_) => "unavailable",
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            EscrowError::Conflict { .. }
                | EscrowError::Gateway { .. }
                | EscrowError::Proposals(_)
        )
    }
}

impl From<LedgerError> for EscrowError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Conflict {
                id,
                expected,
                actual,
            } => Self::Conflict {
                id,
                expected,
                actual,
            },
            LedgerError::NotFound(id) => Self::NotFound(id),
            other => Self::Ledger(other),
        }
    }
}
