use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    EscrowStatus, EscrowTransaction, PartyId, ProjectId, TimelineEvent, TransactionId,
};

/// Accepted proposal as reported by the project/proposal service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedProposal {
    pub project_id: ProjectId,
    pub client_id: PartyId,
    pub agent_id: PartyId,
    pub amount: i64,
    pub currency: String,
}

/// Lookup of the proposal that sets an escrow's gross amount.
pub trait ProposalDirectory: Send + Sync {
    fn accepted_proposal(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<AcceptedProposal>, ProposalLookupError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProposalLookupError {
    #[error("proposal service unavailable: {0}")]
    Unavailable(String),
}

/// Money movement handed to the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub party: PartyId,
    pub amount: i64,
    pub currency: String,
    /// `<transaction id>:<event>`; gateways must treat repeats as the same operation.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub reference: String,
    pub idempotency_key: String,
    pub amount: i64,
}

/// External rails that actually move funds. Every call is keyed for safe retries.
pub trait PaymentGateway: Send + Sync {
    fn charge(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError>;
    fn payout(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError>;
    fn refund(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment gateway timed out")]
    Timeout,
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// User-facing notification emitted after a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowNotification {
    pub transaction_id: TransactionId,
    pub project_id: ProjectId,
    pub client_id: PartyId,
    pub agent_id: PartyId,
    pub status: EscrowStatus,
    pub event: TimelineEvent,
}

impl EscrowNotification {
    pub fn for_latest_event(transaction: &EscrowTransaction) -> Option<Self> {
        transaction.last_event().map(|event| Self {
            transaction_id: transaction.id.clone(),
            project_id: transaction.project_id.clone(),
            client_id: transaction.client_id.clone(),
            agent_id: transaction.agent_id.clone(),
            status: transaction.status,
            event: event.clone(),
        })
    }
}

/// Fire-and-forget delivery hook (e-mail, in-app inbox, etc.).
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: &EscrowNotification) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
