//! Escrow transaction engine for consulting engagements.
//!
//! Client money is held per project from funding until it is released to the agent or,
//! after a dispute, refunded. The transition table in [`transitions`] is the single source
//! of truth for which moves are legal; the ledger refuses to persist anything else.

pub mod collaborators;
pub mod dispute;
pub mod domain;
pub mod fees;
pub mod ledger;
pub mod reporting;
pub mod router;
pub mod service;
pub mod transitions;

#[cfg(test)]
pub(crate) mod tests;

pub use collaborators::{
    AcceptedProposal, Clock, EscrowNotification, GatewayError, NotificationError,
    NotificationSink, PaymentGateway, PaymentRequest, ProposalDirectory, ProposalLookupError,
    Receipt, SystemClock,
};
pub use dispute::DisputeOutcome;
pub use domain::{
    Actor, ActorRole, EscrowEvent, EscrowStatus, EscrowTransaction, InvariantViolation, PartyId,
    ProjectId, TimelineEvent, TimelineEventKind, TransactionId, UnreconciledSettlement,
};
pub use fees::{compute_fee, format_money, FeeBreakdown, FeeError, FeeSchedule};
pub use ledger::{
    FileLedger, InMemoryLedger, LedgerError, LedgerFilter, LedgerStore, Period, StatusChange,
};
pub use reporting::views::{EscrowSummary, MonthlyRevenueEntry, StatusCountEntry};
pub use reporting::{EscrowReports, ReportError};
pub use router::{escrow_router, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use service::{
    EscrowCollaborators, EscrowError, EscrowPolicy, EscrowService, FundRequest, SweepFailure,
    SweepReport,
};
