use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transitions;

/// Identifier wrapper for escrow transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub String);

/// Identifier of the project the escrow is held for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub String);

/// Identifier of a marketplace participant (client, agent, arbiter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of an escrow transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Unfunded,
    Funded,
    InProgress,
    Completed,
    Dispute,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub const fn ordered() -> [EscrowStatus; 7] {
        [
            EscrowStatus::Unfunded,
            EscrowStatus::Funded,
            EscrowStatus::InProgress,
            EscrowStatus::Completed,
            EscrowStatus::Dispute,
            EscrowStatus::Released,
            EscrowStatus::Refunded,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            EscrowStatus::Unfunded => "unfunded",
            EscrowStatus::Funded => "funded",
            EscrowStatus::InProgress => "in_progress",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Dispute => "dispute",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ordered()
            .into_iter()
            .find(|status| status.label() == normalized)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }

    /// Statuses where the client's money is held by the platform and not yet disputed.
    pub const fn holds_funds(self) -> bool {
        matches!(
            self,
            EscrowStatus::Funded | EscrowStatus::InProgress | EscrowStatus::Completed
        )
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transition requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEvent {
    Fund,
    Start,
    Complete,
    Release,
    AutoRelease,
    RaiseDispute,
    ResolveRelease,
    ResolveRefund,
}

impl EscrowEvent {
    pub const fn label(self) -> &'static str {
        match self {
            EscrowEvent::Fund => "fund",
            EscrowEvent::Start => "start",
            EscrowEvent::Complete => "complete",
            EscrowEvent::Release => "release",
            EscrowEvent::AutoRelease => "auto_release",
            EscrowEvent::RaiseDispute => "raise_dispute",
            EscrowEvent::ResolveRelease => "resolve_release",
            EscrowEvent::ResolveRefund => "resolve_refund",
        }
    }
}

impl fmt::Display for EscrowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of fact recorded on the timeline. Each kind implies exactly one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Created,
    Funded,
    Started,
    Completed,
    DisputeRaised,
    Released,
    Refunded,
}

impl TimelineEventKind {
    pub const fn implied_status(self) -> EscrowStatus {
        match self {
            TimelineEventKind::Created => EscrowStatus::Unfunded,
            TimelineEventKind::Funded => EscrowStatus::Funded,
            TimelineEventKind::Started => EscrowStatus::InProgress,
            TimelineEventKind::Completed => EscrowStatus::Completed,
            TimelineEventKind::DisputeRaised => EscrowStatus::Dispute,
            TimelineEventKind::Released => EscrowStatus::Released,
            TimelineEventKind::Refunded => EscrowStatus::Refunded,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TimelineEventKind::Created => "created",
            TimelineEventKind::Funded => "funded",
            TimelineEventKind::Started => "started",
            TimelineEventKind::Completed => "completed",
            TimelineEventKind::DisputeRaised => "dispute_raised",
            TimelineEventKind::Released => "released",
            TimelineEventKind::Refunded => "refunded",
        }
    }
}

/// Roles an authenticated caller may hold.
///
/// `Platform` is reserved for actions the engine takes on its own behalf
/// (review-window auto release) and is never accepted from an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Agent,
    Organization,
    Arbiter,
    Platform,
}

impl ActorRole {
    pub const fn label(self) -> &'static str {
        match self {
            ActorRole::Client => "client",
            ActorRole::Agent => "agent",
            ActorRole::Organization => "organization",
            ActorRole::Arbiter => "arbiter",
            ActorRole::Platform => "platform",
        }
    }

    /// Parse a role supplied by an upstream identity provider.
    pub fn from_external(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "client" => Some(ActorRole::Client),
            "agent" => Some(ActorRole::Agent),
            "organization" => Some(ActorRole::Organization),
            "arbiter" => Some(ActorRole::Arbiter),
            _ => None,
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: PartyId,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: PartyId(id.into()),
            role,
        }
    }

    pub fn platform() -> Self {
        Self::new("platform", ActorRole::Platform)
    }
}

/// Immutable audit record of one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TimelineEventKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: PartyId,
    pub actor_role: ActorRole,
}

/// Gateway settlement whose transition lost the compare-and-set to a concurrent writer.
///
/// Kept on the record until a later transition of the same kind commits, so the arbiter
/// queue shows money that already moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreconciledSettlement {
    pub kind: TimelineEventKind,
    pub reference: String,
    pub idempotency_key: String,
    pub amount: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Held-funds record spanning funding through release or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: TransactionId,
    pub project_id: ProjectId,
    pub client_id: PartyId,
    pub agent_id: PartyId,
    pub gross_amount: i64,
    pub platform_fee: i64,
    pub net_amount: i64,
    pub currency: String,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disputed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreconciled: Vec<UnreconciledSettlement>,
}

impl EscrowTransaction {
    /// Mutable handle to the timestamp recorded when `status` is entered.
    pub(crate) fn stamp_for(&mut self, status: EscrowStatus) -> Option<&mut Option<DateTime<Utc>>> {
        match status {
            EscrowStatus::Unfunded => None,
            EscrowStatus::Funded => Some(&mut self.funded_at),
            EscrowStatus::InProgress => Some(&mut self.started_at),
            EscrowStatus::Completed => Some(&mut self.completed_at),
            EscrowStatus::Dispute => Some(&mut self.disputed_at),
            EscrowStatus::Released => Some(&mut self.released_at),
            EscrowStatus::Refunded => Some(&mut self.refunded_at),
        }
    }

    pub fn last_event(&self) -> Option<&TimelineEvent> {
        self.timeline.last()
    }

    pub fn has_event(&self, kind: TimelineEventKind) -> bool {
        self.timeline.iter().any(|event| event.kind == kind)
    }

    /// Rebuild the status from the timeline alone by folding it through the transition table.
    pub fn replay_status(&self) -> Result<EscrowStatus, InvariantViolation> {
        let mut events = self.timeline.iter();
        let mut status = match events.next() {
            Some(first) if first.kind == TimelineEventKind::Created => EscrowStatus::Unfunded,
            Some(first) => {
                return Err(InvariantViolation::MissingCreatedEvent {
                    found: Some(first.kind),
                })
            }
            None => return Err(InvariantViolation::MissingCreatedEvent { found: None }),
        };

        for event in events {
            let next = event.kind.implied_status();
            if !transitions::is_edge(status, next) {
                return Err(InvariantViolation::IllegalEdge {
                    from: status,
                    to: next,
                });
            }
            status = next;
        }

        Ok(status)
    }

    /// Validate the invariants every persisted transaction must satisfy.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.net_amount + self.platform_fee != self.gross_amount {
            return Err(InvariantViolation::AmountsDoNotBalance {
                gross: self.gross_amount,
                fee: self.platform_fee,
                net: self.net_amount,
            });
        }

        if self.client_id == self.agent_id {
            return Err(InvariantViolation::SameParty(self.client_id.clone()));
        }

        let replayed = self.replay_status()?;
        if replayed != self.status {
            return Err(InvariantViolation::StatusDiverged {
                stored: self.status,
                replayed,
            });
        }

        match (self.released_at.is_some(), self.refunded_at.is_some()) {
            (true, true) => return Err(InvariantViolation::DoubleSettlement),
            (false, false) if self.status.is_terminal() => {
                return Err(InvariantViolation::MissingSettlementStamp(self.status))
            }
            _ => {}
        }

        Ok(())
    }
}

/// Ways a stored transaction can break the ledger's invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("net {net} + fee {fee} does not equal gross {gross}")]
    AmountsDoNotBalance { gross: i64, fee: i64, net: i64 },
    #[error("client and agent are the same party ({0})")]
    SameParty(PartyId),
    #[error("timeline must start with a created event (found {found:?})")]
    MissingCreatedEvent { found: Option<TimelineEventKind> },
    #[error("timeline records an illegal edge {from} -> {to}")]
    IllegalEdge { from: EscrowStatus, to: EscrowStatus },
    #[error("stored status {stored} differs from timeline status {replayed}")]
    StatusDiverged {
        stored: EscrowStatus,
        replayed: EscrowStatus,
    },
    #[error("both released_at and refunded_at are set")]
    DoubleSettlement,
    #[error("terminal status {0} has no settlement timestamp")]
    MissingSettlementStamp(EscrowStatus),
}
