use super::domain::{ActorRole, EscrowEvent, EscrowStatus, TimelineEventKind};

/// External effect a transition performs through the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    None,
    ChargeClient,
    PayoutAgent,
    RefundClient,
}

/// One legal edge of the escrow state machine.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub event: EscrowEvent,
    pub from: &'static [EscrowStatus],
    pub to: EscrowStatus,
    pub roles: &'static [ActorRole],
    pub records: TimelineEventKind,
    pub settlement: Settlement,
    /// Whether re-invoking on a transaction already at `to` is a no-op.
    pub idempotent: bool,
    /// Whether the caller must supply a non-empty reason for the audit trail.
    pub requires_reason: bool,
}

impl Edge {
    pub fn permits(&self, role: ActorRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn leaves(&self, status: EscrowStatus) -> bool {
        self.from.contains(&status)
    }
}

const DISPUTABLE: &[EscrowStatus] = &[
    EscrowStatus::Funded,
    EscrowStatus::InProgress,
    EscrowStatus::Completed,
];

static EDGES: [Edge; 8] = [
    Edge {
        event: EscrowEvent::Fund,
        from: &[EscrowStatus::Unfunded],
        to: EscrowStatus::Funded,
        roles: &[ActorRole::Client],
        records: TimelineEventKind::Funded,
        settlement: Settlement::ChargeClient,
        idempotent: true,
        requires_reason: false,
    },
    Edge {
        event: EscrowEvent::Start,
        from: &[EscrowStatus::Funded],
        to: EscrowStatus::InProgress,
        roles: &[ActorRole::Agent],
        records: TimelineEventKind::Started,
        settlement: Settlement::None,
        idempotent: true,
        requires_reason: false,
    },
    Edge {
        event: EscrowEvent::Complete,
        from: &[EscrowStatus::InProgress],
        to: EscrowStatus::Completed,
        roles: &[ActorRole::Agent],
        records: TimelineEventKind::Completed,
        settlement: Settlement::None,
        idempotent: true,
        requires_reason: false,
    },
    Edge {
        event: EscrowEvent::Release,
        from: &[EscrowStatus::Completed],
        to: EscrowStatus::Released,
        roles: &[ActorRole::Client],
        records: TimelineEventKind::Released,
        settlement: Settlement::PayoutAgent,
        idempotent: false,
        requires_reason: false,
    },
    Edge {
        event: EscrowEvent::AutoRelease,
        from: &[EscrowStatus::Completed],
        to: EscrowStatus::Released,
        roles: &[ActorRole::Platform],
        records: TimelineEventKind::Released,
        settlement: Settlement::PayoutAgent,
        idempotent: false,
        requires_reason: false,
    },
    Edge {
        event: EscrowEvent::RaiseDispute,
        from: DISPUTABLE,
        to: EscrowStatus::Dispute,
        roles: &[ActorRole::Client, ActorRole::Agent],
        records: TimelineEventKind::DisputeRaised,
        settlement: Settlement::None,
        idempotent: false,
        requires_reason: true,
    },
    Edge {
        event: EscrowEvent::ResolveRelease,
        from: &[EscrowStatus::Dispute],
        to: EscrowStatus::Released,
        roles: &[ActorRole::Arbiter],
        records: TimelineEventKind::Released,
        settlement: Settlement::PayoutAgent,
        idempotent: false,
        requires_reason: true,
    },
    Edge {
        event: EscrowEvent::ResolveRefund,
        from: &[EscrowStatus::Dispute],
        to: EscrowStatus::Refunded,
        roles: &[ActorRole::Arbiter],
        records: TimelineEventKind::Refunded,
        settlement: Settlement::RefundClient,
        idempotent: false,
        requires_reason: true,
    },
];

/// Look up the edge an event travels along.
pub fn edge(event: EscrowEvent) -> &'static Edge {
    let index = match event {
        EscrowEvent::Fund => 0,
        EscrowEvent::Start => 1,
        EscrowEvent::Complete => 2,
        EscrowEvent::Release => 3,
        EscrowEvent::AutoRelease => 4,
        EscrowEvent::RaiseDispute => 5,
        EscrowEvent::ResolveRelease => 6,
        EscrowEvent::ResolveRefund => 7,
    };
    &EDGES[index]
}

/// Whether any edge connects `from` to `to`.
pub fn is_edge(from: EscrowStatus, to: EscrowStatus) -> bool {
    EDGES.iter().any(|edge| edge.to == to && edge.leaves(from))
}

/// Events a holder of `role` could legally trigger from `status`.
pub fn available_events(status: EscrowStatus, role: ActorRole) -> Vec<EscrowEvent> {
    EDGES
        .iter()
        .filter(|edge| edge.leaves(status) && edge.permits(role))
        .map(|edge| edge.event)
        .collect()
}
