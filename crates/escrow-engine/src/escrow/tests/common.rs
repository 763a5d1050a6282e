use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::escrow::collaborators::{
    AcceptedProposal, Clock, EscrowNotification, GatewayError, NotificationError,
    NotificationSink, PaymentGateway, PaymentRequest, ProposalDirectory, ProposalLookupError,
    Receipt,
};
use crate::escrow::domain::{
    Actor, ActorRole, EscrowStatus, EscrowTransaction, PartyId, ProjectId, TimelineEvent,
    TimelineEventKind, TransactionId, UnreconciledSettlement,
};
use crate::escrow::ledger::{
    InMemoryLedger, LedgerError, LedgerFilter, LedgerStore, StatusChange,
};
use crate::escrow::service::{EscrowCollaborators, EscrowPolicy, EscrowService, FundRequest};

pub(crate) const GROSS: i64 = 250_000;
pub(crate) const FEE: i64 = 25_000;
pub(crate) const NET: i64 = 225_000;

pub(crate) fn opened_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Stored shape of a freshly opened escrow, for exercising ledgers directly.
pub(crate) fn unfunded_transaction(id: &str, project: &str) -> EscrowTransaction {
    EscrowTransaction {
        id: TransactionId(id.to_string()),
        project_id: ProjectId(project.to_string()),
        client_id: PartyId("client-1".to_string()),
        agent_id: PartyId("agent-1".to_string()),
        gross_amount: GROSS,
        platform_fee: FEE,
        net_amount: NET,
        currency: "USD".to_string(),
        status: EscrowStatus::Unfunded,
        created_at: opened_at(),
        updated_at: opened_at(),
        funded_at: None,
        started_at: None,
        completed_at: None,
        disputed_at: None,
        released_at: None,
        refunded_at: None,
        timeline: vec![TimelineEvent {
            id: format!("{id}-evt-001"),
            kind: TimelineEventKind::Created,
            description: "opened".to_string(),
            timestamp: opened_at(),
            actor_id: PartyId("client-1".to_string()),
            actor_role: ActorRole::Client,
        }],
        unreconciled: Vec::new(),
    }
}

/// Fresh directory under the system temp dir, unique per call.
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "escrow-engine-{name}-{}-{unique}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

pub(crate) fn client() -> Actor {
    Actor::new("client-1", ActorRole::Client)
}

pub(crate) fn agent() -> Actor {
    Actor::new("agent-1", ActorRole::Agent)
}

pub(crate) fn arbiter() -> Actor {
    Actor::new("arbiter-1", ActorRole::Arbiter)
}

pub(crate) fn proposal(project: &str, amount: i64) -> AcceptedProposal {
    AcceptedProposal {
        project_id: ProjectId(project.to_string()),
        client_id: PartyId("client-1".to_string()),
        agent_id: PartyId("agent-1".to_string()),
        amount,
        currency: "USD".to_string(),
    }
}

pub(crate) fn fund_request(project: &str) -> FundRequest {
    FundRequest {
        project_id: ProjectId(project.to_string()),
        amount: GROSS,
    }
}

#[derive(Default)]
pub(crate) struct MemoryProposals {
    proposals: Mutex<HashMap<ProjectId, AcceptedProposal>>,
    offline: AtomicBool,
}

impl MemoryProposals {
    pub(crate) fn insert(&self, proposal: AcceptedProposal) {
        self.proposals
            .lock()
            .expect("proposal mutex poisoned")
            .insert(proposal.project_id.clone(), proposal);
    }

    pub(crate) fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }
}

impl ProposalDirectory for MemoryProposals {
    fn accepted_proposal(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<AcceptedProposal>, ProposalLookupError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProposalLookupError::Unavailable(
                "proposal service offline".to_string(),
            ));
        }
        Ok(self
            .proposals
            .lock()
            .expect("proposal mutex poisoned")
            .get(project_id)
            .cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GatewayCall {
    Charge,
    Payout,
    Refund,
}

/// Gateway double that dedupes on idempotency key like a real processor.
#[derive(Default)]
pub(crate) struct RecordingGateway {
    calls: Mutex<Vec<(GatewayCall, PaymentRequest)>>,
    receipts: Mutex<HashMap<String, Receipt>>,
    failure: Mutex<Option<GatewayError>>,
}

impl RecordingGateway {
    pub(crate) fn calls(&self) -> Vec<(GatewayCall, PaymentRequest)> {
        self.calls.lock().expect("gateway mutex poisoned").clone()
    }

    pub(crate) fn settled_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .receipts
            .lock()
            .expect("gateway mutex poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn fail_with(&self, error: GatewayError) {
        *self.failure.lock().expect("gateway mutex poisoned") = Some(error);
    }

    pub(crate) fn recover(&self) {
        *self.failure.lock().expect("gateway mutex poisoned") = None;
    }

    fn handle(&self, call: GatewayCall, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        self.calls
            .lock()
            .expect("gateway mutex poisoned")
            .push((call, request.clone()));
        if let Some(error) = self.failure.lock().expect("gateway mutex poisoned").clone() {
            return Err(error);
        }

        let mut receipts = self.receipts.lock().expect("gateway mutex poisoned");
        let next = receipts.len() + 1;
        let receipt = receipts
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| Receipt {
                reference: format!("rcpt-{next:04}"),
                idempotency_key: request.idempotency_key.clone(),
                amount: request.amount,
            });
        Ok(receipt.clone())
    }
}

impl PaymentGateway for RecordingGateway {
    fn charge(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        self.handle(GatewayCall::Charge, request)
    }

    fn payout(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        self.handle(GatewayCall::Payout, request)
    }

    fn refund(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        self.handle(GatewayCall::Refund, request)
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifications {
    events: Mutex<Vec<EscrowNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifications {
    pub(crate) fn events(&self) -> Vec<EscrowNotification> {
        self.events.lock().expect("notification mutex poisoned").clone()
    }

    pub(crate) fn break_transport(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl NotificationSink for RecordingNotifications {
    fn publish(&self, notification: &EscrowNotification) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("smtp relay down".to_string()));
        }
        self.events
            .lock()
            .expect("notification mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

/// Manually advanced clock.
pub(crate) struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(crate) fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

pub(crate) struct Harness<L = InMemoryLedger> {
    pub(crate) service: Arc<EscrowService<L>>,
    pub(crate) ledger: Arc<L>,
    pub(crate) proposals: Arc<MemoryProposals>,
    pub(crate) gateway: Arc<RecordingGateway>,
    pub(crate) notifications: Arc<RecordingNotifications>,
    pub(crate) clock: Arc<FixedClock>,
}

impl<L> Harness<L>
where
    L: LedgerStore + 'static,
{
    pub(crate) fn funded(&self, project: &str) -> EscrowTransaction {
        self.proposals.insert(proposal(project, GROSS));
        self.service
            .fund(&client(), fund_request(project))
            .expect("fund succeeds")
    }

    pub(crate) fn in_progress(&self, project: &str) -> EscrowTransaction {
        let funded = self.funded(project);
        self.service
            .start(&agent(), &funded.id)
            .expect("start succeeds")
    }

    pub(crate) fn completed(&self, project: &str) -> EscrowTransaction {
        let started = self.in_progress(project);
        self.service
            .complete(&agent(), &started.id)
            .expect("complete succeeds")
    }

    pub(crate) fn disputed(&self, project: &str) -> EscrowTransaction {
        let funded = self.funded(project);
        self.service
            .raise_dispute(&client(), &funded.id, "agent stopped responding")
            .expect("dispute succeeds")
    }
}

pub(crate) fn build_service() -> Harness {
    build_service_with(Arc::new(InMemoryLedger::new()), EscrowPolicy::default())
}

pub(crate) fn build_service_with<L>(ledger: Arc<L>, policy: EscrowPolicy) -> Harness<L>
where
    L: LedgerStore + 'static,
{
    let proposals = Arc::new(MemoryProposals::default());
    proposals.insert(proposal("proj-1", GROSS));
    let gateway = Arc::new(RecordingGateway::default());
    let notifications = Arc::new(RecordingNotifications::default());
    let clock = Arc::new(FixedClock::starting_at(opened_at()));

    let collaborators = EscrowCollaborators {
        proposals: proposals.clone(),
        gateway: gateway.clone(),
        notifications: notifications.clone(),
        clock: clock.clone(),
    };
    let service = Arc::new(EscrowService::new(ledger.clone(), collaborators, policy));

    Harness {
        service,
        ledger,
        proposals,
        gateway,
        notifications,
        clock,
    }
}

/// Ledger that always loses the compare-and-set, as if another writer raced ahead.
#[derive(Default)]
pub(crate) struct RacingLedger {
    pub(crate) inner: InMemoryLedger,
}

impl LedgerStore for RacingLedger {
    fn create(&self, transaction: EscrowTransaction) -> Result<EscrowTransaction, LedgerError> {
        self.inner.create(transaction)
    }

    fn get_by_id(&self, id: &TransactionId) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.inner.get_by_id(id)
    }

    fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.inner.find_by_project(project_id)
    }

    fn append_event_and_set_status(
        &self,
        id: &TransactionId,
        change: StatusChange,
    ) -> Result<EscrowTransaction, LedgerError> {
        Err(LedgerError::Conflict {
            id: id.clone(),
            expected: change.expected,
            actual: change.next,
        })
    }

    fn query(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError> {
        self.inner.query(filter)
    }

    fn record_unreconciled(
        &self,
        id: &TransactionId,
        settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError> {
        self.inner.record_unreconciled(id, settlement)
    }
}

/// Ledger whose reads can be held until every racing caller has read, so they all
/// validate against the same stored status before anyone writes.
#[derive(Default)]
pub(crate) struct GatedLedger {
    inner: InMemoryLedger,
    gate: Mutex<Option<Arc<Barrier>>>,
}

impl GatedLedger {
    pub(crate) fn hold_reads(&self, callers: usize) {
        *self.gate.lock().expect("gate mutex poisoned") = Some(Arc::new(Barrier::new(callers)));
    }

    pub(crate) fn open_reads(&self) {
        *self.gate.lock().expect("gate mutex poisoned") = None;
    }
}

impl LedgerStore for GatedLedger {
    fn create(&self, transaction: EscrowTransaction) -> Result<EscrowTransaction, LedgerError> {
        self.inner.create(transaction)
    }

    fn get_by_id(&self, id: &TransactionId) -> Result<Option<EscrowTransaction>, LedgerError> {
        let record = self.inner.get_by_id(id);
        let gate = self.gate.lock().expect("gate mutex poisoned").clone();
        if let Some(gate) = gate {
            gate.wait();
        }
        record
    }

    fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.inner.find_by_project(project_id)
    }

    fn append_event_and_set_status(
        &self,
        id: &TransactionId,
        change: StatusChange,
    ) -> Result<EscrowTransaction, LedgerError> {
        self.inner.append_event_and_set_status(id, change)
    }

    fn query(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError> {
        self.inner.query(filter)
    }

    fn record_unreconciled(
        &self,
        id: &TransactionId,
        settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError> {
        self.inner.record_unreconciled(id, settlement)
    }
}

/// Ledger where the agent's dispute lands between a client release's payout and its write.
#[derive(Default)]
pub(crate) struct DisputeFirstLedger {
    inner: InMemoryLedger,
    fired: AtomicBool,
}

impl LedgerStore for DisputeFirstLedger {
    fn create(&self, transaction: EscrowTransaction) -> Result<EscrowTransaction, LedgerError> {
        self.inner.create(transaction)
    }

    fn get_by_id(&self, id: &TransactionId) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.inner.get_by_id(id)
    }

    fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<EscrowTransaction>, LedgerError> {
        self.inner.find_by_project(project_id)
    }

    fn append_event_and_set_status(
        &self,
        id: &TransactionId,
        change: StatusChange,
    ) -> Result<EscrowTransaction, LedgerError> {
        let releasing = change.expected == EscrowStatus::Completed
            && change.next == EscrowStatus::Released;
        if releasing && !self.fired.swap(true, Ordering::SeqCst) {
            let position = self
                .inner
                .get_by_id(id)?
                .map_or(0, |stored| stored.timeline.len())
                + 1;
            self.inner.append_event_and_set_status(
                id,
                StatusChange {
                    expected: EscrowStatus::Completed,
                    next: EscrowStatus::Dispute,
                    event: TimelineEvent {
                        id: format!("{id}-evt-{position:03}"),
                        kind: TimelineEventKind::DisputeRaised,
                        description: "Agent agent-1 raised a dispute: client unreachable"
                            .to_string(),
                        timestamp: change.event.timestamp,
                        actor_id: PartyId("agent-1".to_string()),
                        actor_role: ActorRole::Agent,
                    },
                },
            )?;
        }
        self.inner.append_event_and_set_status(id, change)
    }

    fn query(&self, filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError> {
        self.inner.query(filter)
    }

    fn record_unreconciled(
        &self,
        id: &TransactionId,
        settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError> {
        self.inner.record_unreconciled(id, settlement)
    }
}

pub(crate) struct UnavailableLedger;

impl LedgerStore for UnavailableLedger {
    fn create(&self, _transaction: EscrowTransaction) -> Result<EscrowTransaction, LedgerError> {
        Err(LedgerError::Unavailable("database offline".to_string()))
    }

    fn get_by_id(&self, _id: &TransactionId) -> Result<Option<EscrowTransaction>, LedgerError> {
        Err(LedgerError::Unavailable("database offline".to_string()))
    }

    fn find_by_project(
        &self,
        _project_id: &ProjectId,
    ) -> Result<Option<EscrowTransaction>, LedgerError> {
        Err(LedgerError::Unavailable("database offline".to_string()))
    }

    fn append_event_and_set_status(
        &self,
        _id: &TransactionId,
        _change: StatusChange,
    ) -> Result<EscrowTransaction, LedgerError> {
        Err(LedgerError::Unavailable("database offline".to_string()))
    }

    fn query(&self, _filter: &LedgerFilter) -> Result<Vec<EscrowTransaction>, LedgerError> {
        Err(LedgerError::Unavailable("database offline".to_string()))
    }

    fn record_unreconciled(
        &self,
        _id: &TransactionId,
        _settlement: UnreconciledSettlement,
    ) -> Result<EscrowTransaction, LedgerError> {
        Err(LedgerError::Unavailable("database offline".to_string()))
    }
}

pub(crate) fn kinds(transaction: &EscrowTransaction) -> Vec<TimelineEventKind> {
    transaction.timeline.iter().map(|event| event.kind).collect()
}

pub(crate) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
