use escrow_engine::escrow::{
    AcceptedProposal, EscrowCollaborators, EscrowNotification, GatewayError, NotificationError,
    NotificationSink, PartyId, PaymentGateway, PaymentRequest, ProjectId, ProposalDirectory,
    ProposalLookupError, Receipt, SystemClock,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Accepted proposals held in memory, standing in for the proposal service.
#[derive(Default)]
pub(crate) struct InMemoryProposalDirectory {
    proposals: RwLock<HashMap<ProjectId, AcceptedProposal>>,
}

impl InMemoryProposalDirectory {
    pub(crate) fn with_proposals(proposals: Vec<AcceptedProposal>) -> Self {
        let proposals = proposals
            .into_iter()
            .map(|proposal| (proposal.project_id.clone(), proposal))
            .collect();
        Self {
            proposals: RwLock::new(proposals),
        }
    }

    pub(crate) fn from_json_file(path: &Path) -> Result<Self, std::io::Error> {
        let bytes = std::fs::read(path)?;
        let proposals: Vec<AcceptedProposal> = serde_json::from_slice(&bytes)?;
        info!(path = %path.display(), count = proposals.len(), "accepted proposals loaded");
        Ok(Self::with_proposals(proposals))
    }

    pub(crate) fn seeded() -> Self {
        Self::with_proposals(demo_proposals())
    }
}

impl ProposalDirectory for InMemoryProposalDirectory {
    fn accepted_proposal(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<AcceptedProposal>, ProposalLookupError> {
        let guard = self
            .proposals
            .read()
            .map_err(|_| ProposalLookupError::Unavailable("directory lock poisoned".to_string()))?;
        Ok(guard.get(project_id).cloned())
    }
}

pub(crate) fn demo_proposals() -> Vec<AcceptedProposal> {
    let proposal = |project: &str, client: &str, agent: &str, amount: i64| AcceptedProposal {
        project_id: ProjectId(project.to_string()),
        client_id: PartyId(client.to_string()),
        agent_id: PartyId(agent.to_string()),
        amount,
        currency: "CAD".to_string(),
    };

    vec![
        proposal("proj-study-permit", "client-amara", "rcic-lopez", 250_000),
        proposal("proj-express-entry", "client-jun", "rcic-lopez", 180_000),
        proposal("proj-work-permit", "client-amara", "rcic-okafor", 95_000),
    ]
}

/// Gateway for local runs: approves everything and dedupes on the idempotency key.
#[derive(Default)]
pub(crate) struct SandboxGateway {
    receipts: Mutex<HashMap<String, Receipt>>,
}

impl SandboxGateway {
    fn settle(&self, kind: &str, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        let mut receipts = self
            .receipts
            .lock()
            .map_err(|_| GatewayError::Unavailable("sandbox lock poisoned".to_string()))?;
        if let Some(existing) = receipts.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let receipt = Receipt {
            reference: format!("sbx-{kind}-{:05}", receipts.len() + 1),
            idempotency_key: request.idempotency_key.clone(),
            amount: request.amount,
        };
        info!(
            kind,
            party = %request.party,
            amount = request.amount,
            currency = %request.currency,
            reference = %receipt.reference,
            "sandbox gateway settled"
        );
        receipts.insert(request.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}

impl PaymentGateway for SandboxGateway {
    fn charge(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        self.settle("charge", request)
    }

    fn payout(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        self.settle("payout", request)
    }

    fn refund(&self, request: &PaymentRequest) -> Result<Receipt, GatewayError> {
        self.settle("refund", request)
    }
}

/// Notification sink that writes to the service log instead of e-mail.
#[derive(Default)]
pub(crate) struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn publish(&self, notification: &EscrowNotification) -> Result<(), NotificationError> {
        info!(
            transaction_id = %notification.transaction_id,
            client = %notification.client_id,
            agent = %notification.agent_id,
            status = %notification.status,
            event = notification.event.kind.label(),
            "escrow notification"
        );
        Ok(())
    }
}

pub(crate) fn local_collaborators(proposals: InMemoryProposalDirectory) -> EscrowCollaborators {
    EscrowCollaborators {
        proposals: Arc::new(proposals),
        gateway: Arc::new(SandboxGateway::default()),
        notifications: Arc::new(LogNotificationSink),
        clock: Arc::new(SystemClock),
    }
}
