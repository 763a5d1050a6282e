use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::dispute::DisputeOutcome;
use super::domain::{
    Actor, ActorRole, EscrowStatus, EscrowTransaction, PartyId, ProjectId, TransactionId,
};
use super::ledger::{LedgerFilter, LedgerStore, Period};
use super::reporting::ReportError;
use super::service::{EscrowError, EscrowService, FundRequest};

/// Header carrying the authenticated caller id, set by the upstream auth layer.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Header carrying the authenticated caller role.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

type SharedService<L> = Arc<EscrowService<L>>;

/// Router builder exposing the escrow operations and dashboard reads.
pub fn escrow_router<L>(service: SharedService<L>) -> Router
where
    L: LedgerStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/escrow/projects/:project_id/fund",
            post(fund_handler::<L>),
        )
        .route("/api/v1/escrow/transactions", get(list_handler::<L>))
        .route(
            "/api/v1/escrow/transactions/:transaction_id",
            get(transaction_handler::<L>),
        )
        .route(
            "/api/v1/escrow/transactions/:transaction_id/start",
            post(start_handler::<L>),
        )
        .route(
            "/api/v1/escrow/transactions/:transaction_id/complete",
            post(complete_handler::<L>),
        )
        .route(
            "/api/v1/escrow/transactions/:transaction_id/release",
            post(release_handler::<L>),
        )
        .route(
            "/api/v1/escrow/transactions/:transaction_id/dispute",
            post(dispute_handler::<L>),
        )
        .route(
            "/api/v1/escrow/transactions/:transaction_id/resolution",
            post(resolution_handler::<L>),
        )
        .route("/api/v1/escrow/disputes", get(disputes_handler::<L>))
        .route("/api/v1/escrow/summary", get(summary_handler::<L>))
        .route("/api/v1/escrow/revenue", get(revenue_handler::<L>))
        .route("/api/v1/escrow/export.csv", get(export_handler::<L>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct FundBody {
    pub(crate) amount: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DisputeBody {
    #[serde(default)]
    pub(crate) reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolutionBody {
    pub(crate) outcome: DisputeOutcome,
    #[serde(default)]
    pub(crate) reason: String,
}

/// Raw query string parameters; converted into a [`LedgerFilter`] with explicit errors.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct FilterParams {
    pub(crate) status: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) agent_id: Option<String>,
    pub(crate) from: Option<String>,
    pub(crate) to: Option<String>,
}

impl FilterParams {
    fn into_filter(self) -> Result<LedgerFilter, String> {
        let status = self
            .status
            .map(|raw| {
                EscrowStatus::from_label(&raw).ok_or_else(|| format!("unknown status '{raw}'"))
            })
            .transpose()?;
        let from = self.from.as_deref().map(parse_date).transpose()?;
        let to = self.to.as_deref().map(parse_date).transpose()?;
        let period = (from.is_some() || to.is_some()).then_some(Period { from, to });

        Ok(LedgerFilter {
            status,
            client_id: self.client_id.map(PartyId),
            agent_id: self.agent_id.map(PartyId),
            period,
        })
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let unauthorized = |message: &str| {
        let payload = json!({ "error": message, "kind": "unauthenticated" });
        (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
    };

    let id = read(ACTOR_ID_HEADER).ok_or_else(|| unauthorized("missing caller identity"))?;
    let role = read(ACTOR_ROLE_HEADER)
        .and_then(ActorRole::from_external)
        .ok_or_else(|| unauthorized("missing or unsupported caller role"))?;

    Ok(Actor::new(id, role))
}

pub(crate) fn error_response(err: EscrowError) -> Response {
    let status = match &err {
        EscrowError::InvalidTransition { .. }
        | EscrowError::AmountMismatch { .. }
        | EscrowError::InvalidProposal { .. }
        | EscrowError::Fee(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EscrowError::Conflict { .. } => StatusCode::CONFLICT,
        EscrowError::Gateway { .. } => StatusCode::BAD_GATEWAY,
        EscrowError::NotFound(_) | EscrowError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        EscrowError::Proposals(_) => StatusCode::SERVICE_UNAVAILABLE,
        EscrowError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "escrow ledger failure");
    }

    let mut payload = json!({
        "error": err.to_string(),
        "kind": err.kind(),
        "retryable": err.is_retryable(),
    });
    match &err {
        EscrowError::InvalidTransition { status, event, .. } => {
            payload["status"] = json!(status);
            payload["event"] = json!(event);
        }
        EscrowError::Conflict { actual, .. } => {
            payload["status"] = json!(actual);
        }
        EscrowError::AmountMismatch { expected, provided } => {
            payload["expected_amount"] = json!(expected);
            payload["provided_amount"] = json!(provided);
        }
        _ => {}
    }

    (status, Json(payload)).into_response()
}

fn report_error_response(err: ReportError) -> Response {
    error!(error = %err, "escrow report failed");
    let payload = json!({ "error": err.to_string(), "kind": "unavailable" });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
}

fn bad_request(message: String) -> Response {
    let payload = json!({ "error": message, "kind": "bad_request" });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

fn respond(result: Result<EscrowTransaction, EscrowError>) -> Response {
    match result {
        Ok(transaction) => (StatusCode::OK, Json(transaction)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn fund_handler<L>(
    State(service): State<SharedService<L>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<FundBody>,
) -> Response
where
    L: LedgerStore + 'static,
{
    let actor = match actor_from_headers(&headers) {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let request = FundRequest {
        project_id: ProjectId(project_id),
        amount: body.amount,
    };
    respond(service.fund(&actor, request))
}

pub(crate) async fn transaction_handler<L>(
    State(service): State<SharedService<L>>,
    Path(transaction_id): Path<String>,
) -> Response
where
    L: LedgerStore + 'static,
{
    respond(service.get(&TransactionId(transaction_id)))
}

pub(crate) async fn list_handler<L>(
    State(service): State<SharedService<L>>,
    Query(params): Query<FilterParams>,
) -> Response
where
    L: LedgerStore + 'static,
{
    let filter = match params.into_filter() {
        Ok(filter) => filter,
        Err(message) => return bad_request(message),
    };
    match service.list(&filter) {
        Ok(transactions) => (StatusCode::OK, Json(transactions)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn start_handler<L>(
    State(service): State<SharedService<L>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    L: LedgerStore + 'static,
{
    match actor_from_headers(&headers) {
        Ok(actor) => respond(service.start(&actor, &TransactionId(transaction_id))),
        Err(response) => response,
    }
}

pub(crate) async fn complete_handler<L>(
    State(service): State<SharedService<L>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    L: LedgerStore + 'static,
{
    match actor_from_headers(&headers) {
        Ok(actor) => respond(service.complete(&actor, &TransactionId(transaction_id))),
        Err(response) => response,
    }
}

pub(crate) async fn release_handler<L>(
    State(service): State<SharedService<L>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    L: LedgerStore + 'static,
{
    match actor_from_headers(&headers) {
        Ok(actor) => respond(service.release(&actor, &TransactionId(transaction_id))),
        Err(response) => response,
    }
}

pub(crate) async fn dispute_handler<L>(
    State(service): State<SharedService<L>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DisputeBody>,
) -> Response
where
    L: LedgerStore + 'static,
{
    match actor_from_headers(&headers) {
        Ok(actor) => respond(service.raise_dispute(
            &actor,
            &TransactionId(transaction_id),
            &body.reason,
        )),
        Err(response) => response,
    }
}

pub(crate) async fn resolution_handler<L>(
    State(service): State<SharedService<L>>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ResolutionBody>,
) -> Response
where
    L: LedgerStore + 'static,
{
    match actor_from_headers(&headers) {
        Ok(actor) => respond(service.resolve_dispute(
            &actor,
            &TransactionId(transaction_id),
            body.outcome,
            &body.reason,
        )),
        Err(response) => response,
    }
}

pub(crate) async fn disputes_handler<L>(State(service): State<SharedService<L>>) -> Response
where
    L: LedgerStore + 'static,
{
    match service.open_disputes() {
        Ok(disputes) => (StatusCode::OK, Json(disputes)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn summary_handler<L>(
    State(service): State<SharedService<L>>,
    Query(params): Query<FilterParams>,
) -> Response
where
    L: LedgerStore + 'static,
{
    let filter = match params.into_filter() {
        Ok(filter) => filter,
        Err(message) => return bad_request(message),
    };
    match service.reports().summary(&filter) {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => report_error_response(err),
    }
}

pub(crate) async fn revenue_handler<L>(
    State(service): State<SharedService<L>>,
    Query(params): Query<FilterParams>,
) -> Response
where
    L: LedgerStore + 'static,
{
    let filter = match params.into_filter() {
        Ok(filter) => filter,
        Err(message) => return bad_request(message),
    };
    match service.reports().revenue_by_month(&filter) {
        Ok(months) => (StatusCode::OK, Json(months)).into_response(),
        Err(err) => report_error_response(err),
    }
}

pub(crate) async fn export_handler<L>(
    State(service): State<SharedService<L>>,
    Query(params): Query<FilterParams>,
) -> Response
where
    L: LedgerStore + 'static,
{
    let filter = match params.into_filter() {
        Ok(filter) => filter,
        Err(message) => return bad_request(message),
    };
    let mut buffer = Vec::new();
    match service.reports().export_csv(&filter, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(err) => report_error_response(err),
    }
}
