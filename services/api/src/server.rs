use crate::cli::ServeArgs;
use crate::infra::{local_collaborators, AppState, InMemoryProposalDirectory};
use crate::routes::with_escrow_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use escrow_engine::config::AppConfig;
use escrow_engine::error::AppError;
use escrow_engine::escrow::{EscrowService, FileLedger, InMemoryLedger, LedgerStore};
use escrow_engine::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let proposals = match args.proposals.take() {
        Some(path) => InMemoryProposalDirectory::from_json_file(&path)?,
        None => InMemoryProposalDirectory::seeded(),
    };
    let collaborators = local_collaborators(proposals);
    let policy = config.escrow.policy()?;

    match config.escrow.ledger_path.clone() {
        Some(path) => {
            let ledger = Arc::new(FileLedger::open(&path)?);
            info!(path = %path.display(), "using file-backed escrow ledger");
            let service = Arc::new(EscrowService::new(ledger, collaborators, policy));
            serve(config, service).await
        }
        None => {
            warn!("ESCROW_LEDGER_PATH is unset; escrow ledger is in memory and lost on restart");
            let ledger = Arc::new(InMemoryLedger::new());
            let service = Arc::new(EscrowService::new(ledger, collaborators, policy));
            serve(config, service).await
        }
    }
}

async fn serve<L>(config: AppConfig, service: Arc<EscrowService<L>>) -> Result<(), AppError>
where
    L: LedgerStore + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let sweeper = spawn_review_sweeper(service.clone(), config.escrow.sweep_interval());

    let app = with_escrow_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "escrow engine ready");

    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;
    Ok(())
}

/// Periodically auto-release escrows whose client review window has elapsed.
fn spawn_review_sweeper<L>(service: Arc<EscrowService<L>>, every: Duration) -> JoinHandle<()>
where
    L: LedgerStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let service = service.clone();
            let outcome =
                tokio::task::spawn_blocking(move || service.release_elapsed_reviews(Utc::now()))
                    .await;

            match outcome {
                Ok(Ok(report)) => debug!(
                    released = report.released.len(),
                    failed = report.failed.len(),
                    "review window sweep tick"
                ),
                Ok(Err(err)) => warn!(error = %err, "review window sweep failed"),
                Err(err) => error!(error = %err, "review window sweep task panicked"),
            }
        }
    })
}
