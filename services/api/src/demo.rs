use crate::infra::{demo_proposals, local_collaborators, InMemoryProposalDirectory};
use clap::Args;
use escrow_engine::error::AppError;
use escrow_engine::escrow::{
    compute_fee, format_money, Actor, ActorRole, DisputeOutcome, EscrowError, EscrowPolicy,
    EscrowReports, EscrowService, EscrowStatus, EscrowSummary, EscrowTransaction, FeeSchedule,
    FileLedger, FundRequest, InMemoryLedger, LedgerFilter,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Engagement amount in cents for the happy-path project (defaults to the accepted proposal).
    #[arg(long)]
    pub(crate) amount: Option<i64>,
    /// Platform fee in basis points (defaults to 1000, i.e. 10%).
    #[arg(long)]
    pub(crate) fee_bps: Option<u32>,
    /// Skip the dispute portion of the demo.
    #[arg(long)]
    pub(crate) skip_dispute: bool,
}

#[derive(Args, Debug)]
pub(crate) struct LedgerReportArgs {
    /// Path to a ledger snapshot written by the server (ESCROW_LEDGER_PATH)
    #[arg(long)]
    pub(crate) ledger: PathBuf,
    /// Restrict the report to one status (e.g. completed, dispute)
    #[arg(long, value_parser = parse_status)]
    pub(crate) status: Option<EscrowStatus>,
    /// Write the CSV audit export to stdout instead of the summary
    #[arg(long)]
    pub(crate) csv: bool,
}

fn parse_status(raw: &str) -> Result<EscrowStatus, String> {
    EscrowStatus::from_label(raw).ok_or_else(|| format!("unknown escrow status '{raw}'"))
}

pub(crate) fn run_ledger_report(args: LedgerReportArgs) -> Result<(), AppError> {
    let ledger = Arc::new(FileLedger::open(&args.ledger)?);
    let reports = EscrowReports::new(ledger);
    let filter = LedgerFilter {
        status: args.status,
        ..LedgerFilter::default()
    };

    if args.csv {
        let stdout = std::io::stdout();
        reports.export_csv(&filter, stdout.lock())?;
        return Ok(());
    }

    println!("Escrow ledger report: {}", args.ledger.display());
    let summary = reports.summary(&filter)?;
    render_summary(&summary);
    let currency = summary_currency(&summary);
    let months = reports.revenue_by_month(&filter)?;
    if months.is_empty() {
        println!("\nFee revenue by month: none released yet");
    } else {
        println!("\nFee revenue by month");
        for entry in months {
            println!(
                "  {}: {} release(s), gross {}, fees {}",
                entry.period,
                entry.releases,
                format_money(entry.released_gross, currency),
                format_money(entry.fee_revenue, currency)
            );
        }
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        amount,
        fee_bps,
        skip_dispute,
    } = args;

    let mut proposals = demo_proposals();
    if let Some(amount) = amount {
        proposals[0].amount = amount;
    }
    let happy = proposals[0].clone();
    let disputed = proposals[1].clone();

    let fees = match fee_bps {
        Some(bps) => FeeSchedule::percentage(bps).map_err(EscrowError::from)?,
        None => FeeSchedule::default(),
    };
    let policy = EscrowPolicy {
        fees,
        ..EscrowPolicy::default()
    };
    let service = EscrowService::new(
        Arc::new(InMemoryLedger::new()),
        local_collaborators(InMemoryProposalDirectory::with_proposals(proposals)),
        policy,
    );

    println!("Escrow engine demo");
    let breakdown = compute_fee(happy.amount, &fees).map_err(EscrowError::from)?;
    println!(
        "Fee schedule: {} bps -> gross {}, platform fee {}, agent payout {}",
        fees.rate_bps(),
        format_money(breakdown.gross, &happy.currency),
        format_money(breakdown.fee, &happy.currency),
        format_money(breakdown.net, &happy.currency)
    );

    let client = Actor::new(happy.client_id.0.clone(), ActorRole::Client);
    let agent = Actor::new(happy.agent_id.0.clone(), ActorRole::Agent);
    println!("\nHappy path: {}", happy.project_id);
    let funded = service.fund(
        &client,
        FundRequest {
            project_id: happy.project_id.clone(),
            amount: happy.amount,
        },
    )?;
    service.start(&agent, &funded.id)?;
    service.complete(&agent, &funded.id)?;
    let released = service.release(&client, &funded.id)?;
    render_timeline(&released);

    if !skip_dispute {
        let client = Actor::new(disputed.client_id.0.clone(), ActorRole::Client);
        let agent = Actor::new(disputed.agent_id.0.clone(), ActorRole::Agent);
        let arbiter = Actor::new("arbiter-demo", ActorRole::Arbiter);
        println!("\nDispute path: {}", disputed.project_id);
        let funded = service.fund(
            &client,
            FundRequest {
                project_id: disputed.project_id.clone(),
                amount: disputed.amount,
            },
        )?;
        service.start(&agent, &funded.id)?;
        service.raise_dispute(&client, &funded.id, "no update on the file for three weeks")?;

        match service.release(&client, &funded.id) {
            Ok(_) => println!("  Unexpected: release succeeded while disputed"),
            Err(err) => println!("  Release while disputed is refused: {err}"),
        }

        let refunded = service.resolve_dispute(
            &arbiter,
            &funded.id,
            DisputeOutcome::Refund,
            "consultant could not show progress on the application",
        )?;
        render_timeline(&refunded);
    }

    println!();
    render_summary(&service.reports().summary(&LedgerFilter::default())?);
    Ok(())
}

fn render_timeline(transaction: &EscrowTransaction) {
    println!(
        "  {} is {} (gross {}, fee {}, net {})",
        transaction.id,
        transaction.status,
        format_money(transaction.gross_amount, &transaction.currency),
        format_money(transaction.platform_fee, &transaction.currency),
        format_money(transaction.net_amount, &transaction.currency)
    );
    for event in &transaction.timeline {
        println!(
            "    {} [{}] {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.kind.label(),
            event.description
        );
    }
}

fn render_summary(summary: &EscrowSummary) {
    for line in summary_lines(summary) {
        println!("{line}");
    }
}

/// Currency suffix for summary figures: the ledger's only currency, or none when mixed or empty.
fn summary_currency(summary: &EscrowSummary) -> &str {
    match summary.currencies.as_slice() {
        [only] => only.as_str(),
        _ => "",
    }
}

fn summary_lines(summary: &EscrowSummary) -> Vec<String> {
    let currency = summary_currency(summary);
    let money = |amount: i64| format_money(amount, currency);
    let mut lines = vec![
        "Escrow summary".to_string(),
        format!("  Transactions: {}", summary.transactions),
        format!("  Held in escrow: {}", money(summary.in_escrow)),
        format!("  Released: {}", money(summary.released_total)),
        format!("  Paid to agents: {}", money(summary.net_paid_out)),
        format!("  Refunded: {}", money(summary.refunded_total)),
        format!("  Fee revenue: {}", money(summary.fee_revenue)),
        format!(
            "  Disputes: {} open ({} frozen), {} raised overall",
            summary.open_disputes,
            money(summary.disputed_total),
            summary.disputes_raised
        ),
    ];
    if summary.currencies.len() > 1 {
        lines.push(format!(
            "  Warning: mixed currencies ({}); totals are not comparable",
            summary.currencies.join(", ")
        ));
    }
    lines.extend(
        summary
            .status_counts
            .iter()
            .filter(|entry| entry.count > 0)
            .map(|entry| format!("  {}: {}", entry.status_label, entry.count)),
    );
    lines
}
