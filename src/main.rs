use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use churnguard::api::{self, ApiState};
use churnguard::config::AppConfig;
use churnguard::error::AppError;
use churnguard::ingest::service::IngestService;
use churnguard::playbooks::dispatcher::PlaybookDispatcher;
use churnguard::playbooks::outbox::{
    DeliveryError, MailReceipt, MailSender, OutboundEmail, OutboxWorker, WebhookClient,
};
use churnguard::playbooks::PlaybookDefinition;
use churnguard::reporting;
use churnguard::scoring::{ScoringEngine, ScoringWeights};
use churnguard::store::memory::{
    InMemoryCouponRepository, InMemoryOutbox, InMemoryPlaybookStore, InMemoryRecordStore,
    InMemoryTriggerLog,
};
use churnguard::store::RecordStore;
use churnguard::telemetry;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "churnguard",
    about = "Run the churn scoring and retention playbook service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Score a CSV export offline and print the population summary
    Score(ScoreArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
    /// JSON file with playbook definitions to load at startup
    #[arg(long)]
    playbooks: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// CSV export to run through the scoring pipeline
    #[arg(long)]
    csv: PathBuf,
    /// Optional playbook definitions to dispatch against
    #[arg(long)]
    playbooks: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Score(args) => run_score(args).await,
    }
}

/// Demo collaborators: deliveries are logged rather than sent. Production
/// deployments plug in real provider clients behind the same traits.
struct LoggingMailSender;

impl MailSender for LoggingMailSender {
    fn send(&self, mail: &OutboundEmail) -> Result<MailReceipt, DeliveryError> {
        info!(recipient = %mail.recipient, subject = %mail.subject, "demo mail delivery");
        Ok(MailReceipt {
            provider_message_id: format!("demo-{}", Uuid::new_v4()),
        })
    }
}

struct LoggingWebhookClient;

impl WebhookClient for LoggingWebhookClient {
    fn post_json(&self, url: &str, payload: &Value) -> Result<u16, DeliveryError> {
        info!(url, %payload, "demo webhook delivery");
        Ok(200)
    }
}

struct Core {
    service: Arc<IngestService>,
    records: Arc<InMemoryRecordStore>,
    coupons: Arc<InMemoryCouponRepository>,
    worker: Arc<OutboxWorker>,
}

fn build_core(config: &AppConfig, playbooks: Vec<PlaybookDefinition>) -> Core {
    let records = Arc::new(InMemoryRecordStore::default());
    let playbook_store = Arc::new(InMemoryPlaybookStore::default());
    for definition in playbooks {
        playbook_store.put(definition);
    }
    let trigger_log = Arc::new(InMemoryTriggerLog::default());
    let outbox = Arc::new(InMemoryOutbox::default());
    let coupons = Arc::new(InMemoryCouponRepository::default());

    let dispatcher = Arc::new(PlaybookDispatcher::new(
        playbook_store,
        trigger_log.clone(),
        outbox.clone(),
        records.clone(),
        config.dispatch.clone(),
    ));
    let worker = Arc::new(OutboxWorker::new(
        outbox,
        trigger_log,
        Arc::new(LoggingMailSender),
        Arc::new(LoggingWebhookClient),
        coupons.clone(),
        config.dispatch.clone(),
    ));
    let service = Arc::new(IngestService::new(
        ScoringEngine::new(ScoringWeights::default()),
        records.clone(),
        dispatcher,
        config.ingest.clone(),
    ));

    Core {
        service,
        records,
        coupons,
        worker,
    }
}

fn load_playbooks(path: Option<&PathBuf>) -> Result<Vec<PlaybookDefinition>, AppError> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(AppError::PlaybookFile)
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let playbooks = load_playbooks(args.playbooks.as_ref())?;
    let core = build_core(&config, playbooks);

    // Deliveries happen off the request path; the worker owns retries.
    let worker = core.worker.clone();
    tokio::spawn(async move {
        loop {
            if let Err(err) = worker.drain().await {
                tracing::warn!(error = %err, "outbox drain failed");
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));

    let app = api::router(ApiState {
        readiness: readiness_flag.clone(),
        service: core.service,
        records: core.records,
        coupons: core.coupons,
    })
    .merge(
        Router::new()
            .route("/metrics", get(metrics_endpoint))
            .with_state(prometheus_handle),
    )
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "churn scoring service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_endpoint(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

async fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let playbooks = load_playbooks(args.playbooks.as_ref())?;
    let core = build_core(&config, playbooks);

    let upload = std::fs::read_to_string(&args.csv)?;
    let report = core
        .service
        .clone()
        .ingest_bulk(Cursor::new(upload.into_bytes()))
        .await?;
    let delivered = core.worker.drain().await?;

    println!("Churn scoring run");
    println!(
        "Rows: {} total, {} scored, {} failed",
        report.total_rows, report.succeeded, report.failed
    );
    if !report.error_sample.is_empty() {
        println!("\nRow errors (sample)");
        for error in &report.error_sample {
            println!("- {error}");
        }
    }
    println!(
        "Actions: {} queued, {} delivered",
        report.actions_queued, delivered
    );

    let rollup = reporting::aggregate(&core.records.all_scored()?);
    println!("\nRisk tiers");
    println!("- high: {}", rollup.tiers.high);
    println!("- medium: {}", rollup.tiers.medium);
    println!("- low: {}", rollup.tiers.low);

    println!("\nTop churn reasons");
    for reason in rollup.reasons.iter().take(5) {
        println!(
            "- {}: {} customer(s) ({:.0}%)",
            reason.reason,
            reason.count,
            reason.share * 100.0
        );
    }

    Ok(())
}
