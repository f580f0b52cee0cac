//! CLI binary for receipt-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig`, runs a batch of object-created events against filesystem
//! stores and prints the batch report.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use receipt_ingest::store::{FsObjectStore, FsRecordStore, ObjectStore, RecordStore};
use receipt_ingest::{
    parse_event_batch, BatchReport, BodyEncoding, IngestConfig, IngestEvent,
    IngestProgressCallback, Ingestor, ProgressCallback, SinkKind,
};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress callback: a live bar plus one log line per event.
/// Events complete out of order, so start times are tracked per index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} receipts  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Ingesting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_event_start(&self, index: usize, key: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(key.to_string());
    }

    fn on_event_complete(&self, index: usize, key: &str, status: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {}  {:<12}  {}",
            green("✓"),
            key,
            dim(status),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_event_error(&self, index: usize, key: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            key,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_events: usize, ok_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} receipts ingested", green("✔"), bold(&ok_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} receipts ingested  ({} failed)",
                red("✘"),
                bold(&ok_count.to_string()),
                total_events,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a notification document against ./objects, records in ./records
  receipt-ingest event.json

  # Read the notification from stdin
  cat event.json | receipt-ingest -

  # Ad-hoc objects, no notification document
  receipt-ingest --object inbox/receipts/img/alice/2025-09-14.jpg

  # Write companion JSON next to each image instead of records
  receipt-ingest --sink companion --body-encoding base64-text event.json

  # Allowed categories, NDJSON outcomes as they finish
  receipt-ingest --categories Food,Travel,Office --stream event.json

OBJECT LAYOUT:
  <objects-root>/<container>/<key>        source images
  <records-dir>/<owner>/<date>.json       stored records

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (default provider when set)
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (anthropic, openai, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  ANTHROPIC_MAX_TOKENS    Max output tokens per receipt (default 1000)
  RECEIPTS_TABLE          Name reported as output_bucket for record writes
"#;

/// Extract structured expense records from receipt images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "receipt-ingest",
    version,
    about = "Extract structured expense records from receipt images using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Notification document (S3-style `Records` JSON), or `-` for stdin.
    event: Option<String>,

    /// Ad-hoc source object as `<container>/<key>`. Repeatable.
    #[arg(long = "object", value_name = "CONTAINER/KEY")]
    objects: Vec<String>,

    /// Directory holding one subdirectory per container.
    #[arg(long, env = "RECEIPT_OBJECTS_ROOT", default_value = "objects")]
    objects_root: PathBuf,

    /// Directory records are written under.
    #[arg(long, env = "RECEIPT_RECORDS_DIR", default_value = "records")]
    records_dir: PathBuf,

    /// LLM model ID (e.g. claude-sonnet-4-20250514, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: anthropic, openai, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Categories the model may assign. `Other` is always allowed.
    #[arg(long, env = "RECEIPT_CATEGORIES", value_delimiter = ',')]
    categories: Vec<String>,

    /// Where results go.
    #[arg(long, env = "RECEIPT_SINK", value_enum, default_value = "records")]
    sink: SinkArg,

    /// How source object bodies are encoded.
    #[arg(long, env = "RECEIPT_BODY_ENCODING", value_enum, default_value = "raw")]
    body_encoding: EncodingArg,

    /// Key prefix for companion documents.
    #[arg(long, env = "RECEIPT_RESULTS_PREFIX", default_value = "receipts-json/")]
    results_prefix: String,

    /// Name reported as `output_bucket` for record writes.
    #[arg(long, env = "RECEIPTS_TABLE", default_value = "receipts")]
    table: String,

    /// Max LLM output tokens per receipt.
    #[arg(long, env = "ANTHROPIC_MAX_TOKENS", default_value_t = 1000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "RECEIPT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries for transient oracle and store failures.
    #[arg(long, env = "RECEIPT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry delay in milliseconds.
    #[arg(long, env = "RECEIPT_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "RECEIPT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Events processed at once.
    #[arg(short, long, env = "RECEIPT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print each outcome as a JSON line as soon as it finishes.
    #[arg(long)]
    stream: bool,

    /// Read each model reply as a token stream.
    #[arg(long, env = "RECEIPT_STREAMING_ORACLE")]
    streaming_oracle: bool,

    /// Pretty-print the batch report.
    #[arg(long)]
    pretty: bool,

    /// Disable progress bar.
    #[arg(long, env = "RECEIPT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RECEIPT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the report.
    #[arg(short, long, env = "RECEIPT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SinkArg {
    Records,
    Companion,
}

impl From<SinkArg> for SinkKind {
    fn from(v: SinkArg) -> Self {
        match v {
            SinkArg::Records => SinkKind::Records,
            SinkArg::Companion => SinkKind::Companion,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EncodingArg {
    Raw,
    Base64Text,
}

impl From<EncodingArg> for BodyEncoding {
    fn from(v: EncodingArg) -> Self {
        match v {
            EncodingArg::Raw => BodyEncoding::Raw,
            EncodingArg::Base64Text => BodyEncoding::Base64Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.stream;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Collect events ───────────────────────────────────────────────────
    let events = collect_events(&cli)?;
    if events.is_empty() {
        anyhow::bail!("No events to process: pass a notification document or --object");
    }

    // ── Build config & ingestor ──────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new(events.len()) as Arc<dyn IngestProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&cli.objects_root));
    let records: Arc<dyn RecordStore> = Arc::new(FsRecordStore::new(&cli.records_dir));
    let ingestor =
        Ingestor::from_config(objects, records, config).context("Failed to set up the LLM provider")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let report = if cli.stream {
        let mut outcomes = ingestor.process_stream(events);
        let mut results = Vec::new();
        while let Some(outcome) = outcomes.next().await {
            println!(
                "{}",
                serde_json::to_string(&outcome).context("Failed to serialise outcome")?
            );
            results.push(outcome);
        }
        BatchReport { results }
    } else {
        let report = ingestor.process_batch(&events).await;
        let json = if cli.pretty {
            serde_json::to_string_pretty(&report)
        } else {
            serde_json::to_string(&report)
        }
        .context("Failed to serialise report")?;
        println!("{json}");
        report
    };

    if !cli.quiet && !show_progress {
        eprintln!(
            "Ingested {}/{} receipts",
            report.ok_count(),
            report.results.len()
        );
    }

    if report.failed_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Read the notification document and/or `--object` arguments.
fn collect_events(cli: &Cli) -> Result<Vec<IngestEvent>> {
    let mut events = Vec::new();

    if let Some(ref source) = cli.event {
        let json = if source == "-" {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            buf
        } else {
            std::fs::read_to_string(source)
                .with_context(|| format!("Failed to read event document {source:?}"))?
        };
        events.extend(parse_event_batch(&json).context("Invalid event document")?);
    }

    for arg in &cli.objects {
        let (container, key) = arg
            .split_once('/')
            .filter(|(c, k)| !c.is_empty() && !k.is_empty())
            .with_context(|| format!("--object expects <container>/<key>, got {arg:?}"))?;
        events.push(IngestEvent::new(container, key));
    }

    Ok(events)
}

/// Map CLI args to `IngestConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .categories(cli.categories.iter().cloned())
        .sink(cli.sink.into())
        .body_encoding(cli.body_encoding.into())
        .results_prefix(cli.results_prefix.clone())
        .table_name(cli.table.clone())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .concurrency(cli.concurrency)
        .streaming_oracle(cli.streaming_oracle);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
