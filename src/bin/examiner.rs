//! CLI binary for edgequake-examiner.
//!
//! A thin shim over the library crate: maps flags to `ExaminerConfig`,
//! wires the file-backed quota and history stores, and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_examiner::quota::current_period;
use edgequake_examiner::{
    parse_transcript, resolve_identity, Examiner, ExaminerConfig, FailurePolicy, FileQuotaStore,
    GradingProgressCallback, Identity, JsonlSubmissionStore, MarkingOutput, ParseResult,
    ProgressCallback, QuotaPolicy, QuotaStore, StaticTokenVerifier, SubmissionRecord,
    SubmissionStore, TokenVerifier, UsageSnapshot,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::PathBuf;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per graded student page. Pages finish
/// out of order, so start times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_marking_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering papers…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Marking");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl GradingProgressCallback for CliProgressCallback {
    fn on_marking_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Grading {total_pages} student pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, transcript_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{transcript_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_marking_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages graded",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages graded  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Mark a paper anonymously (3 requests per month)
  examiner mark answers.pdf scheme.pdf

  # Mark as a signed-in user; the result is saved to history
  examiner --token "$EXAMINER_TOKEN" mark answers.pdf scheme.pdf

  # Keep going when a page fails, write JSON to a file
  examiner mark --partial --json -o result.json answers.pdf scheme.pdf

  # How many requests are left this month
  examiner usage

  # Past submissions, then one in full
  examiner --token "$EXAMINER_TOKEN" history
  examiner --token "$EXAMINER_TOKEN" history 3f0c…

  # Parse a saved model transcript (no API key, no quota)
  examiner parse transcript.txt

TRANSCRIPT FORMAT (one block per question, blocks split by ---):
  Question Number: 1
  Question: State what happens when…
  Max Marks: 2
  Student Answer:
  Oxygen gas is released
  Mark: 2/2
  Comment: Correct.
  ---
  Total Marks: 2/2

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  EXAMINER_DATA_DIR       Where quota.json and submissions.jsonl live
  EXAMINER_TOKENS_FILE    JSON object mapping bearer tokens to user ids
  EXAMINER_TOKEN          Bearer token for this invocation
  EXAMINER_CLIENT         Client label for anonymous quota
  EXAMINER_USER_LIMIT     Monthly requests per signed-in user (default 10)
  EXAMINER_ANON_LIMIT     Monthly requests per anonymous client (default 3)
"#;

/// Mark scanned exam papers against a mark scheme using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "examiner",
    version,
    about = "Mark scanned exam papers against a mark scheme using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    access: AccessArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EXAMINER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EXAMINER_QUIET")]
    quiet: bool,
}

/// Identity and storage flags shared by every subcommand.
#[derive(Args, Debug)]
struct AccessArgs {
    /// Bearer token; omit to run anonymously.
    #[arg(long, global = true, env = "EXAMINER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Label anonymous usage is counted against.
    #[arg(long, global = true, env = "EXAMINER_CLIENT", default_value = "localhost")]
    client: String,

    /// Directory for quota counters and submission history.
    #[arg(long, global = true, env = "EXAMINER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON file mapping tokens to user ids.
    #[arg(long, global = true, env = "EXAMINER_TOKENS_FILE")]
    tokens_file: Option<PathBuf>,

    /// Monthly requests per signed-in user.
    #[arg(long, global = true, env = "EXAMINER_USER_LIMIT", default_value_t = 10)]
    user_limit: u32,

    /// Monthly requests per anonymous client.
    #[arg(long, global = true, env = "EXAMINER_ANON_LIMIT", default_value_t = 3)]
    anon_limit: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mark a student paper against a mark scheme.
    Mark(MarkArgs),
    /// Show this month's usage.
    Usage {
        /// Output JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// List past submissions, or show one by id.
    History {
        id: Option<String>,
        /// Output JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Parse a saved transcript (file or `-` for stdin) and print JSON.
    Parse { input: String },
}

#[derive(Args, Debug)]
struct MarkArgs {
    /// Student paper: local PDF path or HTTP/HTTPS URL.
    student: String,

    /// Mark scheme: local PDF path or HTTP/HTTPS URL.
    scheme: String,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "EXAMINER_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID (default: gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Longest edge of rendered pages in pixels.
    #[arg(long, env = "EXAMINER_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Concurrent grading calls.
    #[arg(short, long, env = "EXAMINER_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Max model output tokens per student page.
    #[arg(long, env = "EXAMINER_MAX_TOKENS", default_value_t = 1000)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "EXAMINER_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on model failure.
    #[arg(long, env = "EXAMINER_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per grading-call timeout in seconds.
    #[arg(long, env = "EXAMINER_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "EXAMINER_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Text file with a custom grading prompt.
    #[arg(long, env = "EXAMINER_PROMPT")]
    prompt: Option<PathBuf>,

    /// Return the pages that graded instead of failing on the first bad page.
    #[arg(long)]
    partial: bool,

    /// Output JSON instead of a marking breakdown.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "EXAMINER_NO_PROGRESS")]
    no_progress: bool,
}

/// File-backed stores under the data directory.
struct Stores {
    quota: Arc<FileQuotaStore>,
    history: Arc<JsonlSubmissionStore>,
}

impl Stores {
    fn open(data_dir: &Option<PathBuf>) -> Result<Self> {
        let dir = match data_dir {
            Some(d) => d.clone(),
            None => dirs::data_local_dir()
                .map(|d| d.join("edgequake-examiner"))
                .context("No platform data directory; set EXAMINER_DATA_DIR")?,
        };
        tracing::debug!("Data directory: {}", dir.display());
        Ok(Self {
            quota: Arc::new(FileQuotaStore::new(dir.join("quota.json"))),
            history: Arc::new(JsonlSubmissionStore::new(dir.join("submissions.jsonl"))),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are noise while the progress bar is drawn.
    let show_progress = match &cli.command {
        Command::Mark(m) => !cli.quiet && !m.no_progress && !m.json,
        _ => false,
    };
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

    match &cli.command {
        Command::Parse { input } => run_parse(input).await,
        Command::Mark(args) => run_mark(&cli, args, show_progress).await,
        Command::Usage { json } => run_usage(&cli, *json).await,
        Command::History { id, json } => run_history(&cli, id.as_deref(), *json).await,
    }
}

/// Verify `--token` (if any) and derive who this invocation is charged to.
async fn resolve_caller(access: &AccessArgs) -> Result<Identity> {
    let verifier = match &access.tokens_file {
        Some(path) => Some(StaticTokenVerifier::from_file(path).await?),
        None => None,
    };
    let identity = resolve_identity(
        verifier.as_ref().map(|v| v as &dyn TokenVerifier),
        access.token.as_deref(),
        &access.client,
    )
    .await
    .context("Authentication failed")?;
    Ok(identity)
}

fn quota_policy(access: &AccessArgs) -> QuotaPolicy {
    QuotaPolicy {
        user_limit: access.user_limit,
        anonymous_limit: access.anon_limit,
    }
}

// ── mark ─────────────────────────────────────────────────────────────────────

async fn run_mark(cli: &Cli, args: &MarkArgs, show_progress: bool) -> Result<()> {
    let identity = resolve_caller(&cli.access).await?;
    let stores = Stores::open(&cli.access.data_dir)?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn GradingProgressCallback>)
    } else {
        None
    };
    let config = build_config(args, progress_cb).await?;

    let examiner = Examiner::from_config(config, stores.quota.clone())
        .await
        .context("Failed to set up the grading model")?
        .with_quota_policy(quota_policy(&cli.access))
        .with_history(stores.history.clone());

    let output = examiner
        .mark_inputs(identity, &args.student, &args.scheme)
        .await
        .context("Marking failed")?;

    let rendered = if args.json {
        serde_json::to_string_pretty(&output).context("Failed to serialise output")?
    } else {
        format_breakdown(&output)
    };

    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            tokio::fs::write(path, format!("{rendered}\n"))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => println!("{rendered}"),
    }

    if !cli.quiet && !args.json {
        let s = &output.stats;
        eprintln!(
            "   {} tokens in  /  {} tokens out  —  {}ms total",
            dim(&s.total_input_tokens.to_string()),
            dim(&s.total_output_tokens.to_string()),
            s.total_duration_ms,
        );
        eprintln!("   {}", format_usage(&output.usage));
    }

    Ok(())
}

/// Map CLI args to `ExaminerConfig`.
async fn build_config(args: &MarkArgs, progress: Option<ProgressCallback>) -> Result<ExaminerConfig> {
    let mut builder = ExaminerConfig::builder()
        .max_rendered_pixels(args.max_pixels)
        .concurrency(args.concurrency)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .download_timeout_secs(args.download_timeout);

    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref name) = args.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(ref path) = args.prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read grading prompt from {:?}", path))?;
        builder = builder.grading_prompt(prompt);
    }
    if args.partial {
        builder = builder.failure_policy(FailurePolicy::Partial);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn format_breakdown(output: &MarkingOutput) -> String {
    let mut out = format_result(&output.result);
    let failed: Vec<_> = output.failed_pages().collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "\n{}", red("Pages not graded:"));
        for page in failed {
            if let Some(ref e) = page.error {
                let _ = writeln!(out, "  {} {}", red("✗"), e);
            }
        }
    }
    if let Some(ref id) = output.submission_id {
        let _ = write!(out, "\n{}", dim(&format!("Saved as submission {id}")));
    }
    out.trim_end().to_string()
}

fn format_result(result: &ParseResult) -> String {
    let mut out = String::new();
    if result.is_empty() {
        let _ = writeln!(out, "{}", dim("No questions recognised."));
    }
    for q in &result.questions {
        let label = if q.question_number.is_empty() {
            "?"
        } else {
            q.question_number.as_str()
        };
        let mark = if q.mark.is_empty() { "-" } else { q.mark.as_str() };
        let _ = writeln!(out, "{}  {}", bold(&format!("Q{label}")), cyan(mark));
        for (name, value) in [
            ("Question", &q.question),
            ("Max marks", &q.max_marks),
            ("Answer", &q.student_answer),
            ("Comment", &q.comment),
        ] {
            let value = value.trim();
            if !value.is_empty() {
                let _ = writeln!(out, "  {} {}", dim(&format!("{name}:")), value.replace('\n', "\n    "));
            }
        }
        out.push('\n');
    }
    let total = if result.total.is_empty() {
        "-"
    } else {
        result.total.as_str()
    };
    let _ = writeln!(out, "{} {}", bold("Total:"), green(total));
    out
}

fn format_usage(usage: &UsageSnapshot) -> String {
    format!(
        "{}: {}/{} requests used in {} ({} left)",
        usage.identity, usage.used, usage.limit, usage.period, usage.remaining
    )
}

// ── usage ────────────────────────────────────────────────────────────────────

async fn run_usage(cli: &Cli, json: bool) -> Result<()> {
    let identity = resolve_caller(&cli.access).await?;
    let stores = Stores::open(&cli.access.data_dir)?;
    let used = stores.quota.usage(&identity).await?;
    let snapshot = UsageSnapshot::new(
        &identity,
        used,
        quota_policy(&cli.access).limit_for(&identity),
        current_period(),
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", format_usage(&snapshot));
    }
    Ok(())
}

// ── history ──────────────────────────────────────────────────────────────────

async fn run_history(cli: &Cli, id: Option<&str>, json: bool) -> Result<()> {
    let identity = resolve_caller(&cli.access).await?;
    let uid = identity
        .uid()
        .context("History is only kept for signed-in users; pass --token")?;
    let stores = Stores::open(&cli.access.data_dir)?;

    match id {
        Some(id) => {
            let record = stores
                .history
                .get(uid, id)
                .await?
                .with_context(|| format!("No submission '{id}'"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{}", format_record_header(&record));
                println!();
                println!("{}", format_result(&record.result).trim_end());
            }
        }
        None => {
            let records = stores.history.list_for(uid).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("{}", dim("No submissions yet."));
            } else {
                for record in &records {
                    println!("{}", format_record_header(record));
                }
            }
        }
    }
    Ok(())
}

fn format_record_header(record: &SubmissionRecord) -> String {
    format!(
        "{}  {}  {} vs {}  {}",
        dim(&record.id),
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.student_file_name,
        record.scheme_file_name,
        green(if record.result.total.is_empty() {
            "-"
        } else {
            &record.result.total
        }),
    )
}

// ── parse ────────────────────────────────────────────────────────────────────

async fn run_parse(input: &str) -> Result<()> {
    let text = if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read transcript from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read transcript from {input}"))?
    };
    let result = parse_transcript(&text);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
