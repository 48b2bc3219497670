//! CLI binary for mantra-ocr.
//!
//! A thin shim over the library crate that maps CLI flags to `OcrConfig`,
//! renders a progress bar, and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use mantra_ocr::{
    BackendChoice, OcrConfig, OcrPipeline, OcrProgressCallback, PageSelection, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus per-page log lines.
/// Pages complete out of order, so every line carries its page number.
struct CliProgressCallback {
    bar: ProgressBar,
    escalations: AtomicU32,
}

impl CliProgressCallback {
    /// Bar length is set by `on_run_start` once the pending count is known.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            escalations: AtomicU32::new(0),
        })
    }

    fn activate_bar(&self, pending: u32) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(pending as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Recognising");
        self.bar.reset_eta();
    }
}

impl OcrProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: u32, pending: u32) {
        self.activate_bar(pending);
        let resumed = total_pages.saturating_sub(pending);
        let note = if resumed > 0 {
            format!(" ({} pages already done)", resumed)
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {pending} pages…{note}"))
        ));
    }

    fn on_page_start(&self, page: u32, _total: u32) {
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_complete(&self, page: u32, total: u32, engine: &str, confidence: f32) {
        self.bar.println(format!(
            "  {} Page {:>4}/{:<4}  {:<24}  {}",
            green("✓"),
            page,
            total,
            dim(engine),
            dim(&format!("conf {confidence:.2}")),
        ));
        self.bar.inc(1);
    }

    fn on_page_escalated(&self, page: u32, reason: &str) {
        self.escalations.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>4}  {}",
            yellow("↑"),
            page,
            dim(reason),
        ));
    }

    fn on_page_failed(&self, page: u32, total: u32, error: &str) {
        let msg = if error.chars().count() > 80 {
            let truncated: String = error.chars().take(79).collect();
            format!("{truncated}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>4}/{:<4}  {}",
            red("✗"),
            page,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _total_pages: u32, completed: u32, failed: u32) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} pages recognised successfully",
                green("✔"),
                bold(&completed.to_string())
            );
        } else {
            eprintln!(
                "{} {} pages recognised  ({} failed)",
                if completed == 0 { red("✘") } else { cyan("⚠") },
                bold(&completed.to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Hybrid OCR (tesseract + VLM escalation), all pages
  mantra-ocr scripture.pdf

  # Specific pages, tesseract only (no API key needed)
  mantra-ocr --backend tesseract --pages 1-50 scripture.pdf

  # VLM for every page, tighter rate limit
  mantra-ocr --backend vlm --rpm 15 scripture.pdf

  # Resume an interrupted run (automatic — just run again)
  mantra-ocr scripture.pdf

  # See what a run would do without doing it
  mantra-ocr --dry-run scripture.pdf

  # Lenient mantra detection (fewer escalations, lower cost)
  mantra-ocr --lenient-detection scripture.pdf

OUTPUT FILES (written next to the input PDF):
  {stem}_unicode.md          merged OCR output, pages in order
  .ocr_progress_{stem}.json  resume state
  .ocr_cache_{stem}/         per-page text cache

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default VLM)
  OPENAI_API_KEY          OpenAI API key
  PDFIUM_LIB_PATH         Path to an existing libpdfium

SETUP:
  1. Install tesseract:   apt install tesseract-ocr tesseract-ocr-hin tesseract-ocr-san
  2. Set API key:         export GEMINI_API_KEY=...
  3. Run:                 mantra-ocr scripture.pdf
"#;

/// OCR scanned Hindi/Sanskrit documents with hybrid local/VLM routing.
#[derive(Parser, Debug)]
#[command(
    name = "mantra-ocr",
    version,
    about = "OCR scanned Hindi/Sanskrit texts, escalating mantra pages to a vision model",
    long_about = "Recognise scanned Devanagari documents page by page. Every page runs through \
local tesseract first; pages with low confidence or mantra content escalate to a vision \
language model. Results are cached per page and runs resume automatically after interruption.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Engine selection: tesseract, vlm, or hybrid.
    #[arg(short, long, env = "MANTRA_OCR_BACKEND", default_value = "hybrid")]
    backend: String,

    /// Page selection: all, 5, 1-50, or 1,5,10-20.
    #[arg(short, long, env = "MANTRA_OCR_PAGES", default_value = "all")]
    pages: String,

    /// Pages recognised concurrently.
    #[arg(short, long, env = "MANTRA_OCR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Pages rasterised concurrently.
    #[arg(long, env = "MANTRA_OCR_RENDER_WORKERS", default_value_t = 4)]
    render_workers: usize,

    /// Sustained VLM requests per minute.
    #[arg(long, env = "MANTRA_OCR_RPM", default_value_t = 30)]
    rpm: u32,

    /// Burst size the rate limiter allows after idle periods.
    #[arg(long, env = "MANTRA_OCR_BURST", default_value_t = 8)]
    burst: u32,

    /// Rendering DPI (72-400).
    #[arg(long, env = "MANTRA_OCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Password for encrypted PDFs.
    #[arg(long, env = "MANTRA_OCR_PASSWORD")]
    password: Option<String>,

    /// Tesseract language pack(s), e.g. hin, san, hin+san.
    #[arg(short, long, env = "MANTRA_OCR_LANG", default_value = "hin+san")]
    language: String,

    /// Tesseract confidence below which a page escalates (hybrid mode).
    #[arg(long, env = "MANTRA_OCR_CONFIDENCE", default_value_t = 0.75)]
    confidence_threshold: f32,

    /// Lenient mantra detection: require corroborating signals to escalate.
    #[arg(long, env = "MANTRA_OCR_LENIENT")]
    lenient_detection: bool,

    /// VLM model ID (e.g. gemini-2.5-flash).
    #[arg(long, env = "MANTRA_OCR_MODEL")]
    model: Option<String>,

    /// VLM provider: gemini, openai, ollama. Auto-detected if unset.
    #[arg(long, env = "MANTRA_OCR_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom OCR prompt.
    #[arg(long, env = "MANTRA_OCR_PROMPT")]
    prompt: Option<PathBuf>,

    /// Recognition attempts per page, including the first.
    #[arg(long, env = "MANTRA_OCR_MAX_ATTEMPTS", default_value_t = 4)]
    max_attempts: u32,

    /// Base retry backoff in seconds.
    #[arg(long, env = "MANTRA_OCR_RETRY_BASE", default_value_t = 2.0)]
    retry_base: f64,

    /// Max VLM output tokens per page.
    #[arg(long, env = "MANTRA_OCR_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Show what the run would do (pending pages, estimate) and exit.
    #[arg(long)]
    dry_run: bool,

    /// Disable the progress bar.
    #[arg(long, env = "MANTRA_OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MANTRA_OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MANTRA_OCR_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MANTRA_OCR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-VLM-call timeout in seconds.
    #[arg(long, env = "MANTRA_OCR_API_TIMEOUT", default_value_t = 90)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress INFO-level library logs when the progress bar is active; the
    // bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.dry_run;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn OcrProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let pipeline = OcrPipeline::new(config);

    // ── Dry run ──────────────────────────────────────────────────────────
    if cli.dry_run {
        let plan = pipeline
            .plan(&cli.input)
            .await
            .context("Failed to inspect document")?;
        println!("Document:        {}", plan.document_id);
        println!("Total pages:     {}", plan.total_pages);
        println!("Requested:       {}", plan.requested);
        println!("Already done:    {}", plan.cached);
        println!("Pending:         {}", plan.pending.len());
        if plan.cached > 0 {
            println!("                 (resuming an earlier run)");
        }
        println!(
            "Estimated time:  ~{:.0} min at {} req/min (worst case, hybrid is usually faster)",
            plan.estimated_minutes.max(1.0),
            cli.rpm
        );
        if plan.estimated_cost > 0.0 {
            println!("Estimated cost:  ~${:.4}", plan.estimated_cost);
        } else {
            println!("Estimated cost:  free (local recognition only)");
        }
        return Ok(());
    }

    // ── Ctrl-C: stop dispatching, let in-flight pages finish ────────────
    let token = pipeline.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} shutdown requested — finishing in-flight pages (Ctrl-C again to abort)",
                yellow("⚠")
            );
            token.request();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = pipeline.run(&cli.input).await.context("OCR run failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {}/{} pages  →  {}",
            if summary.failed == 0 { green("✔") } else { cyan("⚠") },
            summary.completed + summary.skipped_cached,
            summary.requested,
            bold(&summary.output_file.display().to_string()),
        );
        if summary.tokens.api_calls > 0 {
            eprintln!(
                "   {} VLM calls  {} in / {} out tokens  ≈ {}",
                dim(&summary.tokens.api_calls.to_string()),
                dim(&summary.tokens.input_tokens.to_string()),
                dim(&summary.tokens.output_tokens.to_string()),
                bold(&format!("${:.4}", summary.tokens.total_cost())),
            );
        }
        if let Some(stats) = summary.hybrid {
            eprintln!(
                "   {} pages stayed local ({}% saved), {} escalated for mantras, {} for low confidence",
                stats.primary_only,
                stats.savings_pct() as u32,
                stats.escalated_mantra,
                stats.escalated_low_confidence,
            );
        }
        if summary.interrupted {
            eprintln!(
                "   {} interrupted — run the same command again to resume",
                yellow("⚠")
            );
        }
    }

    Ok(())
}

/// Map CLI args to `OcrConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<OcrConfig> {
    let backend: BackendChoice = cli
        .backend
        .parse()
        .with_context(|| format!("Invalid --backend '{}'", cli.backend))?;
    let pages: PageSelection = cli
        .pages
        .parse()
        .with_context(|| format!("Invalid --pages '{}'", cli.pages))?;

    let prompt = if let Some(ref path) = cli.prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = OcrConfig::builder()
        .backend(backend)
        .pages(pages)
        .concurrency(cli.concurrency)
        .render_workers(cli.render_workers)
        .requests_per_minute(cli.rpm)
        .burst_capacity(cli.burst)
        .dpi(cli.dpi)
        .language(cli.language.clone())
        .confidence_threshold(cli.confidence_threshold)
        .strict_detection(!cli.lenient_detection)
        .max_attempts(cli.max_attempts)
        .retry_base_secs(cli.retry_base)
        .max_tokens(cli.max_tokens)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(password) = cli.password.clone() {
        builder = builder.password(password);
    }
    if let Some(model) = cli.model.clone() {
        builder = builder.model(model);
    }
    if let Some(provider) = cli.provider.clone() {
        builder = builder.provider_name(provider);
    }
    if let Some(p) = prompt {
        builder = builder.prompt(p);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
