//! CLI binary for file2md.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `ConversionConfig`, runs one conversion and writes the result.
//! Any failure exits with status 135 and writes nothing.
//!
//! `.env` in the working directory is loaded before flags are parsed, and
//! every run writes a DEBUG log to `logs/file2md_<timestamp>.log`.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use file2md::{
    convert, convert_to_file, default_output_path, file_config, join_pages, ConversionConfig,
    ConversionProgressCallback, FileOptions, Mode, OcrBackend, Orientation, PageSeparator,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const FAILURE_EXIT_CODE: u8 = 135;

/// The log file records everything at DEBUG except HTTP plumbing.
const FILE_LOG_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info,h2=info";

// ── ANSI colour helpers ──────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────

/// Spinner during extraction, then a page bar while the cleaner runs.
struct CliProgressCallback {
    bar: ProgressBar,
    cleaning: bool,
}

impl CliProgressCallback {
    fn new(cleaning: bool) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar, cleaning })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, mode: Mode) {
        self.bar.set_prefix("Extracting");
        self.bar.set_message(format!("reading {mode} input…"));
    }

    fn on_image_recognized(&self, image_num: usize, total_images: usize) {
        self.bar
            .set_message(format!("OCR image {image_num}/{total_images}"));
    }

    fn on_extraction_complete(&self, total_pages: usize) {
        if !self.cleaning {
            self.bar.set_message(format!("{total_pages} pages extracted"));
            return;
        }
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Cleaning");
        self.bar.reset_eta();
    }

    fn on_cleanup_retry(&self, page_num: usize, attempt: u32, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} Page {:>3}  retry {}  {}",
            yellow("↻"),
            page_num,
            attempt,
            dim(&msg),
        ));
    }

    fn on_page_cleaned(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{markdown_len:>5} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, _total_pages: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF report, embedded images OCR'd with a vision model, indicators defanged
  file2md --mode pdf --file report.pdf

  # Readable part of a blog post only, OCR via local tesseract
  file2md --mode html_article --file post.html --ocr-backend tesseract

  # Table of indicators, no defanging, to stdout
  file2md --mode csv --file iocs.csv --defang no --output -

  # Screenshot, then LLM cleanup using a specific key file
  file2md --mode image --file shot.png --clean-with-llm yes --keyfile ~/.file2md/key.json

  # Stats and pages as JSON
  file2md --mode html --file page.html --json > out.json

KEY FILE (keys/key.json):
  { "provider": "openai", "model": "gpt-4.1-nano", "api_key": "sk-...",
    "env": { "OPENAI_BASE_URL": "..." } }
  Read only when vision OCR or LLM cleanup is enabled. Variables already
  set in the environment take precedence.

LOGS:
  Every run writes a DEBUG log to logs/file2md_<YYYYmmdd-HHMMSS_micros>.log
  (see --log-dir, --no-log-file). The console shows INFO and above.

ENVIRONMENT VARIABLES:
  .env              Loaded from the working directory first; never overrides
  FILE2MD_*         Every flag has a FILE2MD_ fallback (e.g. FILE2MD_MODE)
  PDFIUM_LIB_PATH   Directory (or file) of the pdfium shared library
  RUST_LOG          Overrides the log filter
"#;

/// Convert CSV, HTML, images and PDF to paginated, defanged Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "file2md",
    version,
    about = "Convert CSV, HTML, images and PDF to paginated, defanged Markdown",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input kind: csv, html, html_article, image, pdf.
    #[arg(short, long, env = "FILE2MD_MODE")]
    mode: String,

    /// Input document.
    #[arg(short, long, env = "FILE2MD_FILE")]
    file: PathBuf,

    /// Output Markdown file; `-` for stdout. Default: `{stem}.file2md-{mode}.md` next to the input.
    #[arg(short, long, env = "FILE2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// OCR images embedded in HTML and PDF (image mode always OCRs).
    #[arg(long, env = "FILE2MD_EXTRACT_TEXT_FROM_IMAGE", default_value = "yes",
          action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "yes",
          value_parser = parse_flag)]
    extract_text_from_image: bool,

    /// Defang URLs, IP addresses and e-mail addresses.
    #[arg(long, env = "FILE2MD_DEFANG", default_value = "yes",
          action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "yes",
          value_parser = parse_flag)]
    defang: bool,

    /// Pass every page through an LLM cleanup step.
    #[arg(long, env = "FILE2MD_CLEAN_WITH_LLM", default_value = "no",
          action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "yes",
          value_parser = parse_flag)]
    clean_with_llm: bool,

    /// JSON key file naming the LLM provider. Default: keys/key.json.
    #[arg(short, long, env = "FILE2MD_KEYFILE")]
    keyfile: Option<PathBuf>,

    /// OCR backend: vision or tesseract.
    #[arg(long, env = "FILE2MD_OCR_BACKEND", default_value = "vision", value_parser = parse_backend)]
    ocr_backend: OcrBackend,

    /// Image orientation hint for OCR: auto or upright.
    #[arg(long, env = "FILE2MD_ORIENTATION", default_value = "auto", value_parser = parse_orientation)]
    orientation: Orientation,

    /// Concurrent OCR calls.
    #[arg(long, env = "FILE2MD_OCR_CONCURRENCY", default_value_t = 4)]
    ocr_concurrency: usize,

    /// Concurrent cleanup calls.
    #[arg(long, env = "FILE2MD_CLEANUP_CONCURRENCY", default_value_t = 1)]
    cleanup_concurrency: usize,

    /// Cleanup retries per page.
    #[arg(long, env = "FILE2MD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Render unreachable or undecodable embedded images as a marker instead of failing.
    #[arg(long, env = "FILE2MD_SKIP_UNREADABLE_IMAGES")]
    skip_unreadable_images: bool,

    /// Page separator: break, hr, comment, or a custom string.
    #[arg(long, env = "FILE2MD_SEPARATOR", default_value = "break")]
    separator: String,

    /// Print pages and stats as JSON on stdout instead of writing Markdown.
    #[arg(long, env = "FILE2MD_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "FILE2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Directory for the per-run DEBUG log file.
    #[arg(long, env = "FILE2MD_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Do not write a log file.
    #[arg(long, env = "FILE2MD_NO_LOG_FILE")]
    no_log_file: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FILE2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FILE2MD_QUIET")]
    quiet: bool,
}

/// Accept the spellings shell scripts use for booleans.
fn parse_flag(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "on" => Ok(true),
        "no" | "n" | "false" | "0" | "off" => Ok(false),
        other => Err(format!("expected yes/no/true/false/1/0, got '{other}'")),
    }
}

fn parse_backend(s: &str) -> Result<OcrBackend, String> {
    s.parse().map_err(|e: file2md::ConvertError| e.to_string())
}

fn parse_orientation(s: &str) -> Result<Orientation, String> {
    s.parse().map_err(|e: file2md::ConvertError| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs would fight with the spinner; show them only without it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    let console = fmt::layer().with_writer(io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
    );

    let log_file = (!cli.no_log_file).then(|| open_log_file(&cli.log_dir, Local::now().naive_local()));
    let (file_layer, log_path) = match log_file {
        Some(Ok((path, file))) => {
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(EnvFilter::new(FILE_LOG_FILTER));
            (Some(layer), Ok(Some(path)))
        }
        Some(Err(e)) => (None, Err(e)),
        None => (None, Ok(None)),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    match log_path {
        Ok(Some(path)) => info!("writing logs to {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("Cannot create a log file in {}: {}", cli.log_dir.display(), e),
    }

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", red("✘"), e);
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}

fn log_file_name(started: NaiveDateTime) -> String {
    format!("file2md_{}.log", started.format("%Y%m%d-%H%M%S_%6f"))
}

/// Create `dir` if needed and open a fresh log file in it.
fn open_log_file(dir: &Path, started: NaiveDateTime) -> io::Result<(PathBuf, File)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(started));
    let file = File::create(&path)?;
    Ok((path, file))
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let mode: Mode = cli.mode.parse().context("Invalid --mode")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new(cli.clean_with_llm);
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(cli, mode, progress_cb)?;

    if cli.json {
        let output = convert(&cli.mode, &cli.file, &config)
            .await
            .context("Conversion failed")?;
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    let to_stdout = cli.output.as_deref().is_some_and(|p| p.as_os_str() == "-");
    if to_stdout {
        let output = convert(&cli.mode, &cli.file, &config)
            .await
            .context("Conversion failed")?;
        let markdown = join_pages(&output.pages, &config.page_separator);
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !markdown.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
        return Ok(());
    }

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.file, mode));
    let stats = convert_to_file(&cli.mode, &cli.file, &output_path, &config)
        .await
        .context("Conversion failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            green("✔"),
            stats.total_pages,
            stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        eprintln!(
            "   {} images OCR'd  /  {} pages defanged  /  {} pages cleaned",
            dim(&stats.images_recognized.to_string()),
            dim(&stats.pages_defanged.to_string()),
            dim(&stats.pages_cleaned.to_string()),
        );
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, mode: Mode, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let opts = FileOptions {
        credentials_path: cli.keyfile.clone(),
        ocr_enabled: cli.extract_text_from_image,
        defang_enabled: cli.defang,
        clean_with_llm: cli.clean_with_llm,
        ocr_backend: cli.ocr_backend,
    };

    let mut builder = ConversionConfig::builder()
        .ocr_concurrency(cli.ocr_concurrency)
        .cleanup_concurrency(cli.cleanup_concurrency)
        .max_retries(cli.max_retries)
        .orientation(cli.orientation)
        .skip_unreadable_images(cli.skip_unreadable_images)
        .page_separator(PageSeparator::parse(&cli.separator));

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    file_config(mode, &opts, builder).context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(micros: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_micro_opt(7, 5, 1, micros)
            .unwrap()
    }

    #[test]
    fn log_file_name_carries_a_microsecond_timestamp() {
        assert_eq!(log_file_name(at(42)), "file2md_20240309-070501_000042.log");
    }

    #[test]
    fn log_file_is_created_with_its_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");
        let (path, _file) = open_log_file(&dir, at(7)).unwrap();
        assert!(path.exists());
        assert_eq!(path.parent(), Some(dir.as_path()));
    }

    #[test]
    fn flags_accept_shell_spellings() {
        assert_eq!(parse_flag("Yes"), Ok(true));
        assert_eq!(parse_flag("off"), Ok(false));
        assert!(parse_flag("maybe").is_err());
    }
}
