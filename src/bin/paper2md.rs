//! CLI binary for paper2md.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`, runs
//! one session end to end (process → translate → export → graph → snapshot)
//! and reports where the outputs went.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paper2md::{
    ExportOptions, GraphExtraction, PageSelection, PageSeparator, PageState, PipelineConfig,
    PipelineObserver, Rect, Session, TranslationBackend, TranslationConfig, TranslationScope,
};
use std::collections::HashMap;
use std::io::{self, Write};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Live progress bar plus one log line per settled page. Pages settle out of
/// order when processed concurrently.
struct CliObserver {
    bar: ProgressBar,
    /// When each page entered `OcrPending`.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page))
            .map_or(0.0, |t| t.elapsed().as_secs_f64())
    }
}

impl PipelineObserver for CliObserver {
    fn on_run_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_pages} pages…"))
        ));
    }

    fn on_page_state(&self, page: usize, state: &PageState) {
        match state {
            PageState::OcrPending => {
                if let Ok(mut m) = self.start_times.lock() {
                    m.insert(page, Instant::now());
                }
                self.bar.set_message(format!("page {} OCR", page + 1));
            }
            PageState::StructurePending => {
                self.bar.set_message(format!("page {} structure", page + 1));
            }
            _ => {}
        }
    }

    fn on_page_complete(&self, page: usize, total_pages: usize, paragraphs: usize) {
        let secs = self.elapsed_secs(page);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<16}  {}",
            green("✓"),
            page + 1,
            total_pages,
            dim(&format!("{paragraphs:>4} paragraphs")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let secs = self.elapsed_secs(page);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page + 1,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, succeeded: usize) {
        let failed = self.errors.swap(0, Ordering::SeqCst);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {}/{} pages structured",
                green("✔"),
                bold(&succeeded.to_string()),
                total_pages
            );
        } else {
            eprintln!(
                "{} {}/{} pages structured  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Structure a paper, write Markdown and a knowledge graph to ./export
  paper2md paper.pdf

  # From arXiv or Hugging Face (downloaded once into the cache dir)
  paper2md https://arxiv.org/abs/1706.03762
  paper2md https://huggingface.co/papers/1706.03762

  # Ignore every cached result and start over
  paper2md --i paper.pdf

  # Tighter safe area (x1,y1,x2,y2 as page fractions, origin top-left)
  paper2md --safe-area 0.1,0.1,0.9,0.9 paper.pdf

  # Translate into Korean with the DeepL-compatible backend
  paper2md --translate --translator deepl paper.pdf

  # Heading outline instead of an LLM-extracted graph
  paper2md --outline-graph paper.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY             OpenAI API key
  EDGEQUAKE_LLM_PROVIDER     Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL            Override model ID
  CACHE_DIR                  Cache directory (stage outputs, downloads, snapshots)
  EXPORT_DIR                 Output directory
  PROMPT_DIR                 Directory with prompt overrides
  DEEPL_RAPID_API_KEY        DeepL-compatible API key
  DEEPL_RAPID_API_HOST       DeepL-compatible API host
  DEEPL_RAPID_API_SRC_LANG   Source language (default AUTO)
  DEEPL_RAPID_API_DST_LANG   Target language (default KO)
  PDFIUM_LIB_PATH            Directory containing libpdfium

PROMPT OVERRIDES (in PROMPT_DIR):
  ocr.txt  structure.txt  translate.txt  extract_knowledge_graph.txt
"#;

/// Turn research PDFs into structured Markdown and a knowledge graph.
#[derive(Parser, Debug)]
#[command(
    name = "paper2md",
    version,
    about = "Turn research PDFs into structured Markdown and a knowledge graph",
    long_about = "Render each page of a PDF, OCR it with a vision LLM, structure the text \
inside the safe area into paragraphs, and export the body paragraphs as Markdown. \
Every stage is cached per page so re-runs only pay for what changed.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path, or an HTTP/HTTPS / arXiv / Hugging Face paper URL.
    input: String,

    /// Ignore every cached result for this document and reprocess all pages.
    #[arg(long = "i")]
    force_refresh: bool,

    /// Cache directory.
    #[arg(long, env = "CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,

    /// Output directory for Markdown and graph JSON.
    #[arg(long, env = "EXPORT_DIR", default_value = "./export")]
    export_dir: PathBuf,

    /// Directory with prompt overrides.
    #[arg(long, env = "PROMPT_DIR")]
    prompt_dir: Option<PathBuf>,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, default_value = "all")]
    pages: String,

    /// Safe area as x1,y1,x2,y2 page fractions (origin top-left).
    #[arg(long)]
    safe_area: Option<String>,

    /// Number of pages processed concurrently.
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Longest rendered edge in pixels.
    #[arg(long, default_value_t = 2000)]
    max_pixels: u32,

    /// PDF user password for encrypted documents.
    #[arg(long)]
    password: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,

    /// Retries per adapter call.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Translate body paragraphs and export the translation.
    #[arg(long)]
    translate: bool,

    /// Translation backend.
    #[arg(long, value_enum, default_value = "llm")]
    translator: TranslatorArg,

    #[arg(long, env = "DEEPL_RAPID_API_KEY", hide_env_values = true)]
    deepl_key: Option<String>,

    #[arg(long, env = "DEEPL_RAPID_API_HOST")]
    deepl_host: Option<String>,

    #[arg(long, env = "DEEPL_RAPID_API_SRC_LANG", default_value = "AUTO")]
    source_lang: String,

    #[arg(long, env = "DEEPL_RAPID_API_DST_LANG", default_value = "KO")]
    target_lang: String,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, default_value = "none")]
    separator: String,

    /// Prepend YAML front-matter naming the source document.
    #[arg(long)]
    metadata: bool,

    /// Also print the Markdown to stdout.
    #[arg(long)]
    print: bool,

    /// Skip the knowledge graph.
    #[arg(long, conflicts_with = "outline_graph")]
    no_graph: bool,

    /// Build the graph from the heading outline instead of an LLM.
    #[arg(long)]
    outline_graph: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum TranslatorArg {
    Llm,
    Deepl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let observer = show_progress.then(CliObserver::new);
    let config = build_config(&cli, observer.clone())?;

    // ── Open + process ───────────────────────────────────────────────────
    let session = Session::open(&cli.input, config)
        .await
        .with_context(|| format!("Failed to open {}", cli.input))?;
    if let Some(obs) = &observer {
        obs.bar.set_message(format!("{} pages", session.page_count()));
    }

    let report = if cli.force_refresh {
        session.refresh_all().await
    } else {
        session.process().await
    }
    .context("Processing failed")?;

    if observer.is_none() && !cli.quiet {
        eprintln!(
            "Structured {}/{} pages",
            report.succeeded(),
            report.pages.len()
        );
    }
    for (page, error) in report.failed() {
        eprintln!("  {} page {}: {}", red("✗"), page + 1, error);
    }

    // ── Translate ────────────────────────────────────────────────────────
    if cli.translate {
        let tr = session.translate(TranslationScope::All).await;
        if !cli.quiet {
            eprintln!(
                "{} {} paragraphs translated  {}",
                cyan("◆"),
                tr.translated,
                dim(&format!(
                    "({} cached, {} discarded, {} failed)",
                    tr.from_cache,
                    tr.discarded,
                    tr.failed.len()
                )),
            );
        }
    }

    // ── Export ───────────────────────────────────────────────────────────
    let options = ExportOptions {
        use_translation: cli.translate,
        separator: parse_separator(&cli.separator),
        include_metadata: cli.metadata,
    };
    let md_path = session
        .write_markdown(&options)
        .await
        .context("Failed to write Markdown")?;
    if cli.print {
        let markdown = session.export_with(&options).await;
        io::stdout()
            .lock()
            .write_all(markdown.as_bytes())
            .context("Failed to write to stdout")?;
    }

    // ── Knowledge graph ──────────────────────────────────────────────────
    let graph_path = if cli.no_graph {
        None
    } else {
        let graph = if cli.outline_graph {
            session.outline_graph().await
        } else {
            let extraction = session
                .extract_graph()
                .await
                .context("Knowledge graph extraction failed")?;
            if let GraphExtraction::Empty { reason } = &extraction {
                eprintln!("  {} knowledge graph is empty ({:?})", cyan("⚠"), reason);
            }
            extraction.into_graph()
        };
        Some(
            session
                .write_graph(&graph)
                .await
                .context("Failed to write knowledge graph")?,
        )
    };

    session
        .save_snapshot()
        .await
        .context("Failed to save document snapshot")?;

    if !cli.quiet {
        eprintln!("{}  →  {}", green("✔"), bold(&md_path.display().to_string()));
        if let Some(path) = graph_path {
            eprintln!("   →  {}", bold(&path.display().to_string()));
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<PipelineConfig> {
    let backend = match cli.translator {
        TranslatorArg::Llm => TranslationBackend::Llm,
        TranslatorArg::Deepl => TranslationBackend::DeepL {
            api_key: cli.deepl_key.clone().unwrap_or_default(),
            host: cli.deepl_host.clone().unwrap_or_default(),
        },
    };

    let mut builder = PipelineConfig::builder()
        .concurrency(cli.concurrency)
        .max_rendered_pixels(cli.max_pixels)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .cache_dir(&cli.cache_dir)
        .export_dir(&cli.export_dir)
        .force_refresh(cli.force_refresh)
        .pages(parse_pages(&cli.pages)?)
        .translation(TranslationConfig {
            backend,
            source_lang: cli.source_lang.clone(),
            target_lang: cli.target_lang.clone(),
        });

    if let Some(ref spec) = cli.safe_area {
        builder = builder.safe_area(parse_safe_area(spec)?);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref dir) = cli.prompt_dir {
        builder = builder.prompt_dir(dir);
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

/// Parse `--safe-area x1,y1,x2,y2`.
fn parse_safe_area(s: &str) -> Result<Rect> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid safe-area coordinate: '{}'", v.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    match parts.as_slice() {
        [x1, y1, x2, y2] => Ok(Rect::new(*x1, *y1, *x2, *y2)),
        _ => anyhow::bail!("--safe-area needs four values x1,y1,x2,y2 (got {})", parts.len()),
    }
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
