//! Configuration types for a paper2md session.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct for every knob makes it easy to
//! share a config across tasks and to log exactly what a run used.

use crate::error::PipelineError;
use crate::model::{Rect, SafeArea};
use crate::progress::PipelineObserver;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one session.
///
/// # Example
/// ```rust
/// use paper2md::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(8)
///     .model("gpt-4.1-mini")
///     .cache_dir("./cache")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Longest rendered edge in pixels. Default: 2000.
    ///
    /// Caps memory for oversized pages and matches the image size vision
    /// models read best (roughly 1 000–2 000 px).
    pub max_rendered_pixels: u32,

    /// Pages processed concurrently. Default: 4.
    ///
    /// Each page makes two sequential LLM calls (OCR, structuring), so the
    /// number of in-flight requests never exceeds this value.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per LLM response. Default: 4096.
    pub max_tokens: usize,

    /// Retries after the first attempt of any adapter call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory with prompt overrides. Default: None (built-in prompts).
    pub prompt_dir: Option<PathBuf>,

    /// Root of the stage cache and document snapshots. Default: `./cache`.
    pub cache_dir: PathBuf,

    /// Where exported Markdown and graph files go. Default: `./export`.
    pub export_dir: PathBuf,

    /// Bypass every cache lookup (results are still written back). Default: false.
    pub force_refresh: bool,

    /// Initial safe area for documents without a snapshot.
    pub safe_area: SafeArea,

    /// Pages processed by [`crate::Session::process`]. Default: all.
    pub pages: PageSelection,

    pub translation: TranslationConfig,

    pub graph: GraphOptions,

    /// Pipeline event sink. Default: None.
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            password: None,
            prompt_dir: None,
            cache_dir: PathBuf::from("./cache"),
            export_dir: PathBuf::from("./export"),
            force_refresh: false,
            safe_area: SafeArea::default(),
            pages: PageSelection::default(),
            translation: TranslationConfig::default(),
            graph: GraphOptions::default(),
            observer: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("cache_dir", &self.cache_dir)
            .field("export_dir", &self.export_dir)
            .field("force_refresh", &self.force_refresh)
            .field("safe_area", &self.safe_area)
            .field("pages", &self.pages)
            .field("translation", &self.translation)
            .field("graph", &self.graph)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
            safe_area: None,
        }
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    safe_area: Option<Rect>,
}

impl PipelineConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.prompt_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.export_dir = dir.into();
        self
    }

    pub fn force_refresh(mut self, v: bool) -> Self {
        self.config.force_refresh = v;
        self
    }

    /// Validated in [`build`](Self::build).
    pub fn safe_area(mut self, rect: Rect) -> Self {
        self.safe_area = Some(rect);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn translation(mut self, translation: TranslationConfig) -> Self {
        self.config.translation = translation;
        self
    }

    pub fn graph(mut self, graph: GraphOptions) -> Self {
        self.config.graph = graph;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<PipelineConfig, PipelineError> {
        if let Some(rect) = self.safe_area {
            self.config.safe_area =
                SafeArea::new(rect).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        }
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.translation.target_lang.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Translation target language must not be empty".into(),
            ));
        }
        if let TranslationBackend::DeepL { api_key, host } = &c.translation.backend {
            if api_key.is_empty() || host.is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "DeepL backend needs both an API key and a host".into(),
                ));
            }
        }
        if c.graph.chunk_chars < 500 || c.graph.max_chunks == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "Graph chunking needs chunk_chars ≥ 500 and max_chunks ≥ 1, got {} / {}",
                c.graph.chunk_chars, c.graph.max_chunks
            )));
        }
        Ok(self.config)
    }
}

// ── Nested option groups ─────────────────────────────────────────────────

/// Which translation service to call.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationBackend {
    /// The session's LLM provider. (default)
    #[default]
    Llm,
    /// A DeepL-compatible RapidAPI endpoint.
    DeepL { api_key: String, host: String },
}

impl fmt::Debug for TranslationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationBackend::Llm => f.write_str("Llm"),
            TranslationBackend::DeepL { host, .. } => f
                .debug_struct("DeepL")
                .field("api_key", &"<redacted>")
                .field("host", host)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub backend: TranslationBackend,
    /// Source language code, `AUTO` to let the backend detect it.
    pub source_lang: String,
    /// Target language code. Default: `KO`.
    pub target_lang: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            backend: TranslationBackend::Llm,
            source_lang: "AUTO".to_string(),
            target_lang: "KO".to_string(),
        }
    }
}

/// Bounds for knowledge-graph extraction on long documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOptions {
    /// Target chunk size in characters. Default: 12 000.
    pub chunk_chars: usize,
    /// Maximum LLM calls per extraction; the tail beyond is skipped. Default: 8.
    pub max_chunks: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            chunk_chars: 12_000,
            max_chunks: 8,
        }
    }
}

/// Specifies which pages to process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3]).to_indices(5),
            vec![0, 2]
        );
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = PipelineConfig::builder()
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);

        let bad = PipelineConfig::builder()
            .safe_area(Rect::new(0.3, 0.3, 0.3, 0.9))
            .build();
        assert!(matches!(bad, Err(PipelineError::InvalidConfig(_))));

        let bad = PipelineConfig::builder()
            .translation(TranslationConfig {
                backend: TranslationBackend::DeepL {
                    api_key: String::new(),
                    host: "deepl-translator.p.rapidapi.com".into(),
                },
                ..Default::default()
            })
            .build();
        assert!(bad.is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let backend = TranslationBackend::DeepL {
            api_key: "sk-secret".into(),
            host: "h".into(),
        };
        assert!(!format!("{backend:?}").contains("sk-secret"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.translation.source_lang, "AUTO");
        assert_eq!(c.translation.target_lang, "KO");
        assert_eq!(c.safe_area, SafeArea::default());
        assert_eq!(c.cache_dir, PathBuf::from("./cache"));
    }
}
