//! Configuration types for an OCR run.
//!
//! All run behaviour is controlled through [`OcrConfig`], built via its
//! [`OcrConfigBuilder`]. Keeping every knob in one struct makes it trivial to
//! share configs across tasks, log them, and diff two runs to understand why
//! their outputs differ.

use crate::error::OcrError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which recognition engine(s) a run uses.
///
/// A closed enum rather than a free-form string: an unknown engine name is a
/// configuration error at parse time, not a silent fallback at page 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Local tesseract only. Free, fast, lower accuracy on complex scripts.
    Tesseract,
    /// Vision-language model only. Accurate, metered, rate-limited.
    Vlm,
    /// Tesseract first, escalating to the VLM for low-confidence pages and
    /// pages carrying mantra content. (default)
    #[default]
    Hybrid,
}

impl FromStr for BackendChoice {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tesseract" => Ok(Self::Tesseract),
            "vlm" | "gemini" => Ok(Self::Vlm),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(OcrError::InvalidConfig(format!(
                "unknown backend '{other}' (expected tesseract, vlm, or hybrid)"
            ))),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tesseract => write!(f, "tesseract"),
            Self::Vlm => write!(f, "vlm"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Specifies which pages of the document to process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process a single page (1-indexed).
    Single(u32),
    /// Process a contiguous range (1-indexed, inclusive).
    Range(u32, u32),
    /// Process specific pages (1-indexed).
    Set(Vec<u32>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed
    /// page numbers, clamped to `total_pages`.
    pub fn resolve(&self, total_pages: u32) -> Vec<u32> {
        let mut pages: Vec<u32> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => {
                if (1..=total_pages).contains(p) {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(set) => set
                .iter()
                .copied()
                .filter(|p| (1..=total_pages).contains(p))
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    /// Highest page this selection names, if bounded. Used to reject
    /// selections that exceed the document before any work starts.
    pub fn max_requested(&self) -> Option<u32> {
        match self {
            PageSelection::All => None,
            PageSelection::Single(p) => Some(*p),
            PageSelection::Range(_, end) => Some(*end),
            PageSelection::Set(set) => set.iter().copied().max(),
        }
    }
}

impl FromStr for PageSelection {
    type Err = OcrError;

    /// Parse a page spec: `all`, `5`, `1-50`, or a comma list mixing the two
    /// forms such as `1,5,10-20`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let invalid = |detail: &str| OcrError::InvalidPageSpec {
            spec: spec.to_string(),
            detail: detail.to_string(),
        };

        if spec.is_empty() {
            return Err(invalid("empty page spec"));
        }
        if spec.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }

        let mut pages = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo
                    .trim()
                    .parse()
                    .map_err(|_| invalid("range start is not a number"))?;
                let hi: u32 = hi
                    .trim()
                    .parse()
                    .map_err(|_| invalid("range end is not a number"))?;
                if lo == 0 || hi == 0 {
                    return Err(invalid("pages are 1-indexed"));
                }
                if lo > hi {
                    return Err(invalid("range start exceeds range end"));
                }
                pages.extend(lo..=hi);
            } else {
                let p: u32 = part.parse().map_err(|_| invalid("not a page number"))?;
                if p == 0 {
                    return Err(invalid("pages are 1-indexed"));
                }
                pages.push(p);
            }
        }

        pages.sort_unstable();
        pages.dedup();
        match pages.as_slice() {
            [single] => Ok(PageSelection::Single(*single)),
            [first, .., last] if pages.len() as u32 == last - first + 1 => {
                Ok(PageSelection::Range(*first, *last))
            }
            _ => Ok(PageSelection::Set(pages)),
        }
    }
}

/// Configuration for an OCR run.
///
/// Built via [`OcrConfig::builder()`] or [`OcrConfig::default()`].
///
/// # Example
/// ```rust
/// use mantra_ocr::OcrConfig;
///
/// let config = OcrConfig::builder()
///     .concurrency(4)
///     .requests_per_minute(30)
///     .language("hin+san")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    /// Which engine(s) to use. Default: [`BackendChoice::Hybrid`].
    pub backend: BackendChoice,

    /// Number of page recognitions in flight at once. Default: 4.
    ///
    /// Remote OCR is network-bound. This bounds memory (rendered page images
    /// are held while in flight) and keeps the dispatch loop from racing far
    /// ahead of the rate limiter.
    pub concurrency: usize,

    /// Number of pages rasterised at once. Default: 4.
    ///
    /// Rendering is CPU- and memory-bound where recognition is
    /// network-bound, so the two pools are sized independently. A wide
    /// recognition window with a small render pool keeps decoded page
    /// bitmaps from piling up faster than engines consume them.
    pub render_workers: usize,

    /// Sustained VLM request rate, requests per minute. Default: 30.
    ///
    /// Matched to metered-API quotas. The limiter allows short bursts up to
    /// [`burst_capacity`](Self::burst_capacity) and then throttles to this
    /// sustained rate.
    pub requests_per_minute: u32,

    /// Burst size the rate limiter permits after idle periods. Default: 8.
    pub burst_capacity: u32,

    /// Maximum recognition attempts per page, including the first. Default: 4.
    pub max_attempts: u32,

    /// Base retry delay in seconds. Default: 2.0.
    ///
    /// Transient failures back off `base * 2^attempt`; rate-limit failures
    /// back off harder at `base * 3^attempt` because a 429 means the shared
    /// quota is exhausted, not that this one call was unlucky.
    pub retry_base_secs: f64,

    /// Rendering DPI used when rasterising each page. Range: 72-400. Default: 300.
    ///
    /// Devanagari conjuncts and vowel signs need more pixels than Latin text;
    /// 300 DPI keeps diacritics legible to both engines.
    pub dpi: u32,

    /// Tesseract language pack(s), e.g. "hin", "san", "hin+san". Default: "hin+san".
    pub language: String,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Password for encrypted PDFs. Default: none.
    pub password: Option<String>,

    /// Primary-engine confidence below which a page escalates to the VLM
    /// in hybrid mode. Range: 0.0-1.0. Default: 0.75.
    pub confidence_threshold: f32,

    /// Strict mantra detection: any single bīja or numbered verse escalates.
    /// Default: true.
    pub strict_detection: bool,

    /// VLM model identifier, e.g. "gemini-2.5-flash". If None, the provider
    /// default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "ollama"). If None along
    /// with `provider`, the provider is resolved from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Custom OCR prompt for the VLM. If None, uses the built-in prompt.
    pub prompt: Option<String>,

    /// Maximum tokens the VLM may generate per page. Default: 8192.
    ///
    /// Dense scripture pages with commentary run long; truncation mid-verse
    /// is worse than the extra token budget.
    pub max_tokens: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-VLM-call timeout in seconds. Default: 90.
    pub api_timeout_secs: u64,

    /// Progress callback invoked for per-page events. Default: none.
    pub progress_callback: Option<crate::progress::ProgressCallback>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::default(),
            concurrency: 4,
            render_workers: 4,
            requests_per_minute: 30,
            burst_capacity: 8,
            max_attempts: 4,
            retry_base_secs: 2.0,
            dpi: 300,
            language: "hin+san".to_string(),
            pages: PageSelection::default(),
            password: None,
            confidence_threshold: 0.75,
            strict_detection: true,
            model: None,
            provider_name: None,
            provider: None,
            prompt: None,
            max_tokens: 8192,
            download_timeout_secs: 120,
            api_timeout_secs: 90,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("backend", &self.backend)
            .field("concurrency", &self.concurrency)
            .field("render_workers", &self.render_workers)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("burst_capacity", &self.burst_capacity)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_secs", &self.retry_base_secs)
            .field("dpi", &self.dpi)
            .field("language", &self.language)
            .field("pages", &self.pages)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("confidence_threshold", &self.confidence_threshold)
            .field("strict_detection", &self.strict_detection)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn backend(mut self, backend: BackendChoice) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn render_workers(mut self, n: usize) -> Self {
        self.config.render_workers = n.max(1);
        self
    }

    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.config.requests_per_minute = rpm.max(1);
        self
    }

    pub fn burst_capacity(mut self, n: u32) -> Self {
        self.config.burst_capacity = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_base_secs(mut self, secs: f64) -> Self {
        self.config.retry_base_secs = secs.max(0.0);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn strict_detection(mut self, strict: bool) -> Self {
        self.config.strict_detection = strict;
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

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: crate::progress::ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(OcrError::InvalidConfig(format!(
                "DPI must be 72-400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(OcrError::InvalidConfig("concurrency must be >= 1".into()));
        }
        if c.render_workers == 0 {
            return Err(OcrError::InvalidConfig(
                "render_workers must be >= 1".into(),
            ));
        }
        if c.language.is_empty() {
            return Err(OcrError::InvalidConfig(
                "language pack must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OcrConfig::builder().build().unwrap();
        assert_eq!(config.backend, BackendChoice::Hybrid);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.dpi, 300);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let config = OcrConfig::builder()
            .dpi(10_000)
            .concurrency(0)
            .render_workers(0)
            .confidence_threshold(3.0)
            .build()
            .unwrap();
        assert_eq!(config.dpi, 400);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.render_workers, 1);
        assert_eq!(config.confidence_threshold, 1.0);
    }

    #[test]
    fn backend_choice_parses_known_names() {
        assert_eq!(
            "tesseract".parse::<BackendChoice>().unwrap(),
            BackendChoice::Tesseract
        );
        assert_eq!("VLM".parse::<BackendChoice>().unwrap(), BackendChoice::Vlm);
        assert_eq!(
            "hybrid".parse::<BackendChoice>().unwrap(),
            BackendChoice::Hybrid
        );
        assert!("easyocr".parse::<BackendChoice>().is_err());
    }

    #[test]
    fn page_spec_parses_all_forms() {
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!(
            "5".parse::<PageSelection>().unwrap(),
            PageSelection::Single(5)
        );
        assert_eq!(
            "1-50".parse::<PageSelection>().unwrap(),
            PageSelection::Range(1, 50)
        );
        assert_eq!(
            "1,5,10-12".parse::<PageSelection>().unwrap(),
            PageSelection::Set(vec![1, 5, 10, 11, 12])
        );
    }

    #[test]
    fn page_spec_collapses_contiguous_lists_to_ranges() {
        assert_eq!(
            "3,4,5".parse::<PageSelection>().unwrap(),
            PageSelection::Range(3, 5)
        );
    }

    #[test]
    fn page_spec_rejects_garbage() {
        assert!("".parse::<PageSelection>().is_err());
        assert!("0".parse::<PageSelection>().is_err());
        assert!("5-2".parse::<PageSelection>().is_err());
        assert!("abc".parse::<PageSelection>().is_err());
    }

    #[test]
    fn resolve_clamps_to_document() {
        let pages = PageSelection::Range(8, 20).resolve(10);
        assert_eq!(pages, vec![8, 9, 10]);
        assert_eq!(PageSelection::Single(99).resolve(10), Vec::<u32>::new());
        assert_eq!(PageSelection::All.resolve(3), vec![1, 2, 3]);
    }

    #[test]
    fn max_requested_tracks_selection_bound() {
        assert_eq!(PageSelection::All.max_requested(), None);
        assert_eq!(PageSelection::Range(1, 50).max_requested(), Some(50));
        assert_eq!(
            PageSelection::Set(vec![3, 17, 9]).max_requested(),
            Some(17)
        );
    }
}
