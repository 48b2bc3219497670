//! Vision-language-model engine.
//!
//! Sends each rendered page to a VLM provider as a base64 PNG and treats the
//! response as the page transcription. PNG over JPEG because it is lossless —
//! compression artefacts on conjunct consonants are exactly the errors this
//! engine exists to avoid.
//!
//! The response is validated before it is accepted: models sometimes answer
//! with a refusal ("I cannot read this image") instead of text, and a refusal
//! cached as page content would silently corrupt the output document.

use super::{OcrEngine, RecognitionResult, TokenUsage};
use crate::config::OcrConfig;
use crate::error::{OcrError, PageError};
use crate::limiter::TokenBucket;
use crate::prompts::{OCR_PROMPT, REFUSAL_PATTERNS};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::fmt::Display;
use std::future::Future;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum plausible transcription length. Real scripture pages never
/// produce fewer characters than this; shorter responses are refusals or
/// hallucinated fragments.
const MIN_TEXT_LENGTH: usize = 20;

pub struct VlmEngine {
    provider: Arc<dyn LLMProvider>,
    prompt: String,
    max_tokens: usize,
    api_timeout: Duration,
    limiter: Option<Arc<TokenBucket>>,
    usage: Mutex<TokenUsage>,
}

impl VlmEngine {
    pub fn new(provider: Arc<dyn LLMProvider>, prompt: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            provider,
            prompt: prompt.into(),
            max_tokens,
            api_timeout: Duration::from_secs(90),
            limiter: None,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Build the engine from config, resolving the provider from
    /// most-specific to least-specific: pre-built provider, then named
    /// provider, then environment auto-detection.
    pub async fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        let provider = resolve_provider(config)?;
        let prompt = config.prompt.clone().unwrap_or_else(|| OCR_PROMPT.to_string());
        let limiter = Arc::new(TokenBucket::per_minute(
            config.requests_per_minute,
            config.burst_capacity,
        ));
        Ok(Self::new(provider, prompt, config.max_tokens)
            .with_limiter(limiter)
            .with_timeout(Duration::from_secs(config.api_timeout_secs)))
    }

    /// Abandon any single API call that takes longer than `timeout`. A
    /// stalled connection then becomes a retryable page failure instead of
    /// wedging one of the dispatch slots for the rest of the run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    /// Throttle every API call through `limiter`.
    ///
    /// The limiter lives inside this engine rather than in the dispatch
    /// loop: in hybrid mode most pages never reach the VLM, and throttling
    /// them would waste quota headroom on free pages.
    pub fn with_limiter(mut self, limiter: Arc<TokenBucket>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Cumulative token consumption across all pages this engine processed.
    pub fn usage(&self) -> TokenUsage {
        // Lock poisoning only happens if a panic occurred mid-record.
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

/// Await `call` with a deadline, mapping both provider errors and deadline
/// expiry to a retryable page failure.
async fn chat_within<F, T, E>(page: u32, deadline: Duration, call: F) -> Result<T, PageError>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let failed = |detail: String| PageError::RecognitionFailed {
        page,
        attempts: 1,
        detail,
    };
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(|e| failed(format!("{e}"))),
        Err(_) => Err(failed(format!(
            "no response after {}s, request timed out",
            deadline.as_secs()
        ))),
    }
}

#[async_trait]
impl OcrEngine for VlmEngine {
    fn name(&self) -> &'static str {
        "vlm"
    }

    fn is_free(&self) -> bool {
        false
    }

    fn cost_per_1000_pages(&self) -> f64 {
        1000.0 * super::estimated_cost_per_page(crate::config::BackendChoice::Vlm)
    }

    fn token_usage(&self) -> TokenUsage {
        self.usage()
    }

    async fn recognize(
        &self,
        page: u32,
        image: &DynamicImage,
    ) -> Result<RecognitionResult, PageError> {
        let start = Instant::now();
        let image_data = encode_page(image).map_err(|e| PageError::RecognitionFailed {
            page,
            attempts: 1,
            detail: format!("failed to encode page image: {e}"),
        })?;

        if let Some(ref limiter) = self.limiter {
            let waited = limiter.acquire_one().await;
            if !waited.is_zero() {
                debug!(page, waited_ms = waited.as_millis() as u64, "rate limiter throttled call");
            }
        }

        let messages = vec![
            ChatMessage::system(self.prompt.as_str()),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = chat_within(
            page,
            self.api_timeout,
            self.provider.chat(&messages, Some(&options)),
        )
        .await?;

        let mut tokens = TokenUsage::default();
        tokens.record(response.prompt_tokens as u64, response.completion_tokens as u64);
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(&tokens);
        }
        debug!(
            page,
            input = tokens.input_tokens,
            output = tokens.output_tokens,
            "vlm response received"
        );

        let text = response.content.trim().to_string();
        validate_response(page, &text)?;

        let mut result = RecognitionResult::new(text, 1.0, self.name());
        result.tokens = tokens;
        result.duration = start.elapsed();
        Ok(result)
    }
}

/// Encode a rasterised page as a base64 PNG attachment.
///
/// `detail: "high"` makes tile-based models use their full image token
/// budget; without it small print and diacritics are lost.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Reject responses that are refusals or implausibly short.
///
/// A rejected response becomes a retryable page failure rather than cached
/// content.
pub fn validate_response(page: u32, text: &str) -> Result<(), PageError> {
    let invalid = |detail: String| PageError::RecognitionFailed {
        page,
        attempts: 1,
        detail,
    };

    if text.chars().count() < MIN_TEXT_LENGTH {
        return Err(invalid(format!(
            "response too short ({} chars) to be a page transcription",
            text.chars().count()
        )));
    }
    let lower = text.to_lowercase();
    for pattern in REFUSAL_PATTERNS {
        if lower.contains(&pattern.to_lowercase()) {
            return Err(invalid(format!("model refused: matched '{pattern}'")));
        }
    }
    if !text.chars().any(char::is_alphanumeric) {
        return Err(invalid("response contains no letters or digits".to_string()));
    }
    Ok(())
}

fn resolve_provider(config: &OcrConfig) -> Result<Arc<dyn LLMProvider>, OcrError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gemini-2.5-flash");
        return ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            OcrError::EngineUnavailable {
                engine: name.clone(),
                hint: format!("{e}"),
            }
        });
    }

    // Prefer Gemini when its key is present, even if other provider keys
    // exist: the default prompt and the cost accounting are tuned for it.
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gemini-2.5-flash");
            return ProviderFactory::create_llm_provider("gemini", model).map_err(|e| {
                OcrError::EngineUnavailable {
                    engine: "gemini".to_string(),
                    hint: format!("{e}"),
                }
            });
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| OcrError::EngineUnavailable {
            engine: "auto".to_string(),
            hint: format!(
                "no VLM provider detected from environment \
                 (set GEMINI_API_KEY or configure a provider): {e}"
            ),
        })?;
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_produces_valid_base64_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[..4], b"\x89PNG");
    }

    #[test]
    fn validation_accepts_real_devanagari_text() {
        let text = "ॐ नमः शिवाय। शिवाय नमः ॐ। गुरुर्ब्रह्मा गुरुर्विष्णुः॥";
        assert!(validate_response(1, text).is_ok());
    }

    #[test]
    fn validation_rejects_short_responses() {
        assert!(validate_response(1, "ॐ नमः").is_err());
        assert!(validate_response(1, "").is_err());
    }

    #[test]
    fn validation_rejects_refusals() {
        let refusal = "I cannot extract text from this image as it appears to be blank.";
        assert!(validate_response(1, refusal).is_err());
        let refusal = "There is no readable text visible anywhere on this page image.";
        assert!(validate_response(1, refusal).is_err());
    }

    #[test]
    fn validation_rejects_punctuation_only_responses() {
        assert!(validate_response(1, "॥॥॥ ।।। ॥॥॥ ।।। ॥॥॥ ।।। ॥॥॥").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_api_call_becomes_a_retryable_failure() {
        use crate::pipeline::retry::{classify_error, ErrorClass};

        let hung_call = futures::future::pending::<Result<(), std::io::Error>>();
        let err = chat_within(4, Duration::from_secs(90), hung_call)
            .await
            .unwrap_err();
        match err {
            PageError::RecognitionFailed { page, detail, .. } => {
                assert_eq!(page, 4);
                assert!(detail.contains("timed out"), "got detail: {detail}");
                assert_eq!(classify_error(&detail), ErrorClass::Transient);
            }
            other => panic!("expected RecognitionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_error_passes_through_within_deadline() {
        let call = async { Err::<(), _>(std::io::Error::other("503 service unavailable")) };
        let err = chat_within(2, Duration::from_secs(90), call).await.unwrap_err();
        match err {
            PageError::RecognitionFailed { detail, .. } => {
                assert!(detail.contains("503"));
            }
            other => panic!("expected RecognitionFailed, got {other:?}"),
        }
    }
}
