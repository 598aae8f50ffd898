//! Text-generation capability used by the narrative composer.
//!
//! The composer only sees the [`Summarizer`] trait, so the pipeline runs
//! against the real LLM backend in production and a deterministic stub in
//! tests.
//!
//! - [`LlmSummarizer`]: wraps `awful_aj::api::ask` (OpenAI-compatible API)
//! - [`RetrySummarizer`]: decorator adding exponential backoff with jitter
//! - [`OfflineSummarizer`]: always unavailable, forcing templated prose
//! - [`Backend`]: the runtime choice between the above
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), 30s) + random_jitter(0..250ms)
//! ```

use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use rand::{rng, Rng};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

use crate::error::{NewsletterError, Result};

/// Something that turns a prompt into prose.
///
/// Failures are reported as [`NewsletterError::SummarizationUnavailable`];
/// callers treat them as recoverable.
pub trait Summarizer {
    /// Generate prose for `prompt`.
    ///
    /// # Arguments
    ///
    /// * `prompt` - Full instruction text, sources included
    ///
    /// # Returns
    ///
    /// The raw model text, unparsed. Links and markers in it are resolved by
    /// the caller.
    async fn summarize(&self, prompt: &str) -> Result<String>;
}

/// Adds retries with exponential backoff to any [`Summarizer`].
pub struct RetrySummarizer<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetrySummarizer<T>
where
    T: Summarizer,
{
    /// Wrap `inner` with retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The summarizer to retry
    /// * `max_retries` - Attempts after the first one before giving up
    /// * `base_delay` - Delay before the first retry, doubled on each attempt
    ///   and capped at 30 seconds
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetrySummarizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySummarizer")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Summarizer for RetrySummarizer<T>
where
    T: Summarizer,
{
    #[instrument(level = "info", skip_all)]
    async fn summarize(&self, prompt: &str) -> Result<String> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.summarize(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "summarize() exhausted retries"
                        );
                        return Err(e);
                    }

                    let shift = (attempt - 1).min(16) as u32;
                    let delay = self
                        .base_delay
                        .saturating_mul(1 << shift)
                        .min(self.max_delay);
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "summarize() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// LLM backend over `awful_aj`, driven by a chat template whose system
/// prompt sets the newsletter voice.
pub struct LlmSummarizer<'a> {
    pub config: &'a AwfulJadeConfig,
    pub template: &'a ChatTemplate,
}

impl fmt::Debug for LlmSummarizer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSummarizer").finish_non_exhaustive()
    }
}

impl Summarizer for LlmSummarizer<'_> {
    #[instrument(level = "info", skip_all)]
    async fn summarize(&self, prompt: &str) -> Result<String> {
        let t0 = Instant::now();
        let res = ask(self.config, prompt.to_string(), self.template, None, None).await;
        match res {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => Err(NewsletterError::SummarizationUnavailable(
                "model returned an empty response".into(),
            )),
            Err(e) => {
                warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "API call failed");
                Err(NewsletterError::SummarizationUnavailable(e.to_string()))
            }
        }
    }
}

/// Used with `--offline` or when no LLM configuration can be loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineSummarizer;

impl Summarizer for OfflineSummarizer {
    async fn summarize(&self, _prompt: &str) -> Result<String> {
        Err(NewsletterError::SummarizationUnavailable(
            "offline mode".into(),
        ))
    }
}

/// The summarizer selected at startup.
#[derive(Debug)]
pub enum Backend<'a> {
    Llm(RetrySummarizer<LlmSummarizer<'a>>),
    Offline(OfflineSummarizer),
}

impl<'a> Backend<'a> {
    /// LLM backend with retries, one second base delay.
    ///
    /// # Arguments
    ///
    /// * `config` - awful_aj endpoint configuration
    /// * `template` - Chat template carrying the system prompt
    /// * `max_retries` - Retries per prompt before the section falls back
    pub fn llm(
        config: &'a AwfulJadeConfig,
        template: &'a ChatTemplate,
        max_retries: usize,
    ) -> Self {
        Backend::Llm(RetrySummarizer::new(
            LlmSummarizer { config, template },
            max_retries,
            StdDuration::from_secs(1),
        ))
    }
}

impl Summarizer for Backend<'_> {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        match self {
            Backend::Llm(inner) => inner.summarize(prompt).await,
            Backend::Offline(inner) => inner.summarize(prompt).await,
        }
    }
}
