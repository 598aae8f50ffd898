//! # Newsletter Utils
//!
//! Turns a day's worth of scraped article records into narrative markdown
//! newsletters, one per configured category key, each closing with a
//! numbered list of every source it drew on.
//!
//! ## Usage
//!
//! ```sh
//! newsletter_utils -i ./articles.json -o ./newsletters
//! ```
//!
//! ## Architecture
//!
//! 1. **Ingestion**: normalize records, assign categories, store by URL
//! 2. **Deduplication**: cluster articles telling the same story, per category
//! 3. **Narration**: one prose section per category through the LLM
//!    (sections composed concurrently), templated prose when it is unavailable
//! 4. **Assembly**: header, narrative, source manifest, footer
//! 5. **Output**: markdown artifact, JSON source manifest, run ledger, `index.md`

use awful_aj::config::{self as aj_config, AwfulJadeConfig};
use awful_aj::{config_dir, template, template::ChatTemplate};
use chrono::{Local, NaiveDate};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod assembler;
mod categorizer;
mod cli;
mod composer;
mod config;
mod dedup;
mod error;
mod manifest;
mod models;
mod outputs;
mod pipeline;
mod store;
mod summarizer;
mod utils;

use categorizer::Categorizer;
use cli::Cli;
use config::{FallbackPolicy, PipelineConfig};
use pipeline::{ingest, read_records, Pipeline, RunContext};
use summarizer::{Backend, OfflineSummarizer};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("newsletter_utils starting up");

    let args = Cli::parse();
    debug!(input = %args.input, output_dir = %args.output_dir, offline = args.offline, "Parsed CLI arguments");

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let mut pipeline_config = PipelineConfig::load(args.config.as_deref())?;
    if args.offline && pipeline_config.fallback != FallbackPolicy::Template {
        info!(configured = ?pipeline_config.fallback, "Offline run; using templated narratives");
        pipeline_config.fallback = FallbackPolicy::Template;
    }

    let date = match args.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")?,
        None => Local::now().date_naive(),
    };
    let ctx = RunContext::new(date, Local::now().fixed_offset(), pipeline_config);
    info!(date = %ctx.date, generated_at = %ctx.generated_at, "Run context initialized");

    // ---- Ingestion ----
    let records = read_records(&args.input).await?;
    let categorizer = Categorizer::new(&ctx.config);
    let (store, ingest_report) = ingest(records, &categorizer, &ctx);
    debug!(?ingest_report, categories = ?store.categories(), "Store ready");
    if store.is_empty() {
        warn!(input = %args.input, date = %ctx.date, "No article survived ingestion");
    } else {
        let full = store.articles().iter().filter(|a| a.fetch_ok).count();
        info!(articles = store.len(), full_content = full, "Articles ready for composition");
    }

    // ---- Load LLM template & config ----
    let llm = if args.offline {
        info!("Offline mode; LLM backend disabled");
        None
    } else {
        load_llm(&args).await
    };
    let backend = match &llm {
        Some((llm_config, template)) => Backend::llm(llm_config, template, ctx.config.max_retries),
        None => Backend::Offline(OfflineSummarizer),
    };

    // ---- Compose & assemble ----
    let pipeline = Pipeline::new(&ctx, &store, backend);
    let report = pipeline.run(&ctx.config.newsletters()).await;

    // ---- Output ----
    let written = outputs::write_run(&args.output_dir, &ctx, &report, pipeline.assembler()).await?;
    for path in &written {
        debug!(path = %path.display(), "Artifact written");
    }

    let elapsed = start_time.elapsed();
    info!(
        newsletters = report.newsletters.len(),
        failed = report.failures.len(),
        files = written.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "newsletter_utils finished"
    );

    if report.newsletters.is_empty() {
        error!("No newsletter was generated");
        return Err("no newsletter generated for this run".into());
    }
    Ok(())
}

/// Load the awful_aj config and chat template; `None` falls back to offline.
#[instrument(level = "info", skip_all, fields(template = %args.template))]
async fn load_llm(args: &Cli) -> Option<(AwfulJadeConfig, ChatTemplate)> {
    let conf_file = match &args.llm_config {
        Some(path) => PathBuf::from(path),
        None => match config_dir() {
            Ok(dir) => dir.join("config.yaml"),
            Err(e) => {
                warn!(error = %e, "No awful_aj config dir; running offline");
                return None;
            }
        },
    };
    let Some(config_path) = conf_file.to_str() else {
        warn!(path = %conf_file.display(), "Not a valid config filename; running offline");
        return None;
    };

    let llm_config = match aj_config::load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(config_path, error = %e, "Failed to load LLM config; running offline");
            return None;
        }
    };
    info!(config_path, "Loaded LLM configuration");

    let template = match template::load_template(&args.template).await {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "Failed to load template; running offline");
            return None;
        }
    };
    info!(template = %args.template, "Loaded template");
    Some((llm_config, template))
}
