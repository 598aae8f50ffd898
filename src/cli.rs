//! Command-line interface for the newsletter pipeline.
//!
//! Every option can also come from the environment where noted.

use clap::Parser;

/// Command-line arguments for `newsletter_utils`.
///
/// # Examples
///
/// ```sh
/// # Today's newsletters from a scraper dump
/// newsletter_utils -i ./articles.json -o ./newsletters
///
/// # Replay a past day with a custom layout, no LLM
/// newsletter_utils -i ./2025-01-15.jsonl -o ./out -c ./newsletters.yaml -d 2025-01-15 --offline
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Article records: a JSON array, or JSON Lines when the file ends in `.jsonl`
    #[arg(short, long)]
    pub input: String,

    /// Directory the newsletters, source manifests and index are written to
    #[arg(short, long)]
    pub output_dir: String,

    /// Optional path to the pipeline config YAML
    #[arg(short, long)]
    pub config: Option<String>,

    /// Run date (YYYY-MM-DD); defaults to today in local time
    #[arg(short, long)]
    pub date: Option<String>,

    /// Do not call the LLM; narratives are built from templates
    #[arg(long)]
    pub offline: bool,

    /// Path to the awful_aj config.yaml (defaults to the awful_aj config dir)
    #[arg(long, env = "NEWSLETTER_LLM_CONFIG")]
    pub llm_config: Option<String>,

    /// awful_aj template that sets the writing voice
    #[arg(long, default_value = "newsletter_writer")]
    pub template: String,
}
