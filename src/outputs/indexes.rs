//! `index.md` maintenance.
//!
//! One date heading per run date, one entry per artifact under it:
//!
//! ```text
//! # Newsletter Index
//!
//! - **2025-01-15**
//!     - [economia · 07:05:09](./newsletter_economia_20250115_070509_economia_narrativa.md)
//!     - [finanzas · 07:05:09](./newsletter_finanzas_20250115_070509_finanzas_narrativa.md)
//! ```
//!
//! New dates go right below the title. Running twice with the same artifact
//! leaves the index unchanged.

use std::path::Path;
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::models::Newsletter;
use crate::utils::link_target;

const INDEX_FILE: &str = "index.md";
const INDEX_TITLE: &str = "# Newsletter Index";
const ENTRY_INDENT: &str = "    - ";

/// Add `newsletter` to `{output_dir}/index.md`, creating the file if needed.
#[instrument(level = "info", skip_all, fields(%output_dir, doc_id = %newsletter.doc_id))]
pub async fn update_index(output_dir: &str, newsletter: &Newsletter) -> Result<()> {
    let index_path = Path::new(output_dir).join(INDEX_FILE);
    let content = if fs::try_exists(&index_path).await? {
        fs::read_to_string(&index_path).await?
    } else {
        format!("{INDEX_TITLE}\n")
    };

    let updated = insert_entry(&content, newsletter);
    if updated == content {
        debug!("Entry already indexed");
        return Ok(());
    }
    fs::write(&index_path, updated).await?;
    info!(path = %index_path.display(), "Updated index.md");
    Ok(())
}

fn insert_entry(content: &str, newsletter: &Newsletter) -> String {
    let date_heading = format!("- **{}**", newsletter.date.format("%Y-%m-%d"));
    let entry = format!(
        "{ENTRY_INDENT}[{} · {}](./{})",
        newsletter.category_key,
        newsletter.generated_at.format("%H:%M:%S"),
        link_target(&newsletter.file_name())
    );

    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    if let Some(i) = lines.iter().position(|l| l.trim() == date_heading) {
        let mut j = i + 1;
        while j < lines.len() && lines[j].starts_with(ENTRY_INDENT) {
            if lines[j] == entry {
                return content.to_string();
            }
            j += 1;
        }
        lines.insert(j, entry);
    } else if let Some(pos) = lines.iter().position(|l| l.starts_with(INDEX_TITLE)) {
        lines.insert(pos + 1, String::new());
        lines.insert(pos + 2, date_heading);
        lines.insert(pos + 3, entry);
    } else {
        lines.push(date_heading);
        lines.push(entry);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
