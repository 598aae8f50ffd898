//! Markdown artifact output.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

use crate::error::Result;
use crate::models::Newsletter;

/// Write the rendered `markdown` of `newsletter` to `{output_dir}/{doc_id}.md`.
///
/// The file name carries the generation time, so a second run for the same
/// key and date writes a new file next to the first.
#[instrument(level = "info", skip_all, fields(%output_dir, doc_id = %newsletter.doc_id))]
pub async fn write_newsletter(
    output_dir: &str,
    newsletter: &Newsletter,
    markdown: &str,
) -> Result<PathBuf> {
    let path = Path::new(output_dir).join(newsletter.file_name());
    fs::write(&path, markdown).await?;
    info!(path = %path.display(), bytes = markdown.len(), "Wrote newsletter");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::test_support::scratch_dir;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    #[tokio::test]
    async fn test_write_newsletter_uses_doc_id() {
        let dir = scratch_dir("markdown");
        let newsletter = Newsletter {
            category_key: "economia".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            generated_at: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2025, 1, 15, 6, 0, 0)
                .unwrap(),
            total_articles: 0,
            full_content_articles: 0,
            sections: vec![],
            variant: "narrativa".into(),
            doc_id: "newsletter_economia_20250115_060000_economia_narrativa".into(),
        };
        let path = write_newsletter(dir.to_str().unwrap(), &newsletter, "# economia\n")
            .await
            .unwrap();
        assert!(path.ends_with("newsletter_economia_20250115_060000_economia_narrativa.md"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# economia\n");
    }
}
