//! JSON Lines article import.
//!
//! Each non-blank line is one JSON object with any of `content`, `text`,
//! `page_content`, `title`, `source`, `url`, and `published_at` (RFC 3339
//! string or Unix seconds). Lines whose resolved content is empty are
//! skipped. The rest are embedded in batches and upserted into `articles`.
//!
//! The article id is the SHA-256 of `source`, `url`, and the resolved
//! content, so importing the same file twice leaves one row per article.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, info};

use briefly_core::embedding::{vec_to_blob, Embedder};
use briefly_core::models::DocumentFields;

/// One line of an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct ArticleRecord {
    #[serde(flatten)]
    pub fields: DocumentFields,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<Value>,
}

/// Counts reported after an import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub read: usize,
    pub imported: usize,
    pub skipped: usize,
}

/// Stable article id over source, url, and resolved content.
pub fn article_id(source: Option<&str>, url: Option<&str>, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hasher.update(url.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Unix seconds from an RFC 3339 string or an integer.
fn parse_published_at(value: Option<&Value>) -> Result<Option<i64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("published_at must be an integer timestamp")),
        Some(Value::String(s)) => {
            let dt = DateTime::parse_from_rfc3339(s)
                .with_context(|| format!("invalid published_at '{s}'"))?;
            Ok(Some(dt.with_timezone(&Utc).timestamp()))
        }
        Some(other) => bail!("published_at must be a string or integer, got {other}"),
    }
}

/// Parse a JSON Lines document into records. Errors name the line.
pub fn parse_records(input: &str) -> Result<Vec<ArticleRecord>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: invalid JSON record", i + 1))
        })
        .collect()
}

/// Import a JSONL file into `articles`.
pub async fn import_file(
    pool: &SqlitePool,
    path: &Path,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<ImportStats> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let records = parse_records(&input)?;
    import_records(pool, records, embedder, batch_size).await
}

struct Prepared {
    id: String,
    record: ArticleRecord,
    text: String,
    published_at: i64,
}

pub async fn import_records(
    pool: &SqlitePool,
    records: Vec<ArticleRecord>,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<ImportStats> {
    let mut stats = ImportStats {
        read: records.len(),
        ..Default::default()
    };
    let now = Utc::now().timestamp();

    let mut prepared = Vec::with_capacity(records.len());
    for record in records {
        let Some(text) = record.fields.resolve_content().map(str::to_string) else {
            stats.skipped += 1;
            continue;
        };
        let published_at = parse_published_at(record.published_at.as_ref())?.unwrap_or(now);
        prepared.push(Prepared {
            id: article_id(record.source.as_deref(), record.url.as_deref(), &text),
            record,
            text,
            published_at,
        });
    }

    for batch in prepared.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder
            .embed_texts(&texts)
            .await
            .context("Failed to embed import batch")?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding count mismatch: {} texts, {} vectors",
                batch.len(),
                vectors.len()
            );
        }

        let mut tx = pool.begin().await?;
        for (item, vector) in batch.iter().zip(&vectors) {
            let fields = &item.record.fields;
            sqlx::query(
                r#"
                INSERT INTO articles (id, source, url, content, text, page_content, title,
                                      published_at, embedding_model, dims, embedding, imported_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    published_at = excluded.published_at,
                    embedding_model = excluded.embedding_model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    imported_at = excluded.imported_at
                "#,
            )
            .bind(&item.id)
            .bind(&item.record.source)
            .bind(&item.record.url)
            .bind(&fields.content)
            .bind(&fields.text)
            .bind(&fields.page_content)
            .bind(&fields.title)
            .bind(item.published_at)
            .bind(embedder.model_name())
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        stats.imported += batch.len();
        debug!(batch = batch.len(), total = stats.imported, "imported batch");
    }

    info!(
        read = stats.read,
        imported = stats.imported,
        skipped = stats.skipped,
        "import complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_id_is_stable_and_field_sensitive() {
        let a = article_id(Some("rss"), Some("https://x/1"), "body");
        assert_eq!(a, article_id(Some("rss"), Some("https://x/1"), "body"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, article_id(Some("rss"), Some("https://x/2"), "body"));
        assert_ne!(a, article_id(None, Some("https://x/1"), "body"));
    }

    #[test]
    fn test_parse_records_accepts_heterogeneous_shapes() {
        let input = r#"
{"content": "Article body", "source": "rss", "url": "https://example.com/a"}

{"text": "A post", "published_at": 1700000000}
{"page_content": "Scraped", "published_at": "2024-05-01T12:00:00Z"}
"#;
        let records = parse_records(input).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].fields.resolve_content(), Some("A post"));
        assert_eq!(
            parse_published_at(records[2].published_at.as_ref()).unwrap(),
            Some(1714564800)
        );
    }

    #[test]
    fn test_parse_records_reports_line_number() {
        let err = parse_records("{\"content\": \"ok\"}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_published_at_rejects_garbage() {
        assert!(parse_published_at(Some(&Value::Bool(true))).is_err());
        assert!(parse_published_at(Some(&Value::String("yesterday".into()))).is_err());
        assert_eq!(parse_published_at(None).unwrap(), None);
    }
}
