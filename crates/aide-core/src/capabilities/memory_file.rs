//! Long-term memory kept in a markdown file.
//!
//! Layout:
//!
//! ```text
//! # Assistant Memory
//! > Updated: 2025-01-10T12:00:00Z | Size: 1.2k chars
//!
//! - [m1] Prefers tea over coffee
//! - [m2] Sister is called Ana
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::{CapabilityStore, ListFilter, MemoryEntry};
use crate::error::CapabilityError;
use crate::tool_args::{MemoryFields, MemoryPatch};

const HEADER_TITLE: &str = "# Assistant Memory";
const UPDATED_PREFIX: &str = "> Updated:";

pub struct FileMemoryStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Vec<MemoryEntry>, CapabilityError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_entries(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn write_entries(&self, entries: &[MemoryEntry]) -> Result<(), CapabilityError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent, e))?;
            }
        }

        let body = render_body(entries);
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let content = with_header(&body, &timestamp, &format_size(body.len()));
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        debug!("Wrote {} memories to {}", entries.len(), self.path.display());
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> CapabilityError {
    CapabilityError::Rejected(format!("memory file {}: {}", path.display(), e))
}

/// Format the file size in a human-readable way.
fn format_size(chars: usize) -> String {
    if chars < 1000 {
        format!("{} chars", chars)
    } else {
        format!("{:.1}k chars", chars as f64 / 1000.0)
    }
}

fn with_header(body: &str, timestamp: &str, size: &str) -> String {
    format!(
        "{}\n{} {} | Size: {}\n\n{}\n",
        HEADER_TITLE,
        UPDATED_PREFIX,
        timestamp,
        size,
        body.trim_end()
    )
}

fn render_body(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("- [{}] {}", entry.id, entry.content.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `- [id] text` lines; everything else (header, blank lines) is skipped.
fn parse_entries(content: &str) -> Vec<MemoryEntry> {
    content
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("- [")?;
            let (id, text) = rest.split_once(']')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            Some(MemoryEntry {
                id: id.to_string(),
                content: text.trim().to_string(),
                created_at: None,
            })
        })
        .collect()
}

fn next_id(entries: &[MemoryEntry]) -> String {
    let max = entries
        .iter()
        .filter_map(|entry| entry.id.strip_prefix('m')?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("m{}", max + 1)
}

#[async_trait]
impl CapabilityStore<MemoryFields, MemoryPatch, MemoryEntry> for FileMemoryStore {
    async fn create(&self, fields: MemoryFields) -> Result<String, CapabilityError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let id = next_id(&entries);
        entries.push(MemoryEntry {
            id: id.clone(),
            content: fields.content,
            created_at: Some(Utc::now()),
        });
        self.write_entries(&entries).await?;
        Ok(id)
    }

    async fn update(&self, id: &str, patch: MemoryPatch) -> Result<(), CapabilityError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| CapabilityError::NotFound(id.to_string()))?;
        entry.content = patch.content;
        self.write_entries(&entries).await
    }

    async fn delete(&self, id: &str) -> Result<(), CapabilityError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Err(CapabilityError::NotFound(id.to_string()));
        }
        self.write_entries(&entries).await
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<MemoryEntry>, CapabilityError> {
        let mut entries = self.read_entries().await?;
        if let Some(limit) = filter.limit {
            // Most recent entries are the most relevant
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fact(content: &str) -> MemoryFields {
        MemoryFields {
            content: content.to_string(),
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 chars");
        assert_eq!(format_size(1000), "1.0k chars");
        assert_eq!(format_size(2500), "2.5k chars");
    }

    #[test]
    fn test_parse_skips_header_and_noise() {
        let content = "# Assistant Memory\n> Updated: 2025-01-10T12:00:00Z | Size: 40 chars\n\n- [m1] Likes tea\nrandom line\n- [m7]   Sister is Ana  \n- [] nothing\n";
        let entries = parse_entries(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "m1");
        assert_eq!(entries[1].content, "Sister is Ana");
        assert_eq!(next_id(&entries), "m8");
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory.md");
        let store = FileMemoryStore::new(&path);

        let first = store.create(fact("Likes tea")).await.unwrap();
        let second = store.create(fact("Walks the dog at 7")).await.unwrap();
        store
            .update(&first, MemoryPatch { content: "Likes green tea".to_string() })
            .await
            .unwrap();
        store.delete(&second).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(HEADER_TITLE));
        assert!(written.contains("> Updated:"));
        assert!(written.contains("- [m1] Likes green tea"));
        assert!(!written.contains("dog"));

        // A fresh store over the same file sees the same entries
        let reopened = FileMemoryStore::new(&path);
        let entries = reopened.list(&ListFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "Likes green tea");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_and_unknown_ids_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileMemoryStore::new(dir.path().join("memory.md"));
        assert!(store.list(&ListFilter::default()).await.unwrap().is_empty());
        assert_eq!(
            store.delete("m3").await,
            Err(CapabilityError::NotFound("m3".to_string()))
        );
    }

    #[tokio::test]
    async fn test_list_limit_keeps_most_recent() {
        let dir = TempDir::new().unwrap();
        let store = FileMemoryStore::new(dir.path().join("memory.md"));
        for i in 0..5 {
            store.create(fact(&format!("fact {}", i))).await.unwrap();
        }
        let entries = store.list(&ListFilter::upcoming(2)).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].content, "fact 4");
    }
}
