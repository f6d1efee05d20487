//! Source file reader.
//!
//! Expands the configured globs inside every marker's checkout and emits one
//! document per matching file. Content stays on disk until a later stage
//! reads it.

use crate::document::{Content, Document};
use crate::error::{Error, Result};
use crate::keys;
use crate::stage::{Context, Stage};
use async_trait::async_trait;
use glob::{glob_with, MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Keys copied from a marker onto each of its source documents.
const INHERITED_KEYS: [&str; 4] = [
    keys::REVISION_NAME,
    keys::REVISION_ID,
    keys::REVISION_TIMESTAMP,
    keys::REPOSITORY_ROOT,
];

/// Reads sources for every revision marker in the input. Inputs that are
/// not markers are ignored; the output holds only source documents.
pub struct ReadSourceFiles {
    patterns: Vec<String>,
}

impl ReadSourceFiles {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }
}

#[async_trait]
impl Stage for ReadSourceFiles {
    async fn execute(&self, _ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for marker in inputs.iter().filter(|d| d.is_revision_marker()) {
            out.extend(read_sources(marker, &self.patterns)?);
        }
        Ok(out)
    }
}

/// Source documents for one marker, sorted by path.
pub fn read_sources(marker: &Document, patterns: &[String]) -> Result<Vec<Document>> {
    let Some(root) = marker.get_path(keys::REPOSITORY_ROOT) else {
        warn!(marker = %marker.describe(), "reader: marker has no repository root, skipping");
        return Ok(Vec::new());
    };

    let files = expand(root, patterns)?;
    debug!(
        version = marker.get_str(keys::REVISION_NAME).unwrap_or_default(),
        files = files.len(),
        "reader: sources found"
    );

    let inherited: Vec<_> = INHERITED_KEYS
        .iter()
        .filter_map(|k| marker.get(k).map(|v| (*k, v.clone())))
        .collect();
    Ok(files
        .into_iter()
        .map(|path| {
            let mut doc = Document::new()
                .with_source(&path)
                .with_content(Content::File(path));
            for (key, value) in &inherited {
                doc = doc.with_meta(key, value.clone());
            }
            doc
        })
        .collect())
}

/// Every regular file under `root` matching any of `patterns`, deduplicated
/// and sorted.
fn expand(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let base = Pattern::escape(&root.to_string_lossy());

    let mut files = Vec::new();
    for pattern in patterns {
        let full = format!("{}/{}", base, pattern.trim_start_matches('/'));
        let paths = glob_with(&full, options).map_err(|e| Error::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!(pattern = %pattern, error = %e, "reader: unreadable path skipped"),
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
