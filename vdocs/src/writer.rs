//! Markdown site writer.
//!
//! Renders every document that has a destination to a `.md` page, and dumps
//! the link registry (`xrefs.json`) and a page manifest (`manifest.json`).
//! Pages are written to a staging directory inside the output root and only
//! moved into place once everything rendered.

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use versioned_docs::{keys, site_link, Document};

pub const XREFS_FILE: &str = "xrefs.json";
pub const MANIFEST_FILE: &str = "manifest.json";

pub struct SiteWriter<'a> {
    output: &'a Path,
    index_file_name: &'a str,
}

impl<'a> SiteWriter<'a> {
    pub fn new(output: &'a Path, index_file_name: &'a str) -> Self {
        Self {
            output,
            index_file_name,
        }
    }

    /// Write all pages plus `xrefs.json` and `manifest.json`. Returns the
    /// number of pages written.
    pub fn write(&self, documents: &[Document], links: &BTreeMap<String, String>) -> Result<usize> {
        fs::create_dir_all(self.output)
            .with_context(|| format!("failed to create output directory: {}", self.output.display()))?;
        let staging = tempfile::Builder::new()
            .prefix(".vdocs-staging-")
            .tempdir_in(self.output)
            .context("failed to create staging directory")?;

        let mut pages = Vec::new();
        for doc in documents {
            let Some(destination) = doc.destination() else { continue };
            let relative = page_path(destination);
            let target = staging.path().join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, self.render_page(doc, documents)?)
                .with_context(|| format!("failed to write {}", target.display()))?;
            pages.push(json!({
                "path": relative.to_string_lossy().replace('\\', "/"),
                "link": site_link(destination, self.index_file_name),
                "kind": doc.get_str(keys::KIND),
                "revision": doc.get_str(keys::REVISION_NAME),
                "xref": doc.get_str(keys::XREF),
            }));
        }

        let revisions: Vec<_> = documents
            .iter()
            .filter(|d| d.is_revision_marker())
            .map(|d| {
                json!({
                    "name": d.get_str(keys::REVISION_NAME),
                    "selector": d.get_str(keys::REVISION_SELECTOR),
                    "id": d.get_str(keys::REVISION_ID),
                    "timestamp": d.get_timestamp(keys::REVISION_TIMESTAMP).map(|t| t.to_rfc3339()),
                })
            })
            .collect();

        let page_count = pages.len();
        let manifest = json!({ "revisions": revisions, "pages": pages });
        fs::write(
            staging.path().join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        fs::write(
            staging.path().join(XREFS_FILE),
            serde_json::to_string_pretty(links)?,
        )?;

        self.commit(staging.path())?;
        Ok(page_count)
    }

    /// Move each staged top-level entry over its counterpart in the output.
    fn commit(&self, staging: &Path) -> Result<()> {
        for entry in fs::read_dir(staging)? {
            let entry = entry?;
            let target = self.output.join(entry.file_name());
            if target.is_dir() {
                fs::remove_dir_all(&target)
                    .with_context(|| format!("failed to replace {}", target.display()))?;
            } else if target.exists() {
                fs::remove_file(&target)
                    .with_context(|| format!("failed to replace {}", target.display()))?;
            }
            debug!(target = %target.display(), "writer: moving into place");
            fs::rename(entry.path(), &target)
                .with_context(|| format!("failed to move {} into place", target.display()))?;
        }
        Ok(())
    }

    fn render_page(&self, doc: &Document, all: &[Document]) -> Result<String> {
        let mut out = String::new();
        let title = doc
            .get_str(keys::TITLE)
            .or_else(|| doc.get_str(keys::DISPLAY_NAME))
            .unwrap_or("Untitled");
        out.push_str(&format!("# {}\n\n", title));

        out.push_str("| | |\n|---|---|\n");
        if let Some(kind) = doc.get_str(keys::SPECIFIC_KIND).or_else(|| doc.get_str(keys::KIND)) {
            out.push_str(&format!("| Kind | {} |\n", kind));
        }
        if let Some(revision) = doc.get_str(keys::REVISION_NAME) {
            match doc.get_str(keys::REVISION_ID) {
                Some(id) => out.push_str(&format!("| Revision | `{}` ({}) |\n", revision, short_id(id))),
                None => out.push_str(&format!("| Revision | `{}` |\n", revision)),
            }
        }
        if let Some(timestamp) = doc.get_timestamp(keys::REVISION_TIMESTAMP) {
            out.push_str(&format!("| Committed | {} |\n", timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if let Some(xref) = doc.get_str(keys::XREF) {
            out.push_str(&format!("| Xref | `{}` |\n", xref));
        }
        if let Some(owner) = doc.get_document(keys::CONTAINING_TYPE) {
            if let (Some(name), Some(dest)) = (owner.get_str(keys::DISPLAY_NAME), owner.destination()) {
                out.push_str(&format!("| Member of | [{}]({}) |\n", name, site_link(dest, self.index_file_name)));
            }
        }
        out.push('\n');

        let body = doc.content().read_string()?;
        if !body.trim().is_empty() {
            out.push_str(body.trim_end());
            out.push_str("\n\n");
        }

        if doc.is_revision_marker() {
            let revision = doc.get_str(keys::REVISION_NAME);
            let types: Vec<&Document> = all
                .iter()
                .filter(|d| d.get_str(keys::KIND) == Some(keys::KIND_NAMED_TYPE))
                .filter(|d| d.get_str(keys::REVISION_NAME) == revision)
                .collect();
            self.push_listing(&mut out, "Types", &types);
        } else {
            let members: Vec<&Document> = doc.children().iter().collect();
            self.push_listing(&mut out, "Members", &members);
        }
        Ok(out)
    }

    fn push_listing(&self, out: &mut String, heading: &str, docs: &[&Document]) {
        if docs.is_empty() {
            return;
        }
        out.push_str(&format!("## {}\n\n", heading));
        for doc in docs {
            let name = doc.get_str(keys::DISPLAY_NAME).unwrap_or("?");
            match doc.destination() {
                Some(dest) => out.push_str(&format!("- [{}]({})\n", name, site_link(dest, self.index_file_name))),
                None => out.push_str(&format!("- {}\n", name)),
            }
        }
        out.push('\n');
    }
}

/// Output-relative markdown path: `api/latest/index.html` → `api/latest/index.md`.
fn page_path(destination: &Path) -> PathBuf {
    let relative: PathBuf = destination
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect();
    relative.with_extension("md")
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
