//! Document model: the unit of data flowing through every pipeline stage.
//!
//! Documents are treated as immutable values: stages never mutate a document
//! they received, they produce a new one with [`Document::clone_with`] or the
//! `with_*` builders.

use crate::keys;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ordered metadata mapping.
pub type Metadata = IndexMap<String, Value>;

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Path(PathBuf),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Document(Box<Document>),
    Documents(Vec<Document>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::Path(p)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Document(Box::new(d))
    }
}

/// Document body. File content is read on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    #[default]
    Empty,
    Bytes(Arc<Vec<u8>>),
    File(PathBuf),
}

impl Content {
    pub fn from_text(text: impl Into<String>) -> Self {
        Content::Bytes(Arc::new(text.into().into_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Content::Empty)
    }

    /// Materialize the bytes, reading from disk for file-backed content.
    pub fn read(&self) -> io::Result<Cow<'_, [u8]>> {
        match self {
            Content::Empty => Ok(Cow::Borrowed(&[])),
            Content::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            Content::File(path) => Ok(Cow::Owned(fs::read(path)?)),
        }
    }

    pub fn read_string(&self) -> io::Result<String> {
        Ok(String::from_utf8_lossy(&self.read()?).into_owned())
    }
}

/// A pipeline document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
    metadata: Metadata,
    content: Content,
    children: Vec<Document>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn without_meta(mut self, key: &str) -> Self {
        self.metadata.shift_remove(key);
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = content;
        self
    }

    pub fn with_children(mut self, children: Vec<Document>) -> Self {
        self.children = children;
        self
    }

    /// Clone with `overrides` merged into the metadata. Existing keys keep
    /// their position, new keys are appended.
    pub fn clone_with(&self, overrides: &Metadata) -> Document {
        let mut doc = self.clone();
        for (key, value) in overrides {
            doc.metadata.insert(key.clone(), value.clone());
        }
        doc
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn children(&self) -> &[Document] {
        &self.children
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// String view of a `String` or `Path` value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key)? {
            Value::String(s) => Some(s),
            Value::Path(p) => p.to_str(),
            _ => None,
        }
    }

    pub fn get_path(&self, key: &str) -> Option<&Path> {
        match self.metadata.get(key)? {
            Value::Path(p) => Some(p),
            Value::String(s) => Some(Path::new(s)),
            _ => None,
        }
    }

    pub fn get_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.metadata.get(key)? {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        match self.metadata.get(key)? {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn contains_keys<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().all(|k| self.metadata.contains_key(k.as_ref()))
    }

    /// True for the structural document representing a whole revision.
    pub fn is_revision_marker(&self) -> bool {
        self.get_str(keys::KIND) == Some(keys::KIND_REVISION)
    }

    /// Human-readable identifier for diagnostics.
    pub fn describe(&self) -> String {
        match (&self.source, &self.destination) {
            (Some(src), _) => src.display().to_string(),
            (None, Some(dest)) => dest.display().to_string(),
            (None, None) => self
                .get_str(keys::DISPLAY_NAME)
                .unwrap_or("<anonymous>")
                .to_string(),
        }
    }

    /// Replace file-backed content (recursively) with the bytes it points at,
    /// so the document stays valid after its checkout directory is removed.
    pub fn materialized(&self) -> io::Result<Document> {
        let mut doc = self.clone();
        if let Content::File(_) = doc.content {
            doc.content = Content::Bytes(Arc::new(self.content.read()?.into_owned()));
        }
        for value in doc.metadata.values_mut() {
            match value {
                Value::Document(d) => **d = d.materialized()?,
                Value::Documents(ds) => {
                    for d in ds.iter_mut() {
                        *d = d.materialized()?;
                    }
                }
                _ => {}
            }
        }
        doc.children = self
            .children
            .iter()
            .map(Document::materialized)
            .collect::<io::Result<_>>()?;
        Ok(doc)
    }

    /// Feed the document's content identity into `hasher`: source and
    /// destination paths, every metadata entry, the content hash and the
    /// identity of each child, in order.
    pub fn fingerprint(&self, hasher: &mut Sha256) -> io::Result<()> {
        write_opt_path(hasher, b'S', self.source.as_deref());
        write_opt_path(hasher, b'D', self.destination.as_deref());
        hasher.update((self.metadata.len() as u64).to_le_bytes());
        for (key, value) in &self.metadata {
            write_field(hasher, b'k', key.as_bytes());
            fingerprint_value(hasher, value)?;
        }
        let body = Sha256::digest(self.content.read()?);
        write_field(hasher, b'C', &body);
        hasher.update((self.children.len() as u64).to_le_bytes());
        for child in &self.children {
            child.fingerprint(hasher)?;
        }
        Ok(())
    }
}

fn fingerprint_value(hasher: &mut Sha256, value: &Value) -> io::Result<()> {
    match value {
        Value::String(s) => write_field(hasher, b's', s.as_bytes()),
        Value::Path(p) => write_field(hasher, b'p', p.to_string_lossy().as_bytes()),
        Value::Number(n) => write_field(hasher, b'n', &n.to_bits().to_le_bytes()),
        Value::Timestamp(t) => write_field(hasher, b't', &t.timestamp_millis().to_le_bytes()),
        Value::Document(d) => {
            hasher.update([b'd']);
            d.fingerprint(hasher)?;
        }
        Value::Documents(ds) => {
            hasher.update([b'l']);
            hasher.update((ds.len() as u64).to_le_bytes());
            for d in ds {
                d.fingerprint(hasher)?;
            }
        }
    }
    Ok(())
}

/// Tag + length prefix keeps adjacent fields from running together.
fn write_field(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn write_opt_path(hasher: &mut Sha256, tag: u8, path: Option<&Path>) {
    match path {
        Some(p) => write_field(hasher, tag, p.to_string_lossy().as_bytes()),
        None => hasher.update([tag, 0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(doc: &Document) -> Vec<u8> {
        let mut hasher = Sha256::new();
        doc.fingerprint(&mut hasher).unwrap();
        hasher.finalize().to_vec()
    }

    #[test]
    fn clone_with_overrides_and_appends() {
        let doc = Document::new()
            .with_meta("A", "1")
            .with_meta("B", "2");
        let mut patch = Metadata::new();
        patch.insert("B".into(), "changed".into());
        patch.insert("C".into(), "3".into());

        let out = doc.clone_with(&patch);
        let keys: Vec<&str> = out.metadata().keys().map(String::as_str).collect();
        assert_eq!(keys, ["A", "B", "C"]);
        assert_eq!(out.get_str("B"), Some("changed"));
        // original untouched
        assert_eq!(doc.get_str("B"), Some("2"));
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = Document::new().with_source("a.rs").with_content(Content::from_text("x"));
        let b = Document::new().with_source("a.rs").with_content(Content::from_text("y"));
        assert_ne!(digest(&a), digest(&b));
        assert_eq!(digest(&a), digest(&a.clone()));
    }

    #[test]
    fn fingerprint_changes_with_metadata() {
        let a = Document::new().with_meta(keys::REVISION_ID, "abc");
        let b = Document::new().with_meta(keys::REVISION_ID, "abd");
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn fingerprint_separates_adjacent_fields() {
        let a = Document::new().with_meta("ab", "c");
        let b = Document::new().with_meta("a", "bc");
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn file_content_is_read_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.rs");
        let doc = Document::new().with_content(Content::File(path.clone()));
        // Nothing on disk yet: constructing the document must not fail.
        assert!(doc.content().read().is_err());

        fs::write(&path, "pub struct Foo;").unwrap();
        assert_eq!(doc.content().read_string().unwrap(), "pub struct Foo;");

        let owned = doc.materialized().unwrap();
        drop(dir);
        assert_eq!(owned.content().read_string().unwrap(), "pub struct Foo;");
    }

    #[test]
    fn marker_detection_uses_kind() {
        let marker = Document::new().with_meta(keys::KIND, keys::KIND_REVISION);
        let symbol = Document::new().with_meta(keys::KIND, keys::KIND_NAMED_TYPE);
        assert!(marker.is_revision_marker());
        assert!(!symbol.is_revision_marker());
    }
}
