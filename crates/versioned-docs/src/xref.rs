//! Cross-reference linker: revision-scoped xref ids and the name → link registry.

use crate::document::{Document, Metadata, Value};
use crate::error::Result;
use crate::keys;
use crate::stage::{Context, Stage};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// Run-wide map from HTML-encoded display name to generated link.
///
/// Safe for concurrent insertion from any number of stages. Entries are
/// never removed; a second insert under the same name replaces the first.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: DashMap<String, String>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Returns the link that was replaced, if any.
    pub fn insert(&self, name: impl Into<String>, link: impl Into<String>) -> Option<String> {
        self.links.insert(name.into(), link.into())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.links.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Sorted copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.links
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Encode the five HTML-significant characters.
pub fn html_encode(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Revision-qualified cross-reference id: `api-<revision><qualifiedName>`.
pub fn xref_id(revision: &str, qualified_name: &str) -> String {
    format!("api-{}{}", revision, qualified_name)
}

/// Name a document is registered under in the link registry, if any.
///
/// Members are registered as `<Type>.<member>` and only when the containing
/// type's link can be resolved.
pub fn display_name(ctx: &Context, doc: &Document) -> Option<String> {
    match doc.get_str(keys::KIND)? {
        keys::KIND_NAMED_TYPE => doc.get_str(keys::DISPLAY_NAME).map(str::to_string),
        keys::KIND_PROPERTY | keys::KIND_METHOD => {
            let containing = doc.get_document(keys::CONTAINING_TYPE)?;
            ctx.link_for(containing)?;
            Some(format!(
                "{}.{}",
                containing.get_str(keys::DISPLAY_NAME)?,
                doc.get_str(keys::DISPLAY_NAME)?
            ))
        }
        keys::KIND_REVISION => doc.get_str(keys::REVISION_NAME).map(str::to_string),
        _ => None,
    }
}

/// Registers every document in the shared registry and stamps non-marker
/// documents with their revision-qualified xref id.
#[derive(Debug, Default, Clone, Copy)]
pub struct XrefLinker;

impl XrefLinker {
    fn link(&self, ctx: &Context, doc: Document) -> Document {
        if let Some(name) = display_name(ctx, &doc) {
            if let Some(link) = ctx.link_for(&doc) {
                if let Some(previous) = ctx.links().insert(html_encode(&name), link.clone()) {
                    if previous != link {
                        debug!(name = %name, previous = %previous, link = %link, "xref: name registered twice, keeping latest");
                    }
                }
            }
        }

        let settings = ctx.settings();
        let mut patch = Metadata::new();
        if !doc.is_revision_marker() {
            let revision = doc.get_str(keys::REVISION_NAME).unwrap_or_default();
            let qualified = doc.get_str(keys::QUALIFIED_NAME).unwrap_or_default();
            patch.insert(keys::XREF.to_string(), xref_id(revision, qualified).into());
        }
        if let Some(layout) = &settings.api_layout {
            if !layout.as_os_str().is_empty() {
                patch.insert(keys::LAYOUT.to_string(), Value::Path(layout.clone()));
            }
        }
        if settings.output_api_documents {
            patch.insert(keys::CONTENT_TYPE.to_string(), keys::CONTENT_TYPE_CONTENT.into());
        }

        if patch.is_empty() {
            doc
        } else {
            doc.clone_with(&patch)
        }
    }
}

#[async_trait]
impl Stage for XrefLinker {
    async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        Ok(inputs.into_iter().map(|doc| self.link(ctx, doc)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::stage::test_context;
    use std::sync::Arc;

    fn named_type(rev: &str, name: &str) -> Document {
        Document::new()
            .with_destination(format!("api/{}/MyLib.{}/index.html", rev, name))
            .with_meta(keys::KIND, keys::KIND_NAMED_TYPE)
            .with_meta(keys::DISPLAY_NAME, name)
            .with_meta(keys::QUALIFIED_NAME, format!("MyLib.{}", name))
            .with_meta(keys::REVISION_NAME, rev)
    }

    fn marker(rev: &str) -> Document {
        Document::new()
            .with_destination(format!("api/{}/index.html", rev))
            .with_meta(keys::KIND, keys::KIND_REVISION)
            .with_meta(keys::REVISION_NAME, rev)
    }

    #[tokio::test]
    async fn xref_ids_are_revision_qualified() {
        let ctx = test_context();
        let out = XrefLinker
            .execute(&ctx, vec![named_type("v1", "Foo"), named_type("v2", "Foo")])
            .await
            .unwrap();
        assert_eq!(out[0].get_str(keys::XREF), Some("api-v1MyLib.Foo"));
        assert_eq!(out[1].get_str(keys::XREF), Some("api-v2MyLib.Foo"));
    }

    #[tokio::test]
    async fn marker_registered_without_xref() {
        let ctx = test_context();
        let out = XrefLinker.execute(&ctx, vec![marker("latest")]).await.unwrap();
        assert_eq!(out[0].get(keys::XREF), None);
        assert_eq!(ctx.links().get("latest").as_deref(), Some("/api/latest"));
    }

    #[tokio::test]
    async fn members_use_containing_type_name() {
        let ctx = test_context();
        let owner = named_type("latest", "Foo");
        let method = Document::new()
            .with_destination("api/latest/MyLib.Foo/bar/index.html")
            .with_meta(keys::KIND, keys::KIND_METHOD)
            .with_meta(keys::DISPLAY_NAME, "bar()")
            .with_meta(keys::QUALIFIED_NAME, "MyLib.Foo.bar()")
            .with_meta(keys::REVISION_NAME, "latest")
            .with_meta(keys::CONTAINING_TYPE, owner);
        XrefLinker.execute(&ctx, vec![method]).await.unwrap();
        assert_eq!(
            ctx.links().get("Foo.bar()").as_deref(),
            Some("/api/latest/MyLib.Foo/bar")
        );
    }

    #[tokio::test]
    async fn member_without_resolvable_type_is_skipped() {
        let ctx = test_context();
        let unplaced = Document::new()
            .with_meta(keys::KIND, keys::KIND_NAMED_TYPE)
            .with_meta(keys::DISPLAY_NAME, "Foo");
        let property = Document::new()
            .with_destination("api/latest/p/index.html")
            .with_meta(keys::KIND, keys::KIND_PROPERTY)
            .with_meta(keys::DISPLAY_NAME, "len")
            .with_meta(keys::REVISION_NAME, "latest")
            .with_meta(keys::CONTAINING_TYPE, unplaced);
        let out = XrefLinker.execute(&ctx, vec![property]).await.unwrap();
        assert!(ctx.links().is_empty());
        // the xref id is still assigned
        assert_eq!(out[0].get_str(keys::XREF), Some("api-latest"));
    }

    #[tokio::test]
    async fn duplicate_names_keep_last_link() {
        let ctx = test_context();
        XrefLinker
            .execute(&ctx, vec![named_type("v1", "Foo"), named_type("v2", "Foo")])
            .await
            .unwrap();
        assert_eq!(ctx.links().len(), 1);
        assert_eq!(ctx.links().get("Foo").as_deref(), Some("/api/v2/MyLib.Foo"));
    }

    #[tokio::test]
    async fn names_are_html_encoded() {
        let ctx = test_context();
        XrefLinker
            .execute(&ctx, vec![named_type("v1", "List<T>")])
            .await
            .unwrap();
        assert!(ctx.links().get("List&lt;T&gt;").is_some());
    }

    #[tokio::test]
    async fn layout_and_content_type_follow_settings() {
        let settings = Settings {
            api_layout: Some("layouts/api".into()),
            output_api_documents: true,
            ..Settings::default()
        };
        let ctx = Context::new(Arc::new(settings), Arc::new(LinkRegistry::new()));
        let out = XrefLinker.execute(&ctx, vec![named_type("v1", "Foo")]).await.unwrap();
        assert_eq!(out[0].get_str(keys::LAYOUT), Some("layouts/api"));
        assert_eq!(
            out[0].get_str(keys::CONTENT_TYPE),
            Some(keys::CONTENT_TYPE_CONTENT)
        );
    }

    #[test]
    fn registry_accepts_concurrent_inserts() {
        let registry = Arc::new(LinkRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        registry.insert(format!("T{}", j), format!("/t{}/{}", i, j));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 100);
    }
}
