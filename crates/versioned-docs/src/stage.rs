//! Stage abstraction: a transformation from a document set to a document set.
//!
//! Stages compose into a [`Chain`]; wrapper stages (cache, child scope,
//! metadata restorer) own a chain and decide what inputs it sees.

use crate::config::Settings;
use crate::document::Document;
use crate::error::Result;
use crate::xref::LinkRegistry;
use async_trait::async_trait;
use std::path::{Component, Path};
use std::sync::Arc;

/// Run-wide services handed to every stage.
#[derive(Debug, Clone)]
pub struct Context {
    settings: Arc<Settings>,
    links: Arc<LinkRegistry>,
}

impl Context {
    pub fn new(settings: Arc<Settings>, links: Arc<LinkRegistry>) -> Self {
        Self { settings, links }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn links(&self) -> &Arc<LinkRegistry> {
        &self.links
    }

    /// Site-relative link to a document's destination, `None` when the
    /// document has no destination. A trailing index file is dropped so
    /// `api/latest/index.html` links as `/api/latest`.
    pub fn link_for(&self, doc: &Document) -> Option<String> {
        doc.destination()
            .map(|dest| site_link(dest, &self.settings.index_file_name))
    }
}

/// `/`-separated site link for an output path, without a trailing
/// `index_file_name`.
pub fn site_link(destination: &Path, index_file_name: &str) -> String {
    let mut parts: Vec<String> = destination
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.last().map(String::as_str) == Some(index_file_name) {
        parts.pop();
    }
    format!("/{}", parts.join("/"))
}

/// A document transformation.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>>;
}

/// Stages run in order, each receiving the previous one's output.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn then_shared(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        let mut docs = inputs;
        for stage in &self.stages {
            docs = stage.execute(ctx, docs).await?;
        }
        Ok(docs)
    }
}

/// Adapts a synchronous closure into a stage.
pub struct FnStage<F>(F);

impl<F> FnStage<F>
where
    F: Fn(&Context, Vec<Document>) -> Result<Vec<Document>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&Context, Vec<Document>) -> Result<Vec<Document>> + Send + Sync,
{
    async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        (self.0)(ctx, inputs)
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> Context {
    Context::new(Arc::new(Settings::default()), Arc::new(LinkRegistry::default()))
}
