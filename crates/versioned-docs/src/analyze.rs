//! Analyzer contract.
//!
//! The analyzer turns one revision's sources into symbol documents. It is
//! free to drop metadata it does not know about; [`crate::restore`] puts the
//! revision keys back afterwards.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::keys;
use crate::stage::{Context, Stage};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Everything an analyzer gets for one revision.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Source documents plus the revision marker.
    pub inputs: Vec<Document>,
    /// Symbol destinations go under this directory.
    pub destination_prefix: PathBuf,
    pub assemblies: Vec<String>,
    pub projects: Vec<String>,
    pub solutions: Vec<String>,
    pub include_global_namespace: bool,
    pub implicit_inherit_doc: bool,
}

/// Source-to-symbol transformation. Runs on a blocking thread.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, request: AnalysisRequest) -> Result<Vec<Document>>;
}

impl<F> Analyzer for F
where
    F: Fn(AnalysisRequest) -> Result<Vec<Document>> + Send + Sync,
{
    fn analyze(&self, request: AnalysisRequest) -> Result<Vec<Document>> {
        self(request)
    }
}

/// Adapts an [`Analyzer`] to the [`Stage`] interface.
#[derive(Clone)]
pub struct AnalyzeStage {
    analyzer: Arc<dyn Analyzer>,
}

impl AnalyzeStage {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self { analyzer }
    }

    /// Build the request for `inputs`. The prefix comes from the first
    /// input's revision name.
    pub fn request(ctx: &Context, inputs: Vec<Document>) -> AnalysisRequest {
        let settings = ctx.settings();
        let mut destination_prefix = settings.api_path.clone();
        if let Some(revision) = inputs.first().and_then(|d| d.get_str(keys::REVISION_NAME)) {
            destination_prefix.push(revision);
        }
        AnalysisRequest {
            inputs,
            destination_prefix,
            assemblies: settings.assembly_files.clone(),
            projects: settings.project_files.clone(),
            solutions: settings.solution_files.clone(),
            include_global_namespace: settings.include_global_namespace,
            implicit_inherit_doc: settings.implicit_inherit_doc,
        }
    }
}

#[async_trait]
impl Stage for AnalyzeStage {
    async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = Self::request(ctx, inputs);
        debug!(
            inputs = request.inputs.len(),
            prefix = %request.destination_prefix.display(),
            "analyze: running"
        );
        let analyzer = Arc::clone(&self.analyzer);
        tokio::task::spawn_blocking(move || analyzer.analyze(request))
            .await
            .map_err(|e| Error::Analysis(format!("analyzer task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::test_context;
    use std::path::Path;

    fn echo_prefix(request: AnalysisRequest) -> Result<Vec<Document>> {
        Ok(vec![Document::new()
            .with_destination(request.destination_prefix.join("Foo/index.html"))
            .with_meta(keys::DISPLAY_NAME, "Foo")])
    }

    #[tokio::test]
    async fn prefix_uses_first_revision_name() {
        let stage = AnalyzeStage::new(Arc::new(echo_prefix));
        let inputs = vec![
            Document::new().with_meta(keys::REVISION_NAME, "v1.0"),
            Document::new().with_meta(keys::REVISION_NAME, "ignored"),
        ];
        let out = stage.execute(&test_context(), inputs).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination(), Some(Path::new("api/v1.0/Foo/index.html")));
    }

    #[tokio::test]
    async fn empty_input_skips_analyzer() {
        let stage = AnalyzeStage::new(Arc::new(|_: AnalysisRequest| -> Result<Vec<Document>> {
            Err(Error::Analysis("must not run".into()))
        }));
        let out = stage.execute(&test_context(), Vec::new()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn analyzer_errors_propagate() {
        let stage = AnalyzeStage::new(Arc::new(|_: AnalysisRequest| -> Result<Vec<Document>> {
            Err(Error::Analysis("bad input".into()))
        }));
        let err = stage
            .execute(&test_context(), vec![Document::new()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad input"));
    }

    #[test]
    fn request_carries_project_settings() {
        let request = AnalyzeStage::request(&test_context(), vec![Document::new()]);
        assert_eq!(request.destination_prefix, Path::new("api"));
        assert!(request.include_global_namespace);
        assert!(!request.implicit_inherit_doc);
    }
}
