//! Metadata restorer: carries selected keys across a lossy chain.
//!
//! The analyzer regenerates documents from scratch and keeps only the keys
//! it knows about. This wrapper captures the revision keys from the inputs,
//! runs the chain, stamps the keys back onto every output and re-appends
//! the revision marker the chain consumed.

use crate::document::{Document, Metadata};
use crate::error::Result;
use crate::keys;
use crate::stage::{Chain, Context, Stage};
use async_trait::async_trait;
use tracing::debug;

pub struct RestoreMetadata {
    keys: Vec<String>,
    chain: Chain,
}

impl RestoreMetadata {
    pub fn new<S: AsRef<str>>(keys: &[S], chain: Chain) -> Self {
        Self {
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
            chain,
        }
    }

    /// Restore `RevisionName`, `RevisionId` and `RevisionTimestamp`.
    pub fn revision(chain: Chain) -> Self {
        Self::new(&keys::REVISION_KEYS, chain)
    }

    /// Values of the configured keys from the first input carrying all of
    /// them. Empty when no input does.
    pub fn capture(&self, inputs: &[Document]) -> Metadata {
        inputs
            .iter()
            .find(|doc| doc.contains_keys(&self.keys))
            .map(|doc| {
                self.keys
                    .iter()
                    .filter_map(|k| doc.get(k).map(|v| (k.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Merge `patch` into every document.
pub fn apply_patch(docs: Vec<Document>, patch: &Metadata) -> Vec<Document> {
    if patch.is_empty() {
        return docs;
    }
    docs.iter().map(|doc| doc.clone_with(patch)).collect()
}

#[async_trait]
impl Stage for RestoreMetadata {
    async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        let patch = self.capture(&inputs);
        let marker = inputs.iter().find(|doc| doc.is_revision_marker()).cloned();

        let produced = self.chain.execute(ctx, inputs).await?;
        debug!(
            produced = produced.len(),
            restored_keys = patch.len(),
            marker = marker.is_some(),
            "restore: reattaching metadata"
        );

        let mut outputs = apply_patch(produced, &patch);
        if let Some(marker) = marker {
            outputs.push(marker);
        }
        Ok(outputs)
    }
}
