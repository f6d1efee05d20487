//! Child-scope executor: runs a chain against each input's children.

use crate::document::Document;
use crate::error::Result;
use crate::stage::{Chain, Context, Stage};
use async_trait::async_trait;
use futures::future::try_join_all;

/// For every input document, executes the chain with that document's
/// children as the input set. The chain outputs replace the parent in the
/// result stream, in input order. Parents never share intermediate state.
pub struct ExecuteOverChildren {
    chain: Chain,
}

impl ExecuteOverChildren {
    pub fn new(chain: Chain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Stage for ExecuteOverChildren {
    async fn execute(&self, ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        let runs = inputs.iter().map(|parent| async move {
            if parent.children().is_empty() {
                return Ok(Vec::new());
            }
            self.chain.execute(ctx, parent.children().to_vec()).await
        });
        let outputs = try_join_all(runs).await?;
        Ok(outputs.into_iter().flatten().collect())
    }
}
