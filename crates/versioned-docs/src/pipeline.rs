//! The versioned API pipeline.
//!
//! ```text
//! checkout ─► read sources ─► group by revision ─► cache ─► per group:
//!                                                   restore(analyze)
//!                                          ─► link
//! ```
//!
//! The linker runs after the cache so the link registry is filled on cache
//! hits as well.

use crate::analyze::{AnalyzeStage, Analyzer};
use crate::cache::{CacheStore, GroupCache};
use crate::checkout::{CheckoutGuard, CheckoutOrchestrator};
use crate::child_scope::ExecuteOverChildren;
use crate::config::Settings;
use crate::document::Document;
use crate::error::Result;
use crate::group::GroupDocuments;
use crate::reader::ReadSourceFiles;
use crate::restore::RestoreMetadata;
use crate::stage::{Chain, Context, Stage};
use crate::vcs::VcsClient;
use crate::xref::{LinkRegistry, XrefLinker};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one run.
#[derive(Debug)]
pub struct ApiOutput {
    /// Revision markers and symbol documents, ready for rendering.
    pub documents: Vec<Document>,
    pub links: Arc<LinkRegistry>,
    /// Keeps the checkout directories alive until dropped.
    pub checkouts: CheckoutGuard,
}

pub struct VersionedApi {
    settings: Arc<Settings>,
    client: VcsClient,
    cache: Arc<GroupCache>,
}

impl VersionedApi {
    pub fn new(settings: Settings, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        let client = VcsClient::new(
            settings.repository_type,
            settings.executable(),
            settings.repository_path.clone().unwrap_or_default(),
        );
        Self::with_client(settings, client, analyzer)
    }

    /// Like [`VersionedApi::new`] with an explicit VCS client.
    pub fn with_client(settings: Settings, client: VcsClient, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        let per_revision = Chain::new().then(RestoreMetadata::revision(
            Chain::new().then(AnalyzeStage::new(analyzer)),
        ));
        let mut cache = GroupCache::new(Chain::new().then(ExecuteOverChildren::new(per_revision)));
        if let Some(dir) = &settings.cache_dir {
            cache = cache.with_store(CacheStore::open(dir)?);
        }
        Ok(Self {
            settings: Arc::new(settings),
            client,
            cache: Arc::new(cache),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of analyzer group executions so far, across runs of this value.
    pub fn executions(&self) -> usize {
        self.cache.executions()
    }

    pub async fn run(&self) -> Result<ApiOutput> {
        let links = Arc::new(LinkRegistry::new());
        let ctx = Context::new(Arc::clone(&self.settings), Arc::clone(&links));

        let mut skip_checkout = false;
        for warning in self.settings.validate()? {
            warn!("settings: {}", warning);
            skip_checkout = true;
        }
        if skip_checkout {
            return Ok(ApiOutput {
                documents: Vec::new(),
                links,
                checkouts: CheckoutGuard::default(),
            });
        }

        let checkouts = CheckoutOrchestrator::new(self.client.clone(), &self.settings)
            .run(&self.settings.versions)
            .await?;
        let markers = checkouts.markers;

        let sources = ReadSourceFiles::new(self.settings.source_files.clone())
            .execute(&ctx, markers.clone())
            .await?;
        info!(revisions = markers.len(), sources = sources.len(), "pipeline: analyzing");

        let mut inputs = markers;
        inputs.extend(sources);
        let documents = Chain::new()
            .then(GroupDocuments::by_revision())
            .then_shared(Arc::clone(&self.cache) as Arc<dyn Stage>)
            .then(XrefLinker)
            .execute(&ctx, inputs)
            .await?;

        info!(documents = documents.len(), links = links.len(), "pipeline: done");
        Ok(ApiOutput {
            documents,
            links,
            checkouts: checkouts.guard,
        })
    }
}
