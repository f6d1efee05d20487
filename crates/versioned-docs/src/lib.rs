//! Versioned API documentation pipeline.
//!
//! Checks out every configured version of a repository into its own
//! temporary directory, runs a revision-unaware analyzer once per revision
//! (cached by content), restores the revision metadata the analyzer drops,
//! and links the resulting symbol documents with revision-qualified
//! cross-reference ids.
//!
//! The entry point is [`VersionedApi`]; the individual stages are public so
//! they can be composed differently.

pub mod analyze;
pub mod cache;
pub mod checkout;
pub mod child_scope;
pub mod config;
pub mod document;
pub mod error;
pub mod group;
pub mod keys;
pub mod pipeline;
pub mod reader;
pub mod restore;
pub mod stage;
pub mod vcs;
pub mod xref;

pub use analyze::{AnalysisRequest, AnalyzeStage, Analyzer};
pub use cache::{CacheKey, CacheStore, GroupCache};
pub use checkout::{CheckoutGuard, CheckoutOrchestrator, Checkouts, RevisionJob};
pub use child_scope::ExecuteOverChildren;
pub use config::Settings;
pub use document::{Content, Document, Metadata, Value};
pub use error::{Error, Result, VcsError};
pub use group::{group_by, GroupDocuments};
pub use pipeline::{ApiOutput, VersionedApi};
pub use reader::ReadSourceFiles;
pub use restore::RestoreMetadata;
pub use stage::{site_link, Chain, Context, FnStage, Stage};
pub use vcs::{RepositoryType, RevisionMetadata, VcsClient};
pub use xref::{LinkRegistry, XrefLinker};
