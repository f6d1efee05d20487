//! Metadata key names shared between pipeline stages.
//!
//! Producers and consumers agree on these strings; renaming one is a
//! breaking change for any persisted cache entry.

// -- Revision keys (set by the checkout orchestrator) -------------------------

/// Path to the on-disk checkout of a revision.
pub const REPOSITORY_ROOT: &str = "RepositoryRoot";

/// The user-facing version name, e.g. "latest".
pub const REVISION_NAME: &str = "RevisionName";

/// The selector the revision was checked out with (branch, tag, query).
pub const REVISION_SELECTOR: &str = "RevisionSelector";

/// The commit hash.
pub const REVISION_ID: &str = "RevisionId";

/// The commit date, millisecond precision.
pub const REVISION_TIMESTAMP: &str = "RevisionTimestamp";

/// Keys carried across the analysis step by the metadata restorer.
pub const REVISION_KEYS: [&str; 3] = [REVISION_NAME, REVISION_ID, REVISION_TIMESTAMP];

// -- Symbol keys (set by the analyzer) ----------------------------------------

pub const TITLE: &str = "Title";
pub const KIND: &str = "Kind";
pub const SPECIFIC_KIND: &str = "SpecificKind";
pub const DISPLAY_NAME: &str = "DisplayName";
pub const QUALIFIED_NAME: &str = "QualifiedName";
/// Nested document of the type declaring a member.
pub const CONTAINING_TYPE: &str = "ContainingType";

// -- Output keys (set by the linker) ------------------------------------------

/// Revision-qualified cross-reference id, e.g. "api-v1.0MyLib.Foo".
pub const XREF: &str = "Xref";
pub const LAYOUT: &str = "Layout";
pub const CONTENT_TYPE: &str = "ContentType";

/// Name of the group a parent document was formed from.
pub const GROUP_KEY: &str = "GroupKey";

// -- Kind values --------------------------------------------------------------

pub const KIND_REVISION: &str = "Revision";
pub const KIND_NAMED_TYPE: &str = "NamedType";
pub const KIND_PROPERTY: &str = "Property";
pub const KIND_METHOD: &str = "Method";

/// `ContentType` value marking a document for page rendering.
pub const CONTENT_TYPE_CONTENT: &str = "Content";
