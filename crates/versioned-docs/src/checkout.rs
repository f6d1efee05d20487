//! Revision checkout orchestrator.
//!
//! Turns the version map into one marker document per version. Each version
//! gets its own temporary directory, populated by the VCS client and then
//! queried for commit id and date. Jobs run concurrently up to the
//! configured limit.
//!
//! Directories are owned by a [`CheckoutGuard`] for the rest of the run and
//! removed when it drops. A failed, aborted or timed-out job removes its own
//! directory and kills its client process.

use crate::config::Settings;
use crate::document::{Content, Document};
use crate::error::{Error, Result};
use crate::keys;
use crate::vcs::{RevisionMetadata, VcsClient};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One version to check out. Lives only until its marker is emitted.
#[derive(Debug, Clone)]
pub struct RevisionJob {
    pub version: String,
    pub selector: String,
    pub work_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl RevisionJob {
    /// Build the structural document describing this revision.
    pub fn into_marker(self, revision: RevisionMetadata, api_path: &Path, index_file_name: &str) -> Document {
        let destination = api_path.join(&self.version).join(index_file_name);
        Document::new()
            .with_source(&self.work_dir)
            .with_destination(destination)
            .with_meta(keys::TITLE, self.version.clone())
            .with_meta(keys::REVISION_NAME, self.version.clone())
            .with_meta(keys::REVISION_SELECTOR, self.selector)
            .with_meta(keys::REPOSITORY_ROOT, self.work_dir)
            .with_meta(keys::KIND, keys::KIND_REVISION)
            .with_meta(keys::SPECIFIC_KIND, keys::KIND_REVISION)
            .with_meta(keys::DISPLAY_NAME, self.version)
            .with_meta(keys::REVISION_ID, revision.id)
            .with_meta(keys::REVISION_TIMESTAMP, revision.timestamp)
            .with_content(Content::Empty)
    }
}

/// Owns every checkout directory of a run. Dropping it deletes them.
#[derive(Debug, Default)]
pub struct CheckoutGuard {
    dirs: Vec<TempDir>,
}

impl CheckoutGuard {
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// Marker documents plus the guard keeping their directories alive.
#[derive(Debug, Default)]
pub struct Checkouts {
    pub markers: Vec<Document>,
    pub guard: CheckoutGuard,
}

#[derive(Debug, Clone)]
pub struct CheckoutOrchestrator {
    client: Arc<VcsClient>,
    concurrency: usize,
    deadline: Option<Duration>,
    checkout_root: Option<PathBuf>,
    api_path: PathBuf,
    index_file_name: String,
}

impl CheckoutOrchestrator {
    pub fn new(client: VcsClient, settings: &Settings) -> Self {
        Self {
            client: Arc::new(client),
            concurrency: settings.checkout_concurrency.max(1),
            deadline: settings.deadline(),
            checkout_root: settings.checkout_root.clone(),
            api_path: settings.api_path.clone(),
            index_file_name: settings.index_file_name.clone(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let client = VcsClient::new(
            settings.repository_type,
            settings.executable(),
            settings.repository_path.clone().unwrap_or_default(),
        );
        Self::new(client, settings)
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Check out every version. An empty map yields no markers. Any failing
    /// job fails the run, after the remaining jobs have settled.
    pub async fn run<'a, I>(&self, versions: I) -> Result<Checkouts>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let versions: Vec<(String, String)> = versions
            .into_iter()
            .map(|(name, selector)| (name.clone(), selector.clone()))
            .collect();
        if versions.is_empty() {
            warn!("checkout: no versions defined, skipping");
            return Ok(Checkouts::default());
        }
        debug!(count = versions.len(), "checkout: versions found");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut jobs = JoinSet::new();
        for (index, (version, selector)) in versions.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let this = self.clone();
            jobs.spawn(async move {
                let checked_out = match permits.acquire_owned().await {
                    Ok(_permit) => this.checkout_one(&version, &selector).await,
                    Err(closed) => Err(Error::Io(std::io::Error::other(closed))),
                };
                (index, version, selector, checked_out)
            });
        }

        let settled = match self.deadline {
            Some(limit) => match tokio::time::timeout(limit, drain(&mut jobs)).await {
                Ok(settled) => settled,
                Err(_) => {
                    error!(deadline = ?limit, "checkout: deadline expired, cancelling jobs");
                    jobs.shutdown().await;
                    return Err(Error::DeadlineExceeded(limit));
                }
            },
            None => drain(&mut jobs).await,
        };

        let mut done = Vec::with_capacity(settled.len());
        let mut first_error = None;
        for result in settled {
            match result {
                Ok((index, version, selector, Ok(pair))) => {
                    debug!(version = %version, selector = %selector, "checkout: done");
                    done.push((index, pair));
                }
                Ok((_, version, selector, Err(e))) => {
                    error!(version = %version, selector = %selector, error = %e, "checkout: failed");
                    first_error.get_or_insert(e);
                }
                Err(join) => {
                    error!(error = %join, "checkout: job aborted");
                    first_error.get_or_insert(Error::Join(join));
                }
            }
        }
        if let Some(e) = first_error {
            // `done` drops here, removing the successful checkouts too.
            return Err(e);
        }

        done.sort_by_key(|(index, _)| *index);
        let mut checkouts = Checkouts::default();
        for (_, (dir, marker)) in done {
            checkouts.guard.dirs.push(dir);
            checkouts.markers.push(marker);
        }
        info!(count = checkouts.markers.len(), "checkout: all revisions ready");
        Ok(checkouts)
    }

    async fn checkout_one(&self, version: &str, selector: &str) -> Result<(TempDir, Document)> {
        let dir = self.allocate(version)?;
        let job = RevisionJob {
            version: version.to_string(),
            selector: selector.to_string(),
            work_dir: dir.path().to_path_buf(),
            created_at: Utc::now(),
        };
        let vcs_err = |source| Error::Vcs {
            version: version.to_string(),
            selector: selector.to_string(),
            source,
        };

        info!(version = %version, selector = %selector, dir = %job.work_dir.display(), "checkout: cloning");
        self.client
            .checkout(selector, &job.work_dir)
            .await
            .map_err(vcs_err)?;
        let revision = self
            .client
            .query_metadata(selector, &job.work_dir)
            .await
            .map_err(vcs_err)?;
        let elapsed = Utc::now().signed_duration_since(job.created_at);
        debug!(
            version = %version,
            id = %revision.id,
            timestamp = %revision.timestamp,
            started = %job.created_at,
            elapsed_ms = elapsed.num_milliseconds(),
            "checkout: revision resolved"
        );

        let marker = job.into_marker(revision, &self.api_path, &self.index_file_name);
        Ok((dir, marker))
    }

    /// Fresh, uniquely named directory for one version's checkout.
    fn allocate(&self, version: &str) -> Result<TempDir> {
        let prefix = format!("docs-{}-", sanitize(version));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.checkout_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

type JobOutcome = (usize, String, String, Result<(TempDir, Document)>);

async fn drain(
    jobs: &mut JoinSet<JobOutcome>,
) -> Vec<std::result::Result<JobOutcome, tokio::task::JoinError>> {
    let mut settled = Vec::new();
    while let Some(result) = jobs.join_next().await {
        settled.push(result);
    }
    settled
}

/// Keep version names usable as a directory-name component.
fn sanitize(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::VcsError;
    use crate::vcs::RepositoryType;
    use indexmap::IndexMap;
    use std::os::unix::fs::PermissionsExt;

    /// Fake `git`: `clone` creates the target dir and records the selector,
    /// `log` prints `<hash> <seconds>` derived from the selector. Selectors
    /// `broken` and `garbled` fail the clone or produce bad metadata,
    /// `slow` sleeps long enough to trip a deadline.
    ///
    /// When a `running/` directory sits next to the script, every clone
    /// registers itself there for a moment and appends the number of clones
    /// it saw running to `peaks`.
    const STUB_GIT: &str = r#"#!/bin/sh
state="$(dirname "$0")"
case "$1" in
  clone)
    sel="$5"; for last; do :; done
    [ "$sel" = "broken" ] && { echo "fatal: remote branch broken not found" >&2; exit 128; }
    [ "$sel" = "slow" ] && sleep 5
    if [ -d "$state/running" ]; then
      touch "$state/running/$$"
      ls "$state/running" | wc -l >> "$state/peaks"
      sleep 0.3
      rm -f "$state/running/$$"
    fi
    mkdir -p "$last" && echo "$sel" > "$last/SELECTOR"
    ;;
  log)
    sel="$4"
    [ "$sel" = "garbled" ] && { echo "not-a-two-token-line"; exit 0; }
    echo "hash-$sel 1700000000.5"
    ;;
  *) exit 2 ;;
esac
"#;

    fn stub_client(dir: &Path) -> VcsClient {
        let path = dir.join("git");
        std::fs::write(&path, STUB_GIT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        VcsClient::new(RepositoryType::Git, path, "/srv/repo.git")
    }

    fn orchestrator(tools: &Path, root: &Path) -> CheckoutOrchestrator {
        let settings = Settings {
            checkout_root: Some(root.to_path_buf()),
            ..Settings::default()
        };
        CheckoutOrchestrator::new(stub_client(tools), &settings)
    }

    fn versions(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(n, s)| (n.to_string(), s.to_string()))
            .collect()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn empty_map_produces_nothing() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let checkouts = orchestrator(tools.path(), root.path())
            .run(&IndexMap::<String, String>::new())
            .await
            .unwrap();
        assert!(checkouts.markers.is_empty());
        assert!(checkouts.guard.is_empty());
    }

    #[tokio::test]
    async fn markers_carry_revision_metadata() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let map = versions(&[("latest", "main"), ("v1.0", "v1.0-tag")]);
        let checkouts = orchestrator(tools.path(), root.path()).run(&map).await.unwrap();

        assert_eq!(checkouts.markers.len(), 2);
        let latest = &checkouts.markers[0];
        assert_eq!(latest.get_str(keys::REVISION_NAME), Some("latest"));
        assert_eq!(latest.get_str(keys::REVISION_SELECTOR), Some("main"));
        assert_eq!(latest.get_str(keys::REVISION_ID), Some("hash-main"));
        assert_eq!(
            latest.get_timestamp(keys::REVISION_TIMESTAMP).unwrap().timestamp_millis(),
            1_700_000_000_500
        );
        assert!(latest.is_revision_marker());
        assert!(latest.content().is_empty());
        assert_eq!(
            latest.destination(),
            Some(Path::new("api/latest/index.html"))
        );

        let v1 = &checkouts.markers[1];
        assert_eq!(v1.get_str(keys::REVISION_ID), Some("hash-v1.0-tag"));
        let v1_root = v1.get_path(keys::REPOSITORY_ROOT).unwrap();
        assert_eq!(
            std::fs::read_to_string(v1_root.join("SELECTOR")).unwrap().trim(),
            "v1.0-tag"
        );
        assert_ne!(latest.get_path(keys::REPOSITORY_ROOT), Some(v1_root));
    }

    #[tokio::test]
    async fn dropping_guard_removes_directories() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let map = versions(&[("latest", "main")]);
        let checkouts = orchestrator(tools.path(), root.path()).run(&map).await.unwrap();
        assert_eq!(entries(root.path()), 1);
        drop(checkouts);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn failing_job_fails_run_and_names_version() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let map = versions(&[("latest", "main"), ("old", "broken")]);
        let err = orchestrator(tools.path(), root.path()).run(&map).await.unwrap_err();

        match &err {
            Error::Vcs { version, selector, source } => {
                assert_eq!(version, "old");
                assert_eq!(selector, "broken");
                assert!(matches!(source, VcsError::Exit { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("old"));
        assert_eq!(entries(root.path()), 0, "no checkout directory may leak");
    }

    #[tokio::test]
    async fn unparsable_metadata_is_fatal() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let map = versions(&[("weird", "garbled")]);
        let err = orchestrator(tools.path(), root.path()).run(&map).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Vcs { source: VcsError::Metadata { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn deadline_cancels_outstanding_jobs() {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let map = versions(&[("latest", "main"), ("stuck", "slow")]);
        let err = orchestrator(tools.path(), root.path())
            .with_deadline(Some(Duration::from_millis(500)))
            .run(&map)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert_eq!(entries(root.path()), 0);
    }

    /// Run `count` checkouts at the given limit and return the highest
    /// number of clones observed running at once.
    async fn peak_overlap(concurrency: usize, count: usize) -> (usize, Checkouts) {
        let tools = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(tools.path().join("running")).unwrap();
        let settings = Settings {
            checkout_root: Some(root.path().to_path_buf()),
            checkout_concurrency: concurrency,
            ..Settings::default()
        };
        let pairs: Vec<(String, String)> = (0..count)
            .map(|i| (format!("v{}", i), format!("sel{}", i)))
            .collect();
        let map: IndexMap<String, String> = pairs.into_iter().collect();
        let checkouts = CheckoutOrchestrator::new(stub_client(tools.path()), &settings)
            .run(&map)
            .await
            .unwrap();

        let peaks = std::fs::read_to_string(tools.path().join("peaks")).unwrap();
        let samples: Vec<usize> = peaks.lines().map(|l| l.trim().parse().unwrap()).collect();
        assert_eq!(samples.len(), count, "every clone reports once");
        (samples.into_iter().max().unwrap(), checkouts)
    }

    #[tokio::test]
    async fn concurrency_limit_of_one_serializes_clones() {
        let (peak, checkouts) = peak_overlap(1, 3).await;
        assert_eq!(peak, 1);
        let names: Vec<_> = checkouts
            .markers
            .iter()
            .map(|m| m.get_str(keys::REVISION_NAME).unwrap())
            .collect();
        assert_eq!(names, ["v0", "v1", "v2"]);
    }

    #[tokio::test]
    async fn concurrency_limit_caps_running_clones() {
        let (peak, checkouts) = peak_overlap(2, 4).await;
        assert!(peak <= 2, "saw {} clones running at once", peak);
        assert_eq!(checkouts.guard.len(), 4);
    }

    #[tokio::test]
    async fn clones_overlap_without_a_tight_limit() {
        let (peak, _) = peak_overlap(4, 4).await;
        assert!(peak > 1, "clones never ran concurrently");
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize("v1.0"), "v1.0");
        assert_eq!(sanitize("feature/x y"), "feature_x_y");
    }
}
