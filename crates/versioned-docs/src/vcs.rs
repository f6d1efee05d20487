//! VCS clients: populate a checkout directory and report what was checked out.
//!
//! Each repository type is a fixed set of command templates. Nothing here
//! speaks a VCS protocol; the configured executable does the work.

use crate::error::VcsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// VCS repository type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    #[default]
    Git,
    #[serde(alias = "mercurial")]
    Hg,
}

/// Commit id and date of a checked-out revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// One client invocation: program, arguments, optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            cwd: None,
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn in_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Command line for diagnostics.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }

    /// Run to completion and return stdout. The child is killed if the
    /// returned future is dropped.
    pub async fn run(&self) -> Result<String, VcsError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        debug!(command = %self.display(), "vcs: running");
        let output = cmd.output().await.map_err(|e| VcsError::Spawn {
            program: self.program.display().to_string(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(VcsError::Exit {
                command: self.display(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A configured VCS client for one repository.
#[derive(Debug, Clone)]
pub struct VcsClient {
    kind: RepositoryType,
    executable: PathBuf,
    repository: String,
}

impl VcsClient {
    pub fn new(kind: RepositoryType, executable: impl Into<PathBuf>, repository: impl Into<String>) -> Self {
        Self {
            kind,
            executable: executable.into(),
            repository: repository.into(),
        }
    }

    /// Commands that populate `dest` with the revision picked by `selector`.
    pub fn checkout_invocations(&self, selector: &str, dest: &Path) -> Vec<Invocation> {
        let exe = &self.executable;
        match self.kind {
            RepositoryType::Git => vec![Invocation::new(exe)
                .arg("clone")
                .arg("--depth")
                .arg("1")
                .arg("--branch")
                .arg(selector)
                .arg(&self.repository)
                .arg(dest)],
            RepositoryType::Hg => vec![
                Invocation::new(exe).arg("clone").arg(&self.repository).arg(dest),
                Invocation::new(exe)
                    .in_dir(dest)
                    .arg("update")
                    .arg("--rev")
                    .arg(selector),
            ],
        }
    }

    /// Command whose stdout is `<hash> <epoch-seconds>`.
    pub fn metadata_invocation(&self, selector: &str, work_dir: &Path) -> Invocation {
        let exe = &self.executable;
        match self.kind {
            RepositoryType::Git => Invocation::new(exe)
                .in_dir(work_dir)
                .arg("log")
                .arg("-1")
                .arg("--format=%H %ct")
                .arg(selector),
            RepositoryType::Hg => Invocation::new(exe)
                .in_dir(work_dir)
                .arg("id")
                .arg("--debug")
                .arg("--template")
                .arg("{node} {date}")
                .arg("--rev")
                .arg(selector),
        }
    }

    pub async fn checkout(&self, selector: &str, dest: &Path) -> Result<(), VcsError> {
        for invocation in self.checkout_invocations(selector, dest) {
            invocation.run().await?;
        }
        Ok(())
    }

    pub async fn query_metadata(&self, selector: &str, work_dir: &Path) -> Result<RevisionMetadata, VcsError> {
        let stdout = self.metadata_invocation(selector, work_dir).run().await?;
        parse_revision_metadata(self.kind, &stdout)
    }
}

/// Parse `<hash> <date>` into a revision id and timestamp.
///
/// Git prints plain epoch seconds, optionally with a fraction. Mercurial's
/// `{date}` prints `<seconds>.0<offset>`, where the offset is the timezone
/// in seconds west of UTC and carries no sign when positive; it is ignored.
/// Quote characters around the whole line are tolerated.
pub fn parse_revision_metadata(kind: RepositoryType, output: &str) -> Result<RevisionMetadata, VcsError> {
    let fail = |reason: &str| VcsError::Metadata {
        output: output.to_string(),
        reason: reason.to_string(),
    };

    let line = output.trim().trim_matches(|c: char| c == '\'' || c == '"').trim();
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [hash, date] = tokens.as_slice() else {
        return Err(fail(&format!("expected 2 tokens, found {}", tokens.len())));
    };

    let millis = match kind {
        RepositoryType::Git => git_epoch_millis(date),
        RepositoryType::Hg => hg_epoch_millis(date),
    }
    .ok_or_else(|| fail("invalid epoch seconds"))?;
    let timestamp =
        DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| fail("timestamp out of range"))?;

    Ok(RevisionMetadata {
        id: hash.to_string(),
        timestamp,
    })
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

// "1700000000", "1700000000.25"
fn git_epoch_millis(token: &str) -> Option<i64> {
    let valid = match token.split_once('.') {
        Some((whole, fraction)) => all_digits(whole) && (fraction.is_empty() || all_digits(fraction)),
        None => all_digits(token),
    };
    if !valid {
        return None;
    }
    let seconds: f64 = token.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    Some((seconds * 1000.0).round() as i64)
}

// "1700000000.00", "1700000000.0-3600", "1700000000.018000"
fn hg_epoch_millis(token: &str) -> Option<i64> {
    let whole = match token.split_once('.') {
        Some((whole, rest)) => {
            let offset = rest.strip_prefix('0')?;
            let valid = match offset.strip_prefix(|c: char| c == '-' || c == '+') {
                Some(signed) => all_digits(signed),
                None => offset.is_empty() || all_digits(offset),
            };
            if !valid {
                return None;
            }
            whole
        }
        None => token,
    };
    if !all_digits(whole) {
        return None;
    }
    whole.parse::<i64>().ok()?.checked_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(output: &str) -> Result<RevisionMetadata, VcsError> {
        parse_revision_metadata(RepositoryType::Git, output)
    }

    fn hg(output: &str) -> Result<RevisionMetadata, VcsError> {
        parse_revision_metadata(RepositoryType::Hg, output)
    }

    #[test]
    fn parses_git_output() {
        let meta = git("0123abcd 1700000000\n").unwrap();
        assert_eq!(meta.id, "0123abcd");
        assert_eq!(meta.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parses_quoted_output() {
        let meta = git("'0123abcd 1700000000'\n").unwrap();
        assert_eq!(meta.id, "0123abcd");
        assert_eq!(hg("\"ff00 1700000000.00\"").unwrap().id, "ff00");
    }

    #[test]
    fn keeps_millisecond_precision() {
        let meta = git("abc 1700000000.25").unwrap();
        assert_eq!(meta.timestamp.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn mercurial_date_ignores_timezone_offset() {
        for date in [
            "1700000000.00",
            "1700000000.0-3600",
            "1700000000.018000",
            "1700000000.0+7200",
            "1700000000",
        ] {
            let meta = hg(&format!("ff00 {}", date)).unwrap();
            assert_eq!(meta.id, "ff00");
            assert_eq!(meta.timestamp.timestamp_millis(), 1_700_000_000_000, "{}", date);
        }
    }

    #[test]
    fn mercurial_date_needs_the_zero_separator() {
        assert!(hg("ff00 1700000000.5").is_err());
        assert!(hg("ff00 1700000000.0-").is_err());
        assert!(hg("ff00 1700000000.0x").is_err());
        assert!(hg("ff00 .0").is_err());
    }

    #[test]
    fn git_date_rejects_offsets() {
        assert!(git("abc 1700000000.0-3600").is_err());
        assert!(git("abc 1700000000+7200").is_err());
    }

    #[test]
    fn rejects_wrong_token_count() {
        assert!(matches!(git("abc"), Err(VcsError::Metadata { .. })));
        assert!(matches!(git("abc 1 2"), Err(VcsError::Metadata { .. })));
        assert!(git("").is_err());
        assert!(hg("ff00 1700000000.00 extra").is_err());
    }

    #[test]
    fn rejects_non_numeric_seconds() {
        assert!(git("abc yesterday").is_err());
        assert!(git("abc 12x4").is_err());
        assert!(git("abc 1.2.3").is_err());
        assert!(hg("abc yesterday").is_err());
    }

    #[test]
    fn git_templates() {
        let client = VcsClient::new(RepositoryType::Git, "git", "https://example.com/r.git");
        let dest = Path::new("/tmp/docs-latest");
        let checkout = client.checkout_invocations("main", dest);
        assert_eq!(checkout.len(), 1);
        assert_eq!(
            checkout[0].display(),
            "git clone --depth 1 --branch main https://example.com/r.git /tmp/docs-latest"
        );
        let meta = client.metadata_invocation("main", dest);
        assert_eq!(meta.cwd.as_deref(), Some(dest));
        assert_eq!(meta.display(), "git log -1 --format=%H %ct main");
    }

    #[test]
    fn mercurial_templates() {
        let client = VcsClient::new(RepositoryType::Hg, "/usr/bin/hg", "/srv/repo");
        let dest = Path::new("/tmp/docs-v1");
        let checkout = client.checkout_invocations("tag(v1)", dest);
        assert_eq!(checkout.len(), 2);
        assert_eq!(checkout[0].display(), "/usr/bin/hg clone /srv/repo /tmp/docs-v1");
        assert_eq!(checkout[0].cwd, None);
        assert_eq!(checkout[1].display(), "/usr/bin/hg update --rev tag(v1)");
        assert_eq!(checkout[1].cwd.as_deref(), Some(dest));
        assert_eq!(
            client.metadata_invocation("tag(v1)", dest).display(),
            "/usr/bin/hg id --debug --template {node} {date} --rev tag(v1)"
        );
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let client = VcsClient::new(RepositoryType::Git, "/nonexistent/vcs-client", "/repo");
        let dir = tempfile::tempdir().unwrap();
        let err = client.query_metadata("main", dir.path()).await.unwrap_err();
        assert!(matches!(err, VcsError::Spawn { .. }));
    }
}
