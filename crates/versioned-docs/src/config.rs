//! Settings for a versioned documentation run, read from TOML.
//!
//! ```toml
//! repository_path = "https://example.com/mylib.git"
//! source_files = ["src/**/*.rs"]
//!
//! [versions]
//! latest = "main"
//! "v1.0" = "v1.0-tag"
//! ```

use crate::error::{Error, Result};
use crate::vcs::RepositoryType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Version name → revision selector. Order is kept for output.
    pub versions: IndexMap<String, String>,
    pub repository_type: RepositoryType,
    /// Anything the selected VCS's clone command accepts.
    pub repository_path: Option<String>,
    pub git_executable: PathBuf,
    pub hg_executable: PathBuf,
    /// Destination prefix for all generated API documents.
    pub api_path: PathBuf,
    /// Globs relative to each checkout root.
    pub source_files: Vec<String>,
    pub assembly_files: Vec<String>,
    pub project_files: Vec<String>,
    pub solution_files: Vec<String>,
    pub include_global_namespace: bool,
    pub implicit_inherit_doc: bool,
    pub api_layout: Option<PathBuf>,
    pub output_api_documents: bool,
    /// Maximum number of VCS jobs running at once.
    pub checkout_concurrency: usize,
    pub deadline_secs: Option<u64>,
    /// Directory for the cross-run group cache. Disabled when unset.
    pub cache_dir: Option<PathBuf>,
    /// Parent directory for checkouts; the system temp dir when unset.
    pub checkout_root: Option<PathBuf>,
    pub index_file_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            versions: IndexMap::new(),
            repository_type: RepositoryType::Git,
            repository_path: None,
            git_executable: PathBuf::from("git"),
            hg_executable: PathBuf::from("hg"),
            api_path: PathBuf::from("api"),
            source_files: vec!["src/**/*.rs".to_string()],
            assembly_files: Vec::new(),
            project_files: Vec::new(),
            solution_files: Vec::new(),
            include_global_namespace: true,
            implicit_inherit_doc: false,
            api_layout: None,
            output_api_documents: false,
            checkout_concurrency: 4,
            deadline_secs: None,
            cache_dir: None,
            checkout_root: None,
            index_file_name: "index.html".to_string(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Executable for the configured repository type.
    pub fn executable(&self) -> &Path {
        match self.repository_type {
            RepositoryType::Git => &self.git_executable,
            RepositoryType::Hg => &self.hg_executable,
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Check the settings. Non-fatal problems come back as warnings; the
    /// affected stage then produces no output.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        if self.versions.is_empty() {
            warnings.push("no versions defined".to_string());
            return Ok(warnings);
        }
        if self.executable().as_os_str().is_empty() {
            warnings.push(format!(
                "no executable configured for {:?} repositories",
                self.repository_type
            ));
        }
        match self.repository_path.as_deref() {
            Some(p) if !p.trim().is_empty() => {}
            _ => {
                return Err(Error::Config(
                    "repository_path is required when versions are defined".to_string(),
                ))
            }
        }
        for (name, selector) in &self.versions {
            if name.is_empty() || selector.is_empty() {
                return Err(Error::Config(format!(
                    "version `{}` needs a non-empty name and selector",
                    name
                )));
            }
        }
        Ok(warnings)
    }
}
