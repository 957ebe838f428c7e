//! Resolved backup configuration.
//!
//! The configuration is read once from a TOML file and then handed to every
//! component as an explicit value. Nothing reads it from global state.

use crate::core::compress::CompressionKind;
use crate::core::error::RepokeepError;
use crate::core::repository::SourceKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/repokeep.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Host the repositories live on. `localhost` runs commands without ssh.
    pub remote_host: String,
    /// Absolute root of the local storage tree.
    pub storage_root: PathBuf,
    #[serde(default)]
    pub compression: CompressionKind,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub verbose: bool,
    /// Report byte counts while streaming dumps and archives.
    #[serde(default)]
    pub progress: bool,
    /// Run source kinds concurrently. Repositories of one kind stay sequential.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_server_alive")]
    pub server_alive_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
            server_alive_secs: default_server_alive(),
        }
    }
}

/// Per-kind gate, remote root and group ownership.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub root: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub group: Option<String>,
    /// Remote files and directories archived into `files.tar<ext>`.
    #[serde(default)]
    pub files: Vec<String>,
    /// Remote command whose stdout is stored as `database.sql<ext>`.
    #[serde(default)]
    pub database_command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    #[serde(default = "enabled_application")]
    pub application: ApplicationConfig,
    #[serde(default = "enabled_source")]
    pub git: SourceConfig,
    #[serde(default = "enabled_source")]
    pub mercurial: SourceConfig,
    #[serde(default = "enabled_source")]
    pub bazaar: SourceConfig,
    #[serde(default = "enabled_source")]
    pub subversion: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            application: enabled_application(),
            git: enabled_source(),
            mercurial: enabled_source(),
            bazaar: enabled_source(),
            subversion: enabled_source(),
        }
    }
}

/// The gate and group settings the orchestrator applies to one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSettings {
    pub enabled: bool,
    pub group: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_server_alive() -> u64 {
    60
}

fn enabled_source() -> SourceConfig {
    SourceConfig {
        enabled: true,
        ..SourceConfig::default()
    }
}

fn enabled_application() -> ApplicationConfig {
    ApplicationConfig {
        enabled: true,
        ..ApplicationConfig::default()
    }
}

impl BackupConfig {
    pub fn load(path: &Path) -> Result<Self, RepokeepError> {
        let content = fs::read_to_string(path).map_err(|e| {
            RepokeepError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RepokeepError> {
        let cfg: BackupConfig =
            toml::from_str(content).map_err(|e| RepokeepError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), RepokeepError> {
        if self.remote_host.trim().is_empty() {
            return Err(RepokeepError::Config(
                "remote_host must be set and non-empty".to_string(),
            ));
        }
        if !self.storage_root.is_absolute() {
            return Err(RepokeepError::Config(format!(
                "storage_root must be an absolute path, got `{}`",
                self.storage_root.display()
            )));
        }
        if self.quiet && self.verbose {
            return Err(RepokeepError::Config(
                "quiet and verbose are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn kind_settings(&self, kind: SourceKind) -> KindSettings {
        match self.source(kind) {
            Some(source) => KindSettings {
                enabled: source.enabled,
                group: source.group.clone(),
            },
            None => KindSettings {
                enabled: self.sources.application.enabled,
                group: self.sources.application.group.clone(),
            },
        }
    }

    /// Remote root a repository kind is enumerated under.
    pub fn remote_root(&self, kind: SourceKind) -> String {
        self.source(kind)
            .and_then(|source| source.root.clone())
            .unwrap_or_else(|| kind.default_remote_root().to_string())
    }

    /// Settings of a repository kind; `None` for the application kind,
    /// which is configured by [`ApplicationConfig`].
    fn source(&self, kind: SourceKind) -> Option<&SourceConfig> {
        match kind {
            SourceKind::Application => None,
            SourceKind::Git => Some(&self.sources.git),
            SourceKind::Mercurial => Some(&self.sources.mercurial),
            SourceKind::Bazaar => Some(&self.sources.bazaar),
            SourceKind::Subversion => Some(&self.sources.subversion),
        }
    }

    /// Disables every kind except `only`.
    pub fn restrict_to(&mut self, only: SourceKind) {
        for kind in SourceKind::ALL {
            if kind == only {
                continue;
            }
            match kind {
                SourceKind::Application => self.sources.application.enabled = false,
                SourceKind::Git => self.sources.git.enabled = false,
                SourceKind::Mercurial => self.sources.mercurial.enabled = false,
                SourceKind::Bazaar => self.sources.bazaar.enabled = false,
                SourceKind::Subversion => self.sources.subversion.enabled = false,
            }
        }
    }
}
