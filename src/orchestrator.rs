//! Backup orchestrator.
//!
//! Drives every source kind in the fixed order, applies the per-kind gate,
//! replicates each enumerated repository plus the kind's single targets,
//! applies the group policy once per kind, and aggregates one outcome per
//! kind. A failure never crosses kind boundaries.

use crate::core::command::CommandRunner;
use crate::core::error::{RepokeepError, Stage};
use crate::core::layout::StorageLayout;
use crate::core::repository::SourceKind;
use crate::core::time;
use crate::strategies::{RepoStatus, SourceEntry};
use colored::Colorize;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Disabled,
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Disabled => "disabled",
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        }
    }
}

/// A failure attributed to a repository (or the kind itself) and a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Repository or single-target name; `None` for kind-level failures.
    pub target: Option<String>,
    pub stage: Stage,
    pub message: String,
    pub needs_operator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub name: String,
    #[serde(flatten)]
    pub status: RepoStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindReport {
    pub kind: SourceKind,
    pub outcome: Outcome,
    pub targets: Vec<TargetReport>,
    pub failures: Vec<Failure>,
}

impl KindReport {
    fn disabled(kind: SourceKind) -> Self {
        Self {
            kind,
            outcome: Outcome::Disabled,
            targets: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn started(kind: SourceKind) -> Self {
        Self {
            outcome: Outcome::Success,
            ..Self::disabled(kind)
        }
    }

    fn record(&mut self, name: &str, result: Result<RepoStatus, RepokeepError>) {
        match result {
            Ok(status) => self.targets.push(TargetReport {
                name: name.to_string(),
                status,
            }),
            Err(e) => self.fail(Some(name), e.stage(), &e),
        }
    }

    fn fail(&mut self, target: Option<&str>, stage: Stage, err: &RepokeepError) {
        error!(
            kind = %self.kind,
            repo = target.unwrap_or("-"),
            stage = %stage,
            error = %err,
            "backup step failed"
        );
        self.failures.push(Failure {
            target: target.map(str::to_string),
            stage,
            message: err.to_string(),
            needs_operator: err.needs_operator(),
        });
    }

    fn finish(mut self) -> Self {
        if !self.failures.is_empty() {
            self.outcome = Outcome::Failed;
        }
        self
    }
}

/// Result of one orchestrator pass. Built completely before it is returned.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started: String,
    pub kinds: Vec<KindReport>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.kinds.iter().all(|k| k.outcome != Outcome::Failed)
    }

    pub fn outcome(&self, kind: SourceKind) -> Option<Outcome> {
        self.kinds.iter().find(|k| k.kind == kind).map(|k| k.outcome)
    }

    /// One line per kind, then one line per attributed failure.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for report in &self.kinds {
            let outcome = match report.outcome {
                Outcome::Disabled => report.outcome.as_str().dimmed(),
                Outcome::Success => report.outcome.as_str().green(),
                Outcome::Failed => report.outcome.as_str().red().bold(),
            };
            let _ = writeln!(out, "{}: {}", report.kind, outcome);
        }
        for report in &self.kinds {
            for failure in &report.failures {
                let subject = match &failure.target {
                    Some(name) => format!("{}/{}", report.kind, name),
                    None => report.kind.to_string(),
                };
                let _ = writeln!(
                    out,
                    "{} [{}]: {}",
                    subject,
                    failure.stage,
                    failure.message
                );
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let status = if self.success() { "ok" } else { "failed" };
        time::command_envelope(
            "run",
            status,
            serde_json::json!({
                "run_id": self.run_id,
                "started": self.started,
                "kinds": self.kinds,
            }),
        )
    }
}

pub struct Orchestrator {
    entries: Vec<SourceEntry>,
    layout: StorageLayout,
    runner: Arc<dyn CommandRunner>,
    parallel: bool,
}

impl Orchestrator {
    pub fn new(
        entries: Vec<SourceEntry>,
        layout: StorageLayout,
        runner: Arc<dyn CommandRunner>,
        parallel: bool,
    ) -> Self {
        Self {
            entries,
            layout,
            runner,
            parallel,
        }
    }

    pub fn run(&self) -> RunReport {
        let run_id = time::new_run_id();
        let started = time::now_epoch_z();
        info!(
            run_id = %run_id,
            storage_root = %self.layout.root().display(),
            parallel = self.parallel,
            "backup run started"
        );

        // Kinds never share repositories, so running them side by side keeps
        // every per-repository invariant. Report order stays fixed either way.
        let kinds: Vec<KindReport> = if self.parallel {
            self.entries.par_iter().map(|e| self.run_kind(e)).collect()
        } else {
            self.entries.iter().map(|e| self.run_kind(e)).collect()
        };

        let report = RunReport {
            run_id,
            started,
            kinds,
        };
        info!(run_id = %report.run_id, success = report.success(), "backup run finished");
        report
    }

    fn run_kind(&self, entry: &SourceEntry) -> KindReport {
        let kind = entry.kind();
        if !entry.settings.enabled {
            info!(kind = %kind, "source kind disabled");
            return KindReport::disabled(kind);
        }
        let _span = tracing::info_span!("kind", kind = %kind).entered();
        let mut report = KindReport::started(kind);

        let kind_dir = self.layout.kind_dir(kind);
        if let Err(e) = self.layout.ensure(&kind_dir) {
            report.fail(None, Stage::Layout, &e);
            return report.finish();
        }

        let names = match entry.strategy.enumerate() {
            Ok(names) => names,
            Err(e) => {
                report.fail(None, Stage::Enumerate, &e);
                return report.finish();
            }
        };
        info!(kind = %kind, repositories = names.len(), "enumerated");
        for name in &names {
            report.record(name, entry.strategy.replicate(name));
        }
        for (name, result) in entry.strategy.single_targets() {
            report.record(&name, result);
        }

        if let Err(e) =
            self.layout
                .apply_group_policy(self.runner.as_ref(), &kind_dir, entry.settings.group.as_deref())
        {
            report.fail(None, Stage::GroupPolicy, &e);
        }

        let report = report.finish();
        info!(kind = %kind, outcome = report.outcome.as_str(), "source kind finished");
        report
    }
}
