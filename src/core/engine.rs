use crate::config::CleanupConfig;
use crate::core::downloaded::DownloadedReconciler;
use crate::core::probe::FilesystemProbe;
use crate::core::side_index::SideIndexBackfill;
use crate::core::unrated::UnratedCleanup;
use crate::core::{PendingChanges, RunMode};
use crate::database::Gateway;
use crate::report::{PassError, RunReport};
use crate::services::MetadataSource;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pass {
    UnratedBaseline,
    Downloaded,
    SideIndex,
}

impl Pass {
    /// Every pass, in the order `all` runs them. The flag pass normalizes
    /// compressed artifacts before the cleanup looks for plain files.
    pub const ALL: [Pass; 3] = [Pass::Downloaded, Pass::UnratedBaseline, Pass::SideIndex];

    pub fn needs_metadata(self) -> bool {
        matches!(self, Pass::SideIndex)
    }

    pub fn name(self) -> &'static str {
        match self {
            Pass::UnratedBaseline => "unrated-baseline",
            Pass::Downloaded => "downloaded",
            Pass::SideIndex => "side-index",
        }
    }
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub mode: RunMode,
    pub show_progress: bool,
    pub cleanup: CleanupConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::DryRun,
            show_progress: false,
            cleanup: CleanupConfig::default(),
        }
    }
}

/// Runs the selected repair passes against one store and one artifact root.
pub struct Reconciler<'a> {
    gateway: &'a Gateway,
    probe: FilesystemProbe,
    metadata: Option<&'a dyn MetadataSource>,
    options: EngineOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(gateway: &'a Gateway, image_root: impl Into<PathBuf>, options: EngineOptions) -> Self {
        Self {
            gateway,
            probe: FilesystemProbe::new(image_root, options.mode),
            metadata: None,
            options,
        }
    }

    pub fn with_metadata(mut self, source: &'a dyn MetadataSource) -> Self {
        self.metadata = Some(source);
        self
    }

    pub fn probe(&self) -> &FilesystemProbe {
        &self.probe
    }

    /// Run `passes` in the given order. A pass that cannot start or whose
    /// candidate query fails is recorded in the report; the rest still run.
    /// In dry-run, later passes see the removals and flag writes that earlier
    /// passes only simulated.
    pub fn run(&self, passes: &[Pass]) -> RunReport {
        let mode = self.options.mode;
        let mut report = RunReport::new(mode, Utc::now());
        log::info!(
            "Starting {} run of {} against {}",
            mode,
            passes
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(", "),
            self.probe.root().display()
        );

        let mut pending = PendingChanges::default();
        for &pass in passes {
            if let Err(message) = self.run_pass(pass, &mut pending, &mut report) {
                log::error!("{} pass aborted: {}", pass, message);
                report.errors.push(PassError { pass, message });
            }
        }

        report.finished_at = Utc::now();
        log::info!(
            "Finished {} run with {} change(s) and {} failed pass(es)",
            mode,
            report.mutations(),
            report.errors.len()
        );
        report
    }

    fn run_pass(
        &self,
        pass: Pass,
        pending: &mut PendingChanges,
        report: &mut RunReport,
    ) -> Result<(), String> {
        let mode = self.options.mode;
        let show = self.options.show_progress;

        match pass {
            Pass::UnratedBaseline => {
                let outcome =
                    UnratedCleanup::new(self.gateway, &self.probe, mode, self.options.cleanup.clone())
                        .with_progress(show)
                        .with_pending(pending)
                        .run()
                        .map_err(|e| e.to_string())?;
                if !mode.is_live() {
                    pending.record(&outcome.removed, &outcome.flag_changes);
                }
                report.unrated = Some(outcome);
            }
            Pass::Downloaded => {
                let outcome = DownloadedReconciler::new(self.gateway, &self.probe, mode)
                    .with_progress(show)
                    .run()
                    .map_err(|e| e.to_string())?;
                if !mode.is_live() {
                    pending.record(&outcome.removed, &outcome.flag_changes);
                }
                report.downloaded = Some(outcome);
            }
            Pass::SideIndex => {
                let source = self
                    .metadata
                    .ok_or_else(|| "no metadata source configured".to_string())?;
                let outcome = SideIndexBackfill::new(self.gateway, source, mode)
                    .with_progress(show)
                    .with_pending(pending)
                    .run()
                    .map_err(|e| e.to_string())?;
                report.side_index = Some(outcome);
            }
        }
        Ok(())
    }
}
