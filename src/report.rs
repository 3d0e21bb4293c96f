use crate::core::downloaded::DownloadedOutcome;
use crate::core::engine::Pass;
use crate::core::side_index::SideIndexOutcome;
use crate::core::unrated::CleanupOutcome;
use crate::core::RunMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassError {
    pub pass: Pass,
    pub message: String,
}

/// Everything one run did (or would have done, in dry-run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrated: Option<CleanupOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<DownloadedOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_index: Option<SideIndexOutcome>,
    #[serde(default)]
    pub errors: Vec<PassError>,
}

impl RunReport {
    pub fn new(mode: RunMode, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            started_at,
            finished_at: started_at,
            unrated: None,
            downloaded: None,
            side_index: None,
            errors: Vec::new(),
        }
    }

    /// Store mutations applied, or decided in dry-run.
    pub fn mutations(&self) -> usize {
        let downloaded = self
            .downloaded
            .as_ref()
            .map_or(0, |o| o.flips() + o.images_removed);
        let side_index = self.side_index.as_ref().map_or(0, |o| o.updated);
        let unrated = self
            .unrated
            .as_ref()
            .map_or(0, |o| o.deleted + o.flags_cleared);
        downloaded + side_index + unrated
    }

    pub fn failed_statements(&self) -> usize {
        self.downloaded.as_ref().map_or(0, |o| o.failed_statements)
            + self.side_index.as_ref().map_or(0, |o| o.failed_statements)
            + self.unrated.as_ref().map_or(0, |o| o.failed_statements)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} run started {} finished {}",
            self.mode,
            self.started_at.to_rfc3339(),
            self.finished_at.to_rfc3339()
        )?;

        if let Some(o) = &self.unrated {
            writeln!(f, "[unrated-baseline] scan type: {}", o.scan_type)?;
            writeln!(f, "[unrated-baseline] candidate image records: {}", o.candidates)?;
            writeln!(f, "[unrated-baseline] healthy image records: {}", o.healthy)?;
            writeln!(
                f,
                "[unrated-baseline] number of image records deleted (with paired records): {} of {}",
                o.deleted, o.candidates
            )?;
            writeln!(f, "[unrated-baseline] files that could not be normalized: {}", o.probe_errors)?;
            writeln!(f, "[unrated-baseline] downloaded flags cleared: {}", o.flags_cleared)?;
            writeln!(f, "[unrated-baseline] failed statements: {}", o.failed_statements)?;
        }

        if let Some(o) = &self.downloaded {
            writeln!(f, "[downloaded] exams examined: {}", o.exams_examined)?;
            writeln!(f, "[downloaded] images examined: {}", o.images_examined)?;
            writeln!(f, "[downloaded] flags set to downloaded: {}", o.flipped_to_downloaded)?;
            writeln!(
                f,
                "[downloaded] flags set to not downloaded: {}",
                o.flipped_to_not_downloaded
            )?;
            writeln!(f, "[downloaded] total flag changes: {}", o.flips())?;
            writeln!(
                f,
                "[downloaded] image records marked for removal: {}",
                o.images_marked_for_removal
            )?;
            writeln!(
                f,
                "[downloaded] image records removed (with paired records): {}",
                o.images_removed
            )?;
            writeln!(f, "[downloaded] unexpected filenames: {}", o.unexpected_filenames)?;
            writeln!(f, "[downloaded] empty files deleted: {}", o.files_removed_empty)?;
            writeln!(f, "[downloaded] files decompressed: {}", o.files_decompressed)?;
            writeln!(f, "[downloaded] probe errors: {}", o.probe_errors)?;
            writeln!(f, "[downloaded] failed statements: {}", o.failed_statements)?;
        }

        if let Some(o) = &self.side_index {
            writeln!(f, "[side-index] candidate rows: {}", o.candidates)?;
            writeln!(
                f,
                "[side-index] number of exam records updated: {} of {}",
                o.updated, o.exams
            )?;
            writeln!(f, "[side-index] lookups without a value: {}", o.lookups_absent)?;
            writeln!(
                f,
                "[side-index] missing SideIndex before: {} after: {}",
                o.missing_before, o.missing_after
            )?;
            writeln!(
                f,
                "[side-index] orphaned ratings: {} of {} candidate rows",
                o.orphaned_ratings, o.candidates
            )?;
            writeln!(f, "[side-index] failed statements: {}", o.failed_statements)?;
        }

        for error in &self.errors {
            writeln!(f, "[{}] aborted: {}", error.pass, error.message)?;
        }
        Ok(())
    }
}
