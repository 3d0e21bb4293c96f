pub mod downloaded;
pub mod engine;
pub mod probe;
pub mod pruner;
pub mod side_index;
pub mod unrated;

use crate::database::models::ImageLink;
use crate::database::DatabaseError;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Live,
}

impl RunMode {
    /// `debug == 0` is a live run, anything else only simulates.
    pub fn from_debug(debug: i64) -> Self {
        if debug == 0 {
            RunMode::Live
        } else {
            RunMode::DryRun
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, RunMode::Live)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::DryRun => write!(f, "dry-run"),
            RunMode::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(usize),
    Simulated,
    Failed,
}

impl WriteOutcome {
    pub fn succeeded(self) -> bool {
        !matches!(self, WriteOutcome::Failed)
    }
}

/// Run one repair statement, or only log it in dry-run. A failure is logged
/// with the statement and store error and never propagates: the caller
/// skips that record and moves on.
pub(crate) fn gated_write<F>(mode: RunMode, action: &str, write: F) -> WriteOutcome
where
    F: FnOnce() -> Result<usize, DatabaseError>,
{
    if !mode.is_live() {
        log::debug!("[dry-run] {}", action);
        return WriteOutcome::Simulated;
    }

    match write() {
        Ok(affected) => {
            log::debug!("{} ({} row(s))", action, affected);
            WriteOutcome::Applied(affected)
        }
        Err(e) => {
            log::warn!("Failed to {}: {}", action, e);
            WriteOutcome::Failed
        }
    }
}

/// Repairs that earlier passes of a dry run decided but never wrote. Later
/// passes consult it so their counts match what a live run would do.
#[derive(Debug, Clone, Default)]
pub struct PendingChanges {
    /// Image id to the exam it belonged to.
    removed: HashMap<i64, i64>,
    flags: HashMap<i64, bool>,
}

impl PendingChanges {
    pub fn record(&mut self, removed: &[ImageLink], flags: &BTreeMap<i64, bool>) {
        for link in removed {
            self.removed.insert(link.image_id, link.exam_id);
        }
        self.flags.extend(flags.iter().map(|(&exam_id, &flag)| (exam_id, flag)));
    }

    pub fn is_removed(&self, image_id: i64) -> bool {
        self.removed.contains_key(&image_id)
    }

    pub fn removed_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.removed.keys().copied()
    }

    pub fn removed_from_exam(&self, exam_id: i64) -> i64 {
        self.removed.values().filter(|&&id| id == exam_id).count() as i64
    }

    /// Downloaded flag an earlier pass would have written for `exam_id`.
    pub fn flag(&self, exam_id: i64) -> Option<bool> {
        self.flags.get(&exam_id).copied()
    }
}

pub(crate) fn progress_bar(show: bool, len: usize, label: &str) -> ProgressBar {
    if !show || len == 0 {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len as u64);
    match ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}") {
        Ok(style) => bar.set_style(style.progress_chars("=> ")),
        Err(e) => log::debug!("Falling back to default progress style: {}", e),
    }
    bar.set_message(label.to_string());
    bar
}
