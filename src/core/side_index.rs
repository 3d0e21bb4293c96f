use crate::core::{gated_write, progress_bar, PendingChanges, RunMode};
use crate::database::models::SideIndexCandidate;
use crate::database::repositories::{ExamRepository, RatingRepository};
use crate::database::{DatabaseError, Gateway};
use crate::services::metadata::{as_integer, MetadataSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideIndexOutcome {
    /// Rows returned by the candidate query (one per joined image/rating).
    pub candidates: usize,
    pub exams: usize,
    pub updated: usize,
    pub lookups_absent: usize,
    pub orphaned_ratings: usize,
    pub failed_statements: usize,
    pub missing_before: i64,
    pub missing_after: i64,
}

/// Fills `Exam.SideIndex` for side-dependent scan types from the external
/// metadata source, and reports ratings left behind by deleted images.
pub struct SideIndexBackfill<'a> {
    gateway: &'a Gateway,
    source: &'a dyn MetadataSource,
    mode: RunMode,
    pending: Option<&'a PendingChanges>,
    show_progress: bool,
}

impl<'a> SideIndexBackfill<'a> {
    pub fn new(gateway: &'a Gateway, source: &'a dyn MetadataSource, mode: RunMode) -> Self {
        Self {
            gateway,
            source,
            mode,
            pending: None,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Treat the image removals of earlier dry-run passes as done.
    pub fn with_pending(mut self, pending: &'a PendingChanges) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn run(&self) -> Result<SideIndexOutcome, DatabaseError> {
        let exams = ExamRepository::new(self.gateway);
        let mut outcome = SideIndexOutcome {
            missing_before: exams.count_missing_side_index()?,
            ..Default::default()
        };

        let candidates = self.without_pending(exams.find_missing_side_index()?);
        outcome.candidates = candidates.len();
        log::info!(
            "Repairing {} Exam record(s) having null SideIndex",
            candidates.len()
        );

        let bar = progress_bar(self.show_progress, candidates.len(), "Backfilling SideIndex");
        let mut seen = HashSet::new();
        for candidate in &candidates {
            bar.inc(1);
            if !seen.insert(candidate.exam_id) {
                continue;
            }
            outcome.exams += 1;

            let variable = candidate.lookup_variable();
            let Some(side_index) = self
                .source
                .lookup(&variable, &candidate.uid)
                .and_then(|value| {
                    let parsed = as_integer(&value);
                    if parsed.is_none() {
                        log::warn!(
                            "Ignoring non-integer {} for {}: {}",
                            variable,
                            candidate.uid,
                            value
                        );
                    }
                    parsed
                })
            else {
                log::debug!("No {} for subject {}", variable, candidate.uid);
                outcome.lookups_absent += 1;
                continue;
            };

            let action = format!(
                "set SideIndex = {} on exam {} ({} of wave {})",
                side_index, candidate.exam_id, candidate.uid, candidate.wave
            );
            if gated_write(self.mode, &action, || {
                exams.set_side_index(candidate.exam_id, side_index)
            })
            .succeeded()
            {
                outcome.updated += 1;
            } else {
                outcome.failed_statements += 1;
            }
        }
        bar.finish_and_clear();

        outcome.orphaned_ratings = self.count_orphaned_ratings(&mut outcome.failed_statements);

        outcome.missing_after = if self.mode.is_live() {
            match exams.count_missing_side_index() {
                Ok(count) => count,
                Err(e) => {
                    log::warn!("Cannot recount missing SideIndex: {}", e);
                    outcome.failed_statements += 1;
                    outcome.missing_before
                }
            }
        } else {
            outcome.missing_before
        };

        log::info!(
            "Number of exam records updated: {} of {}",
            outcome.updated,
            outcome.exams
        );
        Ok(outcome)
    }

    /// Candidate rows as they read once pending removals are applied. An exam
    /// whose images are all gone keeps one row without image or rating.
    fn without_pending(&self, candidates: Vec<SideIndexCandidate>) -> Vec<SideIndexCandidate> {
        let Some(pending) = self.pending else {
            return candidates;
        };

        let mut kept = Vec::with_capacity(candidates.len());
        for rows in candidates.chunk_by(|a, b| a.exam_id == b.exam_id) {
            let before = kept.len();
            kept.extend(
                rows.iter()
                    .filter(|row| !row.image_id.is_some_and(|id| pending.is_removed(id)))
                    .cloned(),
            );
            if kept.len() == before {
                kept.push(SideIndexCandidate {
                    image_id: None,
                    rating_id: None,
                    ..rows[0].clone()
                });
            }
        }
        kept
    }

    // Detect only: orphaned ratings are left for manual review.
    fn count_orphaned_ratings(&self, failed_statements: &mut usize) -> usize {
        let ratings = RatingRepository::new(self.gateway);
        let found = ratings.find_orphaned().and_then(|mut orphans| {
            if let Some(pending) = self.pending {
                let mut removed: Vec<i64> = pending.removed_ids().collect();
                removed.sort_unstable();
                for image_id in removed {
                    orphans.extend(ratings.find_by_image(image_id)?);
                }
            }
            Ok(orphans)
        });
        match found {
            Ok(orphans) => {
                for orphan in &orphans {
                    log::info!(
                        "Found orphaned rating {} referencing missing image {}",
                        orphan.rating_id,
                        orphan.image_id
                    );
                }
                orphans.len()
            }
            Err(e) => {
                log::warn!("Cannot look for orphaned ratings: {}", e);
                *failed_statements += 1;
                0
            }
        }
    }
}
