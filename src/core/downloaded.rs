use crate::core::probe::FilesystemProbe;
use crate::core::pruner::OrphanPruner;
use crate::core::{gated_write, progress_bar, RunMode};
use crate::database::models::{ImageArtifact, ImageLink};
use crate::database::repositories::{ExamRepository, ImageRepository};
use crate::database::{DatabaseError, Gateway};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedOutcome {
    pub exams_examined: usize,
    pub images_examined: usize,
    pub flipped_to_downloaded: usize,
    pub flipped_to_not_downloaded: usize,
    pub images_marked_for_removal: usize,
    pub images_removed: usize,
    pub unexpected_filenames: usize,
    pub files_removed_empty: usize,
    pub files_decompressed: usize,
    pub probe_errors: usize,
    pub failed_statements: usize,
    /// Image rows removed, applied or simulated.
    #[serde(skip)]
    pub removed: Vec<ImageLink>,
    /// Downloaded flags written, applied or simulated.
    #[serde(skip)]
    pub flag_changes: BTreeMap<i64, bool>,
}

impl DownloadedOutcome {
    pub fn flips(&self) -> usize {
        self.flipped_to_downloaded + self.flipped_to_not_downloaded
    }
}

/// Brings `Exam.Downloaded` back in line with the Image rows and the
/// artifacts on disk, pruning Image rows whose artifact is missing.
pub struct DownloadedReconciler<'a> {
    gateway: &'a Gateway,
    probe: &'a FilesystemProbe,
    mode: RunMode,
    show_progress: bool,
}

impl<'a> DownloadedReconciler<'a> {
    pub fn new(gateway: &'a Gateway, probe: &'a FilesystemProbe, mode: RunMode) -> Self {
        Self {
            gateway,
            probe,
            mode,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn run(&self) -> Result<DownloadedOutcome, DatabaseError> {
        let mut outcome = DownloadedOutcome::default();
        self.clear_flags_without_image(&mut outcome)?;
        self.reconcile_with_files(&mut outcome)?;

        log::info!(
            "Downloaded flags: {} flipped to downloaded, {} to not downloaded, {} image record(s) removed",
            outcome.flipped_to_downloaded,
            outcome.flipped_to_not_downloaded,
            outcome.images_removed
        );
        Ok(outcome)
    }

    /// Pass A: exams flagged as downloaded with no Image row at all.
    pub fn clear_flags_without_image(
        &self,
        outcome: &mut DownloadedOutcome,
    ) -> Result<(), DatabaseError> {
        let exams = ExamRepository::new(self.gateway);
        let stale = exams.find_downloaded_without_image()?;
        if !stale.is_empty() {
            log::info!(
                "Repairing {} Exam record(s) flagged downloaded with no Image record",
                stale.len()
            );
        }

        for exam in &stale {
            outcome.exams_examined += 1;
            let action = format!(
                "set Downloaded = 0 on exam {} (interview {}, scan type {}, side {})",
                exam.exam_id, exam.interview_id, exam.scan_type_id, exam.side
            );
            if gated_write(self.mode, &action, || exams.set_downloaded(exam.exam_id, false))
                .succeeded()
            {
                outcome.flipped_to_not_downloaded += 1;
                outcome.flag_changes.insert(exam.exam_id, false);
            } else {
                outcome.failed_statements += 1;
            }
        }
        Ok(())
    }

    /// Pass B: probe every Image row's artifact, prune the rows without one,
    /// then set each affected exam's flag from the rows that survive.
    pub fn reconcile_with_files(
        &self,
        outcome: &mut DownloadedOutcome,
    ) -> Result<(), DatabaseError> {
        let images = ImageRepository::new(self.gateway);
        let artifacts = images.find_artifacts()?;
        outcome.images_examined += artifacts.len();

        let bar = progress_bar(self.show_progress, artifacts.len(), "Probing image files");
        let mut valid = HashSet::new();
        let mut marked = BTreeSet::new();
        let mut unknown_exams = HashSet::new();

        for artifact in &artifacts {
            bar.inc(1);
            match self.probe.probe(
                artifact.interview_id,
                artifact.exam_id,
                artifact.image_id,
                &artifact.suffix,
            ) {
                Ok(result) => {
                    outcome.files_removed_empty += result.removed_empty;
                    outcome.files_decompressed += result.decompressed;
                    outcome.probe_errors += result.io_errors;
                    if result.exists {
                        valid.insert(artifact.image_id);
                        continue;
                    }
                    if result.io_errors > 0 {
                        log::warn!(
                            "Leaving image {} in place, its files could not be normalized",
                            artifact.image_id
                        );
                        unknown_exams.insert(artifact.exam_id);
                        continue;
                    }
                    if result.has_unexpected_name() {
                        let found: Vec<String> = result
                            .candidate_files
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect();
                        log::warn!(
                            "The expected file {} is not available among {}",
                            result.resolved_path.display(),
                            found.join(", ")
                        );
                        outcome.unexpected_filenames += 1;
                    } else {
                        log::debug!(
                            "No artifact for image {} at {}",
                            artifact.image_id,
                            result.resolved_path.display()
                        );
                    }
                    marked.insert(artifact.image_id);
                }
                Err(e) => {
                    log::warn!("Cannot probe image {}: {}", artifact.image_id, e);
                    outcome.probe_errors += 1;
                    unknown_exams.insert(artifact.exam_id);
                }
            }
        }
        bar.finish_and_clear();
        outcome.images_marked_for_removal += marked.len();

        let pruned = OrphanPruner::new(self.gateway, self.mode).prune(&marked);
        outcome.images_removed += pruned.removed.len();
        outcome.failed_statements += pruned.failed_statements;
        let removed = pruned.removed_ids();
        outcome.removed.extend(pruned.removed.iter().cloned());

        // Flag currently stored for each exam, and whether a surviving image
        // with a valid artifact backs it.
        let mut exams: BTreeMap<i64, (Option<bool>, bool)> = BTreeMap::new();
        for artifact in &artifacts {
            let entry = exams
                .entry(artifact.exam_id)
                .or_insert((Some(artifact.downloaded), false));
            if valid.contains(&artifact.image_id) && !removed.contains(&artifact.image_id) {
                entry.1 = true;
            }
        }
        for link in &pruned.removed {
            exams.entry(link.exam_id).or_insert((None, false));
        }

        self.apply_flags(&exams, &unknown_exams, outcome);
        Ok(())
    }

    fn apply_flags(
        &self,
        exams: &BTreeMap<i64, (Option<bool>, bool)>,
        unknown_exams: &HashSet<i64>,
        outcome: &mut DownloadedOutcome,
    ) {
        let repo = ExamRepository::new(self.gateway);

        for (&exam_id, &(stored, backed)) in exams {
            outcome.exams_examined += 1;
            if unknown_exams.contains(&exam_id) {
                log::debug!("Leaving exam {} untouched, an artifact could not be probed", exam_id);
                continue;
            }

            let stored = match stored {
                Some(flag) => flag,
                None => match repo.downloaded(exam_id) {
                    Ok(Some(flag)) => flag,
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("Cannot read Downloaded for exam {}: {}", exam_id, e);
                        outcome.failed_statements += 1;
                        continue;
                    }
                },
            };
            if stored == backed {
                continue;
            }

            let action = format!("set Downloaded = {} on exam {}", backed as i64, exam_id);
            if gated_write(self.mode, &action, || repo.set_downloaded(exam_id, backed)).succeeded()
            {
                outcome.flag_changes.insert(exam_id, backed);
                if backed {
                    outcome.flipped_to_downloaded += 1;
                } else {
                    outcome.flipped_to_not_downloaded += 1;
                }
            } else {
                outcome.failed_statements += 1;
            }
        }
    }
}

/// Exams whose stored flag disagrees with the artifacts, without touching
/// anything. Used to check a store after a live run.
pub fn flag_mismatches(
    artifacts: &[ImageArtifact],
    probe: &FilesystemProbe,
) -> Vec<i64> {
    let mut exams: BTreeMap<i64, (bool, bool)> = BTreeMap::new();
    for artifact in artifacts {
        let backed = crate::core::probe::is_non_empty(&probe.resolve(
            artifact.interview_id,
            artifact.exam_id,
            artifact.image_id,
            &artifact.suffix,
        ));
        let entry = exams
            .entry(artifact.exam_id)
            .or_insert((artifact.downloaded, false));
        entry.1 |= backed;
    }
    exams
        .into_iter()
        .filter(|(_, (stored, backed))| stored != backed)
        .map(|(exam_id, _)| exam_id)
        .collect()
}
