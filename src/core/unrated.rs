use crate::config::CleanupConfig;
use crate::core::probe::FilesystemProbe;
use crate::core::pruner::{OrphanPruner, PruneOutcome};
use crate::core::{gated_write, progress_bar, PendingChanges, RunMode};
use crate::database::models::{ImageLink, UnratedImage};
use crate::database::repositories::{ExamRepository, ImageRepository};
use crate::database::{DatabaseError, Gateway};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub scan_type: String,
    pub candidates: usize,
    pub healthy: usize,
    /// Image rows deleted, including children taken along with a parent.
    pub deleted: usize,
    pub flags_cleared: usize,
    pub probe_errors: usize,
    pub failed_statements: usize,
    #[serde(skip)]
    pub removed: Vec<ImageLink>,
    #[serde(skip)]
    pub flag_changes: BTreeMap<i64, bool>,
}

/// Deletes unrated baseline images of one scan type whose artifact is
/// missing or empty. A parent goes together with its children.
pub struct UnratedCleanup<'a> {
    gateway: &'a Gateway,
    probe: &'a FilesystemProbe,
    mode: RunMode,
    criteria: CleanupConfig,
    pending: Option<&'a PendingChanges>,
    show_progress: bool,
}

impl<'a> UnratedCleanup<'a> {
    pub fn new(
        gateway: &'a Gateway,
        probe: &'a FilesystemProbe,
        mode: RunMode,
        criteria: CleanupConfig,
    ) -> Self {
        Self {
            gateway,
            probe,
            mode,
            criteria,
            pending: None,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Treat the removals and flag writes of earlier dry-run passes as done.
    pub fn with_pending(mut self, pending: &'a PendingChanges) -> Self {
        self.pending = Some(pending);
        self
    }

    fn pending_removal(&self, image_id: i64) -> bool {
        self.pending.is_some_and(|p| p.is_removed(image_id))
    }

    pub fn run(&self) -> Result<CleanupOutcome, DatabaseError> {
        let images = ImageRepository::new(self.gateway);
        let candidates: Vec<UnratedImage> = images
            .find_unrated(
                &self.criteria.scan_type,
                self.criteria.baseline_rank,
                self.criteria.dimensionality,
            )?
            .into_iter()
            .filter(|image| !self.pending_removal(image.image_id))
            .collect();

        let mut outcome = CleanupOutcome {
            scan_type: self.criteria.scan_type.clone(),
            candidates: candidates.len(),
            ..Default::default()
        };
        log::info!(
            "Checking {} unrated baseline {} image record(s) for invalid or missing files",
            candidates.len(),
            self.criteria.scan_type
        );

        let bar = progress_bar(self.show_progress, candidates.len(), "Checking unrated images");
        let mut removed = HashSet::new();
        for image in &candidates {
            bar.inc(1);
            if removed.contains(&image.image_id) {
                continue;
            }

            let result = match self.probe.probe(
                image.interview_id,
                image.exam_id,
                image.image_id,
                &image.suffix,
            ) {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("Cannot probe image {}: {}", image.image_id, e);
                    outcome.probe_errors += 1;
                    continue;
                }
            };
            if result.exists {
                outcome.healthy += 1;
                continue;
            }
            if result.io_errors > 0 {
                log::warn!(
                    "Leaving image {} in place, its files could not be normalized",
                    image.image_id
                );
                outcome.probe_errors += 1;
                continue;
            }
            log::info!("{} is invalid", result.resolved_path.display());

            let children = match images.find_children(image.image_id) {
                Ok(children) => children,
                Err(e) => {
                    log::warn!("Cannot look up children of image {}: {}", image.image_id, e);
                    outcome.failed_statements += 1;
                    continue;
                }
            };
            let live_children = children
                .iter()
                .any(|child| !removed.contains(&child.image_id) && !self.pending_removal(child.image_id));

            if live_children {
                self.remove_family(image, &mut removed, &mut outcome);
            } else {
                self.remove_single(image, &images, &mut removed, &mut outcome);
            }
        }
        bar.finish_and_clear();

        outcome.deleted = outcome.removed.len();
        self.clear_emptied_exams(&mut outcome);

        log::info!(
            "Number of image records deleted: {} of {}",
            outcome.deleted,
            outcome.candidates
        );
        Ok(outcome)
    }

    /// A record without children: detach it from its parent and delete it.
    fn remove_single(
        &self,
        image: &UnratedImage,
        images: &ImageRepository<'_>,
        removed: &mut HashSet<i64>,
        outcome: &mut CleanupOutcome,
    ) {
        let mut ok = true;
        let detach = format!("clear ParentImageId on image {}", image.image_id);
        ok &= gated_write(self.mode, &detach, || images.clear_parent(image.image_id)).succeeded();
        let detach = format!("detach children of image {}", image.image_id);
        ok &= gated_write(self.mode, &detach, || images.detach_children(image.image_id))
            .succeeded();
        let delete = format!("delete image {}", image.image_id);
        ok &= gated_write(self.mode, &delete, || images.delete(image.image_id)).succeeded();

        if ok {
            removed.insert(image.image_id);
            outcome.removed.push(ImageLink {
                image_id: image.image_id,
                exam_id: image.exam_id,
                parent_image_id: None,
            });
        } else {
            outcome.failed_statements += 1;
        }
    }

    /// A parent record: its children lose their artifact pairing, so they go
    /// in the same run.
    fn remove_family(
        &self,
        image: &UnratedImage,
        removed: &mut HashSet<i64>,
        outcome: &mut CleanupOutcome,
    ) {
        let pruner = OrphanPruner::new(self.gateway, self.mode);
        let family: Vec<ImageLink> = match pruner.family(image.image_id) {
            Ok(family) => family
                .into_iter()
                .filter(|link| !removed.contains(&link.image_id))
                .filter(|link| !self.pending_removal(link.image_id))
                .collect(),
            Err(e) => {
                log::warn!("Skipping removal of image {}: {}", image.image_id, e);
                outcome.failed_statements += 1;
                return;
            }
        };

        let mut pruned = PruneOutcome::default();
        let mut handled = HashSet::new();
        pruner.remove_family(&family, &mut handled, &mut pruned);

        outcome.failed_statements += pruned.failed_statements;
        for link in pruned.removed {
            removed.insert(link.image_id);
            outcome.removed.push(link);
        }
    }

    /// An exam left without any Image row is no longer downloaded.
    fn clear_emptied_exams(&self, outcome: &mut CleanupOutcome) {
        let images = ImageRepository::new(self.gateway);
        let exams = ExamRepository::new(self.gateway);

        let mut deleted_per_exam: HashMap<i64, i64> = HashMap::new();
        for link in &outcome.removed {
            *deleted_per_exam.entry(link.exam_id).or_default() += 1;
        }
        let mut exam_ids: Vec<i64> = deleted_per_exam.keys().copied().collect();
        exam_ids.sort_unstable();

        for exam_id in exam_ids {
            let state = images.count_for_exam(exam_id).and_then(|count| {
                exams
                    .downloaded(exam_id)
                    .map(|flag| (count, flag.unwrap_or(false)))
            });
            let (count, stored) = match state {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("Cannot check exam {}: {}", exam_id, e);
                    outcome.failed_statements += 1;
                    continue;
                }
            };

            // In dry-run the deleted rows are still counted by the store.
            let (remaining, downloaded) = if self.mode.is_live() {
                (count, stored)
            } else {
                let earlier = self.pending.map_or(0, |p| p.removed_from_exam(exam_id));
                let flag = self.pending.and_then(|p| p.flag(exam_id)).unwrap_or(stored);
                (count - deleted_per_exam[&exam_id] - earlier, flag)
            };
            if remaining > 0 || !downloaded {
                continue;
            }

            let action = format!("set Downloaded = 0 on exam {}", exam_id);
            if gated_write(self.mode, &action, || exams.set_downloaded(exam_id, false)).succeeded()
            {
                outcome.flags_cleared += 1;
                outcome.flag_changes.insert(exam_id, false);
            } else {
                outcome.failed_statements += 1;
            }
        }
    }
}
