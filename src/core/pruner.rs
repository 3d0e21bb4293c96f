use crate::core::{gated_write, RunMode};
use crate::database::models::ImageLink;
use crate::database::repositories::ImageRepository;
use crate::database::{DatabaseError, Gateway};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Rows deleted (or that would be, in dry-run), including paired rows.
    pub removed: Vec<ImageLink>,
    pub failed_statements: usize,
}

impl PruneOutcome {
    pub fn removed_ids(&self) -> HashSet<i64> {
        self.removed.iter().map(|link| link.image_id).collect()
    }
}

/// Deletes Image rows without a usable artifact. A parent and its children
/// go together: children are detached and deleted first.
pub struct OrphanPruner<'a> {
    images: ImageRepository<'a>,
    mode: RunMode,
}

impl<'a> OrphanPruner<'a> {
    pub fn new(gateway: &'a Gateway, mode: RunMode) -> Self {
        Self {
            images: ImageRepository::new(gateway),
            mode,
        }
    }

    pub fn prune(&self, marked: &BTreeSet<i64>) -> PruneOutcome {
        let mut outcome = PruneOutcome::default();
        let mut handled = HashSet::new();

        for &image_id in marked {
            if handled.contains(&image_id) {
                continue;
            }
            match self.family(image_id) {
                Ok(family) if family.is_empty() => {
                    log::debug!("Image {} is already gone", image_id);
                    handled.insert(image_id);
                }
                Ok(family) => self.remove_family(&family, &mut handled, &mut outcome),
                Err(e) => {
                    log::warn!("Skipping removal of image {}: {}", image_id, e);
                    outcome.failed_statements += 1;
                }
            }
        }

        outcome
    }

    /// The image, its parent and every child of that parent, highest id
    /// first. Children normally carry higher ids than their parent.
    pub fn family(&self, image_id: i64) -> Result<Vec<ImageLink>, DatabaseError> {
        let Some(link) = self.images.find_link(image_id)? else {
            return Ok(Vec::new());
        };

        let root = match link.parent_image_id {
            Some(parent_id) => self.images.find_link(parent_id)?.unwrap_or(link),
            None => link,
        };

        let mut family = self.images.find_children(root.image_id)?;
        family.push(root);
        family.sort_by(|a, b| b.image_id.cmp(&a.image_id));
        family.dedup_by_key(|link| link.image_id);
        Ok(family)
    }

    pub(crate) fn remove_family(
        &self,
        family: &[ImageLink],
        handled: &mut HashSet<i64>,
        outcome: &mut PruneOutcome,
    ) {
        if family.len() > 1 {
            let ids: Vec<String> = family.iter().map(|l| l.image_id.to_string()).collect();
            log::info!("Removing paired Image records {}", ids.join(", "));
        }

        // Detach every child first so no delete trips over a parent reference.
        for link in family.iter().filter(|l| l.parent_image_id.is_some()) {
            let action = format!("clear ParentImageId on image {}", link.image_id);
            if !gated_write(self.mode, &action, || self.images.clear_parent(link.image_id))
                .succeeded()
            {
                outcome.failed_statements += 1;
            }
        }

        for link in family {
            handled.insert(link.image_id);
            let action = format!("delete image {}", link.image_id);
            if gated_write(self.mode, &action, || self.images.delete(link.image_id)).succeeded() {
                outcome.removed.push(link.clone());
            } else {
                outcome.failed_statements += 1;
            }
        }
    }
}
