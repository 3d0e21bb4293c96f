use rusqlite::Row;
use serde::{Deserialize, Serialize};

// Exam flagged as downloaded with no Image row behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleExam {
    pub exam_id: i64,
    pub interview_id: i64,
    pub scan_type_id: i64,
    pub side: String,
}

impl StaleExam {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            exam_id: row.get("examId")?,
            interview_id: row.get("interviewId")?,
            scan_type_id: row.get("typeId")?,
            side: row.get("side")?,
        })
    }
}

/// An Image row joined to everything needed to locate its artifact on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub image_id: i64,
    pub exam_id: i64,
    pub interview_id: i64,
    pub parent_image_id: Option<i64>,
    pub suffix: String,
    pub downloaded: bool,
}

impl ImageArtifact {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            image_id: row.get("imageId")?,
            exam_id: row.get("examId")?,
            interview_id: row.get("interviewId")?,
            parent_image_id: row.get("parentId")?,
            suffix: row.get("suffix")?,
            downloaded: row.get::<_, i64>("downloaded")? != 0,
        })
    }
}

// Minimal view of an Image used while pruning pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLink {
    pub image_id: i64,
    pub exam_id: i64,
    pub parent_image_id: Option<i64>,
}

impl ImageLink {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            image_id: row.get("imageId")?,
            exam_id: row.get("examId")?,
            parent_image_id: row.get("parentId")?,
        })
    }
}

/// Exam whose side-dependent ScanType still lacks a SideIndex. One row per
/// joined Image/Rating, so the same exam can appear more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideIndexCandidate {
    pub exam_id: i64,
    pub uid: String,
    pub scan_type: String,
    pub wave: String,
    pub source: String,
    pub image_id: Option<i64>,
    pub rating_id: Option<i64>,
}

impl SideIndexCandidate {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            exam_id: row.get("examId")?,
            uid: row.get("uid")?,
            scan_type: row.get("type")?,
            wave: row.get("wave")?,
            source: row.get("source")?,
            image_id: row.get("imageId")?,
            rating_id: row.get("ratingId")?,
        })
    }

    /// Name of the variable holding this exam's side index in the external
    /// metadata source.
    pub fn lookup_variable(&self) -> String {
        format!("{}.Exam:{}.SideIndex", self.source, self.scan_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedRating {
    pub rating_id: i64,
    pub image_id: i64,
}

impl OrphanedRating {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            rating_id: row.get("ratingId")?,
            image_id: row.get("imageId")?,
        })
    }
}

// Baseline image of the designated ScanType that nobody has rated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnratedImage {
    pub image_id: i64,
    pub exam_id: i64,
    pub interview_id: i64,
    pub suffix: String,
}

impl UnratedImage {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            image_id: row.get("imageId")?,
            exam_id: row.get("examId")?,
            interview_id: row.get("interviewId")?,
            suffix: row.get("suffix")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_variable() {
        let candidate = SideIndexCandidate {
            exam_id: 7,
            uid: "A123456".to_string(),
            scan_type: "CarotidIntima".to_string(),
            wave: "baseline".to_string(),
            source: "clsa-dcs-images".to_string(),
            image_id: None,
            rating_id: None,
        };

        assert_eq!(
            candidate.lookup_variable(),
            "clsa-dcs-images.Exam:CarotidIntima.SideIndex"
        );
    }
}
