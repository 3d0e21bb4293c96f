use crate::database::models::{ImageArtifact, ImageLink, UnratedImage};
use crate::database::{DatabaseError, Gateway};
use rusqlite::params;

const ARTIFACTS: &str = "SELECT Image.Id AS imageId, \
     Image.ExamId AS examId, \
     Exam.InterviewId AS interviewId, \
     Image.ParentImageId AS parentId, \
     ScanType.FileSuffix AS suffix, \
     Exam.Downloaded AS downloaded \
     FROM Image \
     JOIN Exam ON Exam.Id = Image.ExamId \
     JOIN Interview ON Interview.Id = Exam.InterviewId \
     JOIN ScanType ON ScanType.Id = Exam.ScanTypeId \
     ORDER BY Image.Id";

const UNRATED_BASELINE: &str = "SELECT Image.Id AS imageId, \
     Exam.Id AS examId, \
     Interview.Id AS interviewId, \
     ScanType.FileSuffix AS suffix \
     FROM Image \
     JOIN Exam ON Exam.Id = Image.ExamId \
     JOIN Interview ON Interview.Id = Exam.InterviewId \
     JOIN ScanType ON ScanType.Id = Exam.ScanTypeId \
     JOIN Wave ON Wave.Id = Interview.WaveId AND Wave.Id = ScanType.WaveId \
     LEFT JOIN Rating ON Rating.ImageId = Image.Id \
     WHERE ScanType.Type = ?1 \
     AND Wave.Rank = ?2 \
     AND Image.Dimensionality = ?3 \
     AND Rating.Id IS NULL \
     ORDER BY Image.Id";

pub struct ImageRepository<'a> {
    gateway: &'a Gateway,
}

impl<'a> ImageRepository<'a> {
    pub fn new(gateway: &'a Gateway) -> Self {
        Self { gateway }
    }

    /// Every Image row with the ids and suffix its artifact path is built from.
    pub fn find_artifacts(&self) -> Result<Vec<ImageArtifact>, DatabaseError> {
        self.gateway.query_all(ARTIFACTS, [], ImageArtifact::from_row)
    }

    pub fn find_link(&self, image_id: i64) -> Result<Option<ImageLink>, DatabaseError> {
        self.gateway.query_one(
            "SELECT Id AS imageId, ExamId AS examId, ParentImageId AS parentId \
             FROM Image WHERE Id = ?1",
            params![image_id],
            ImageLink::from_row,
        )
    }

    pub fn find_children(&self, image_id: i64) -> Result<Vec<ImageLink>, DatabaseError> {
        self.gateway.query_all(
            "SELECT Id AS imageId, ExamId AS examId, ParentImageId AS parentId \
             FROM Image WHERE ParentImageId = ?1 ORDER BY Id",
            params![image_id],
            ImageLink::from_row,
        )
    }

    pub fn clear_parent(&self, image_id: i64) -> Result<usize, DatabaseError> {
        self.gateway.execute(
            "UPDATE Image SET ParentImageId = NULL WHERE Id = ?1",
            params![image_id],
        )
    }

    /// Clear `ParentImageId` on every child pointing at `image_id`.
    pub fn detach_children(&self, image_id: i64) -> Result<usize, DatabaseError> {
        self.gateway.execute(
            "UPDATE Image SET ParentImageId = NULL WHERE ParentImageId = ?1",
            params![image_id],
        )
    }

    pub fn delete(&self, image_id: i64) -> Result<usize, DatabaseError> {
        self.gateway
            .execute("DELETE FROM Image WHERE Id = ?1", params![image_id])
    }

    pub fn count_for_exam(&self, exam_id: i64) -> Result<i64, DatabaseError> {
        self.gateway
            .query_one(
                "SELECT COUNT(*) FROM Image WHERE ExamId = ?1",
                params![exam_id],
                |row| row.get(0),
            )
            .map(|count| count.unwrap_or(0))
    }

    /// Images of `scan_type` in waves of `rank` with the given
    /// dimensionality that carry no Rating.
    pub fn find_unrated(
        &self,
        scan_type: &str,
        rank: i64,
        dimensionality: i64,
    ) -> Result<Vec<UnratedImage>, DatabaseError> {
        self.gateway.query_all(
            UNRATED_BASELINE,
            params![scan_type, rank, dimensionality],
            UnratedImage::from_row,
        )
    }
}
