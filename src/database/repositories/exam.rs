use crate::database::models::{SideIndexCandidate, StaleExam};
use crate::database::{DatabaseError, Gateway};
use rusqlite::params;

const DOWNLOADED_WITHOUT_IMAGE: &str = "SELECT Exam.Id AS examId, \
     Exam.Side AS side, \
     Exam.InterviewId AS interviewId, \
     Exam.ScanTypeId AS typeId \
     FROM Exam \
     LEFT JOIN Image ON Image.ExamId = Exam.Id \
     WHERE Image.Id IS NULL \
     AND Exam.Downloaded = 1 \
     ORDER BY Exam.Id";

const MISSING_SIDE_INDEX: &str = "SELECT Exam.Id AS examId, \
     Interview.UId AS uid, \
     ScanType.Type AS type, \
     Wave.Name AS wave, \
     Wave.MetaDataSource AS source, \
     Image.Id AS imageId, \
     Rating.Id AS ratingId \
     FROM Exam \
     JOIN Interview ON Interview.Id = Exam.InterviewId \
     JOIN ScanType ON ScanType.Id = Exam.ScanTypeId \
     JOIN Wave ON Wave.Id = Interview.WaveId AND Wave.Id = ScanType.WaveId \
     LEFT JOIN Image ON Image.ExamId = Exam.Id \
     LEFT JOIN Rating ON Rating.ImageId = Image.Id \
     WHERE Exam.SideIndex IS NULL \
     AND ScanType.SideCount > 1 \
     ORDER BY source, type, uid, Exam.Id";

pub struct ExamRepository<'a> {
    gateway: &'a Gateway,
}

impl<'a> ExamRepository<'a> {
    pub fn new(gateway: &'a Gateway) -> Self {
        Self { gateway }
    }

    /// Exams flagged as downloaded that have no Image row at all.
    pub fn find_downloaded_without_image(&self) -> Result<Vec<StaleExam>, DatabaseError> {
        self.gateway
            .query_all(DOWNLOADED_WITHOUT_IMAGE, [], StaleExam::from_row)
    }

    pub fn downloaded(&self, exam_id: i64) -> Result<Option<bool>, DatabaseError> {
        self.gateway.query_one(
            "SELECT Downloaded FROM Exam WHERE Id = ?1",
            params![exam_id],
            |row| Ok(row.get::<_, i64>(0)? != 0),
        )
    }

    pub fn set_downloaded(&self, exam_id: i64, downloaded: bool) -> Result<usize, DatabaseError> {
        self.gateway.execute(
            "UPDATE Exam SET Downloaded = ?1 WHERE Id = ?2",
            params![downloaded as i64, exam_id],
        )
    }

    /// Side-dependent exams with no SideIndex yet, ordered by metadata
    /// source, scan type and subject so a rerun walks them in the same order.
    pub fn find_missing_side_index(&self) -> Result<Vec<SideIndexCandidate>, DatabaseError> {
        self.gateway
            .query_all(MISSING_SIDE_INDEX, [], SideIndexCandidate::from_row)
    }

    pub fn count_missing_side_index(&self) -> Result<i64, DatabaseError> {
        self.gateway
            .query_one(
                "SELECT COUNT(*) FROM Exam \
                 JOIN ScanType ON ScanType.Id = Exam.ScanTypeId \
                 WHERE Exam.SideIndex IS NULL AND ScanType.SideCount > 1",
                [],
                |row| row.get(0),
            )
            .map(|count| count.unwrap_or(0))
    }

    pub fn set_side_index(&self, exam_id: i64, side_index: i64) -> Result<usize, DatabaseError> {
        self.gateway.execute(
            "UPDATE Exam SET SideIndex = ?1 WHERE Id = ?2",
            params![side_index, exam_id],
        )
    }
}
