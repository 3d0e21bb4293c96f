use super::schema::initialize_schema;
use super::Gateway;
use rusqlite::params;

/// In-memory store with the reconciliation schema, plus shorthand inserts.
pub(crate) struct Fixture {
    pub gateway: Gateway,
}

impl Fixture {
    pub fn new() -> Self {
        let gateway = Gateway::open_in_memory().unwrap();
        initialize_schema(&gateway).unwrap();
        Self { gateway }
    }

    /// Baseline wave 1, interview 1 (`A000001`) and a two-sided
    /// `CarotidIntima` scan type 1 with suffix `.dcm.gz`.
    pub fn baseline() -> Self {
        let fixture = Self::new();
        fixture.wave(1, 1, "clsa-dcs-images");
        fixture.interview(1, "A000001", 1);
        fixture.scan_type(1, 1, "CarotidIntima", 2, ".dcm.gz");
        fixture
    }

    pub fn wave(&self, id: i64, rank: i64, source: &str) {
        self.gateway
            .execute(
                "INSERT INTO Wave (Id, Name, Rank, MetaDataSource) VALUES (?1, ?2, ?3, ?4)",
                params![id, format!("wave{}", id), rank, source],
            )
            .unwrap();
    }

    pub fn interview(&self, id: i64, uid: &str, wave_id: i64) {
        self.gateway
            .execute(
                "INSERT INTO Interview (Id, UId, WaveId) VALUES (?1, ?2, ?3)",
                params![id, uid, wave_id],
            )
            .unwrap();
    }

    pub fn scan_type(&self, id: i64, wave_id: i64, name: &str, side_count: i64, suffix: &str) {
        self.gateway
            .execute(
                "INSERT INTO ScanType (Id, WaveId, Type, SideCount, FileSuffix) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, wave_id, name, side_count, suffix],
            )
            .unwrap();
    }

    pub fn exam(&self, id: i64, interview_id: i64, scan_type_id: i64, side: &str, downloaded: bool) {
        self.gateway
            .execute(
                "INSERT INTO Exam (Id, InterviewId, ScanTypeId, Side, Downloaded) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, interview_id, scan_type_id, side, downloaded as i64],
            )
            .unwrap();
    }

    pub fn image(&self, id: i64, exam_id: i64, parent: Option<i64>, dimensionality: i64) {
        self.gateway
            .execute(
                "INSERT INTO Image (Id, ExamId, ParentImageId, Dimensionality) VALUES (?1, ?2, ?3, ?4)",
                params![id, exam_id, parent, dimensionality],
            )
            .unwrap();
    }

    pub fn rating(&self, id: i64, image_id: i64) {
        self.gateway
            .execute(
                "INSERT INTO Rating (Id, ImageId, UserId, Rating) VALUES (?1, ?2, 1, 3)",
                params![id, image_id],
            )
            .unwrap();
    }

    pub fn downloaded(&self, exam_id: i64) -> bool {
        self.gateway
            .query_one(
                "SELECT Downloaded FROM Exam WHERE Id = ?1",
                params![exam_id],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            .unwrap()
            != 0
    }

    pub fn side_index(&self, exam_id: i64) -> Option<i64> {
        self.gateway
            .query_one(
                "SELECT SideIndex FROM Exam WHERE Id = ?1",
                params![exam_id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .unwrap()
            .unwrap()
    }

    pub fn image_ids(&self) -> Vec<i64> {
        self.gateway
            .query_all("SELECT Id FROM Image ORDER BY Id", [], |row| row.get(0))
            .unwrap()
    }

    pub fn parent_of(&self, image_id: i64) -> Option<i64> {
        self.gateway
            .query_one(
                "SELECT ParentImageId FROM Image WHERE Id = ?1",
                params![image_id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .unwrap()
            .flatten()
    }
}
