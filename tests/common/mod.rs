#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use imaging_reconcile::database::schema::initialize_schema;
use imaging_reconcile::database::Gateway;
use imaging_reconcile::services::MetadataSource;
use rusqlite::params;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SIDE_INDEX_VARIABLE: &str = "clsa-dcs-images.Exam:CarotidIntima.SideIndex";

/// A schema-initialized store plus an artifact root on disk. Interview 1
/// (`A000001`) belongs to baseline wave 1, scan type 1 is a two-sided
/// `CarotidIntima` stored as `.dcm.gz`.
pub struct Site {
    pub gateway: Gateway,
    pub images: TempDir,
}

impl Site {
    pub fn new() -> Self {
        let gateway = Gateway::open_in_memory().unwrap();
        initialize_schema(&gateway).unwrap();
        let site = Self {
            gateway,
            images: TempDir::new().unwrap(),
        };
        site.sql(
            "INSERT INTO Wave (Id, Name, Rank, MetaDataSource) VALUES (1, 'Baseline', 1, 'clsa-dcs-images')",
        );
        site.sql("INSERT INTO Interview (Id, UId, WaveId) VALUES (1, 'A000001', 1)");
        site.sql("INSERT INTO Interview (Id, UId, WaveId) VALUES (2, 'A000002', 1)");
        site.sql(
            "INSERT INTO ScanType (Id, WaveId, Type, SideCount, FileSuffix) VALUES (1, 1, 'CarotidIntima', 2, '.dcm.gz')",
        );
        site
    }

    pub fn root(&self) -> &Path {
        self.images.path()
    }

    pub fn sql(&self, sql: &str) {
        self.gateway.execute(sql, []).unwrap();
    }

    pub fn exam(&self, id: i64, interview_id: i64, side: &str, downloaded: bool) {
        self.gateway
            .execute(
                "INSERT INTO Exam (Id, InterviewId, ScanTypeId, Side, Downloaded) VALUES (?1, ?2, 1, ?3, ?4)",
                params![id, interview_id, side, downloaded as i64],
            )
            .unwrap();
    }

    pub fn image(&self, id: i64, exam_id: i64, parent: Option<i64>) {
        self.gateway
            .execute(
                "INSERT INTO Image (Id, ExamId, ParentImageId, Dimensionality) VALUES (?1, ?2, ?3, 2)",
                params![id, exam_id, parent],
            )
            .unwrap();
    }

    pub fn rating(&self, id: i64, image_id: i64) {
        self.gateway
            .execute(
                "INSERT INTO Rating (Id, ImageId, UserId, Rating) VALUES (?1, ?2, 1, 4)",
                params![id, image_id],
            )
            .unwrap();
    }

    pub fn artifact_path(&self, interview_id: i64, exam_id: i64, file: &str) -> PathBuf {
        let dir = self
            .root()
            .join(interview_id.to_string())
            .join(exam_id.to_string());
        fs::create_dir_all(&dir).unwrap();
        dir.join(file)
    }

    pub fn write_file(&self, interview_id: i64, exam_id: i64, file: &str, content: &[u8]) {
        fs::write(self.artifact_path(interview_id, exam_id, file), content).unwrap();
    }

    pub fn write_gz(&self, interview_id: i64, exam_id: i64, file: &str, content: &[u8]) {
        let path = self.artifact_path(interview_id, exam_id, file);
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
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
            .flatten()
    }

    pub fn image_ids(&self) -> Vec<i64> {
        self.gateway
            .query_all("SELECT Id FROM Image ORDER BY Id", [], |row| row.get(0))
            .unwrap()
    }

    /// Every file under the artifact root with its size, for before/after
    /// comparisons.
    pub fn files(&self) -> Vec<(PathBuf, u64)> {
        let mut files = Vec::new();
        let mut pending = vec![self.root().to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let len = fs::metadata(&path).unwrap().len();
                    files.push((path, len));
                }
            }
        }
        files.sort();
        files
    }

    /// Snapshot of the rows the passes may touch.
    pub fn rows(&self) -> Vec<String> {
        let mut rows: Vec<String> = self
            .gateway
            .query_all(
                "SELECT Id, Downloaded, SideIndex FROM Exam ORDER BY Id",
                [],
                |row| {
                    Ok(format!(
                        "exam {} {} {:?}",
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?
                    ))
                },
            )
            .unwrap();
        rows.extend(
            self.gateway
                .query_all(
                    "SELECT Id, ExamId, ParentImageId FROM Image ORDER BY Id",
                    [],
                    |row| {
                        Ok(format!(
                            "image {} {} {:?}",
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<i64>>(2)?
                        ))
                    },
                )
                .unwrap(),
        );
        rows
    }
}

/// In-memory metadata service keyed by (variable, subject).
#[derive(Default)]
pub struct StubMetadata {
    values: HashMap<(String, String), Value>,
}

impl StubMetadata {
    pub fn with(mut self, variable: &str, subject_id: &str, value: Value) -> Self {
        self.values
            .insert((variable.to_string(), subject_id.to_string()), value);
        self
    }
}

impl MetadataSource for StubMetadata {
    fn lookup(&self, variable: &str, subject_id: &str) -> Option<Value> {
        self.values
            .get(&(variable.to_string(), subject_id.to_string()))
            .cloned()
    }
}
