use super::{DatabaseError, Gateway};

/// Tables the reconciliation passes read and write. The layout is fixed; there
/// are no migrations.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS Wave (
        Id INTEGER PRIMARY KEY,
        Name TEXT NOT NULL,
        Rank INTEGER NOT NULL,
        MetaDataSource TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS Interview (
        Id INTEGER PRIMARY KEY,
        UId TEXT NOT NULL,
        WaveId INTEGER NOT NULL REFERENCES Wave(Id)
    )",
    "CREATE TABLE IF NOT EXISTS ScanType (
        Id INTEGER PRIMARY KEY,
        WaveId INTEGER NOT NULL REFERENCES Wave(Id),
        Type TEXT NOT NULL,
        SideCount INTEGER NOT NULL DEFAULT 1,
        FileSuffix TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS Exam (
        Id INTEGER PRIMARY KEY,
        InterviewId INTEGER NOT NULL REFERENCES Interview(Id),
        ScanTypeId INTEGER NOT NULL REFERENCES ScanType(Id),
        Side TEXT NOT NULL,
        SideIndex INTEGER,
        Downloaded INTEGER NOT NULL DEFAULT 0,
        UNIQUE (InterviewId, ScanTypeId, Side)
    )",
    "CREATE TABLE IF NOT EXISTS Image (
        Id INTEGER PRIMARY KEY,
        ExamId INTEGER NOT NULL REFERENCES Exam(Id),
        ParentImageId INTEGER REFERENCES Image(Id),
        Dimensionality INTEGER NOT NULL DEFAULT 2
    )",
    // ImageId is deliberately unconstrained: ratings can outlive their image.
    "CREATE TABLE IF NOT EXISTS Rating (
        Id INTEGER PRIMARY KEY,
        ImageId INTEGER NOT NULL,
        UserId INTEGER,
        Rating INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_image_exam ON Image(ExamId)",
    "CREATE INDEX IF NOT EXISTS idx_image_parent ON Image(ParentImageId)",
    "CREATE INDEX IF NOT EXISTS idx_rating_image ON Rating(ImageId)",
];

pub fn initialize_schema(gateway: &Gateway) -> Result<(), DatabaseError> {
    for statement in SCHEMA {
        gateway.execute(statement, [])?;
    }
    Ok(())
}
