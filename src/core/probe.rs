use crate::core::RunMode;
use flate2::read::GzDecoder;
use glob::Pattern;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Artifact names only ever carry the first four characters of the scan
/// type's suffix (`.dcm.gz` is stored as `.dcm`).
pub const SUFFIX_LIMIT: usize = 4;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid artifact pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("IO error on {path}: {source}")]
    Io { path: String, source: io::Error },
}

impl ProbeError {
    fn io(path: &Path, source: io::Error) -> Self {
        ProbeError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// What the probe observed for one Image row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// The expected artifact is present and non-empty.
    pub exists: bool,
    pub resolved_path: PathBuf,
    /// Files sharing the artifact's `<image>.` prefix after normalization.
    pub candidate_files: Vec<PathBuf>,
    pub removed_empty: usize,
    pub decompressed: usize,
    /// Files that could not be inspected, removed or decompressed.
    pub io_errors: usize,
}

impl ProbeResult {
    /// Something is on disk for the image, but not under the expected name.
    pub fn has_unexpected_name(&self) -> bool {
        !self.exists && !self.candidate_files.is_empty()
    }
}

/// Resolves artifact paths under the image data root and normalizes what it
/// finds there. In dry-run the disk is never touched; the post-normalization
/// state is computed instead.
pub struct FilesystemProbe {
    root: PathBuf,
    mode: RunMode,
}

impl FilesystemProbe {
    pub fn new(root: impl Into<PathBuf>, mode: RunMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<interview>/<exam>/<image>`, the shared prefix of every file
    /// belonging to the image.
    pub fn artifact_prefix(&self, interview_id: i64, exam_id: i64, image_id: i64) -> PathBuf {
        self.root
            .join(interview_id.to_string())
            .join(exam_id.to_string())
            .join(image_id.to_string())
    }

    pub fn resolve(&self, interview_id: i64, exam_id: i64, image_id: i64, suffix: &str) -> PathBuf {
        let mut path: OsString = self
            .artifact_prefix(interview_id, exam_id, image_id)
            .into_os_string();
        path.push(clamp_suffix(suffix));
        PathBuf::from(path)
    }

    /// Normalize the image's files, then report whether the expected artifact
    /// is there. A missing artifact is a normal outcome, not an error.
    pub fn probe(
        &self,
        interview_id: i64,
        exam_id: i64,
        image_id: i64,
        suffix: &str,
    ) -> Result<ProbeResult, ProbeError> {
        let prefix = self.artifact_prefix(interview_id, exam_id, image_id);
        let resolved_path = self.resolve(interview_id, exam_id, image_id, suffix);

        let found = self.candidates(&prefix)?;
        let mut removed_empty = 0;
        let mut decompressed = 0;
        let mut io_errors = 0;
        let mut planned = Vec::with_capacity(found.len());

        // A failed removal or decompression is logged and the file is left as
        // it is; the re-glob below reports what is really on disk.
        for file in found {
            let len = match fs::metadata(&file) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    log::warn!("{}", ProbeError::io(&file, e));
                    io_errors += 1;
                    continue;
                }
            };
            if len == 0 {
                log::debug!("Removing empty artifact {}", file.display());
                if self.mode.is_live() {
                    if let Err(e) = fs::remove_file(&file) {
                        log::warn!("{}", ProbeError::io(&file, e));
                        io_errors += 1;
                        continue;
                    }
                }
                removed_empty += 1;
            } else if is_gzip(&file) {
                let target = file.with_extension("");
                if is_non_empty(&target) {
                    log::debug!(
                        "Leaving {} compressed, {} already present",
                        file.display(),
                        target.display()
                    );
                    planned.push(file);
                    continue;
                }
                if self.mode.is_live() {
                    if let Err(e) = decompress_in_place(&file, &target) {
                        log::warn!("Cannot decompress {}: {}", file.display(), e);
                        io_errors += 1;
                        planned.push(file);
                        continue;
                    }
                } else {
                    log::debug!("[dry-run] would decompress {}", file.display());
                }
                decompressed += 1;
                planned.push(target);
            } else {
                planned.push(file);
            }
        }

        // Removal and decompression change the matched set.
        let touched = removed_empty + decompressed + io_errors > 0;
        let candidate_files = if self.mode.is_live() && touched {
            self.candidates(&prefix)?
        } else {
            planned.sort();
            planned.dedup();
            planned
        };

        let exists = if self.mode.is_live() {
            is_non_empty(&resolved_path)
        } else {
            candidate_files.contains(&resolved_path)
        };

        Ok(ProbeResult {
            exists,
            resolved_path,
            candidate_files,
            removed_empty,
            decompressed,
            io_errors,
        })
    }

    fn candidates(&self, prefix: &Path) -> Result<Vec<PathBuf>, ProbeError> {
        let pattern = format!("{}.*", Pattern::escape(&prefix.to_string_lossy()));
        let paths = glob::glob(&pattern).map_err(|source| ProbeError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        let mut files: Vec<PathBuf> = paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("Unreadable artifact entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files)
    }
}

/// First [`SUFFIX_LIMIT`] characters of `suffix`.
pub fn clamp_suffix(suffix: &str) -> &str {
    match suffix.char_indices().nth(SUFFIX_LIMIT) {
        Some((index, _)) => &suffix[..index],
        None => suffix,
    }
}

pub fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Replace `source` (a `.gz` file) by its decompressed content at `target`.
/// Content that does not decode as gzip keeps its bytes and only loses the
/// `.gz` extension.
fn decompress_in_place(source: &Path, target: &Path) -> Result<(), ProbeError> {
    let mut partial = target.as_os_str().to_os_string();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    match gunzip(source, &partial) {
        Ok(()) => {
            if let Err(e) = fs::rename(&partial, target) {
                let _ = fs::remove_file(&partial);
                return Err(ProbeError::io(target, e));
            }
            fs::remove_file(source).map_err(|e| ProbeError::io(source, e))?;
            log::info!("Decompressed {}", source.display());
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            log::warn!(
                "{} is not valid gzip ({}), renaming to {}",
                source.display(),
                e,
                target.display()
            );
            fs::rename(source, target).map_err(|e| ProbeError::io(source, e))?;
        }
    }
    Ok(())
}

fn gunzip(source: &Path, destination: &Path) -> io::Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut writer = BufWriter::new(File::create(destination)?);
    io::copy(&mut decoder, &mut writer)?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup(mode: RunMode) -> (TempDir, FilesystemProbe) {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("1").join("2")).unwrap();
        let probe = FilesystemProbe::new(temp_dir.path(), mode);
        (temp_dir, probe)
    }

    fn write_gz(path: &Path, content: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_clamp_suffix() {
        assert_eq!(clamp_suffix(".dcm.gz"), ".dcm");
        assert_eq!(clamp_suffix(".mha"), ".mha");
        assert_eq!(clamp_suffix(""), "");
        assert_eq!(clamp_suffix(".jpeg"), ".jpe");
    }

    #[test]
    fn test_resolve_concatenates_ids_and_suffix() {
        let probe = FilesystemProbe::new("/data", RunMode::DryRun);
        assert_eq!(
            probe.resolve(1, 2, 3, ".dcm.gz"),
            PathBuf::from("/data/1/2/3.dcm")
        );
    }

    #[test]
    fn test_missing_artifact_is_not_an_error() {
        let (_temp_dir, probe) = setup(RunMode::Live);
        let result = probe.probe(1, 2, 3, ".dcm").unwrap();

        assert!(!result.exists);
        assert!(result.candidate_files.is_empty());
        assert!(!result.has_unexpected_name());
    }

    #[test]
    fn test_existing_artifact() {
        let (temp_dir, probe) = setup(RunMode::Live);
        let file = temp_dir.path().join("1/2/3.dcm");
        fs::write(&file, b"DICM").unwrap();

        let result = probe.probe(1, 2, 3, ".dcm.gz").unwrap();
        assert!(result.exists);
        assert_eq!(result.resolved_path, file);
        assert_eq!(result.candidate_files, vec![file]);
    }

    #[test]
    fn test_empty_artifact_is_removed_in_live_mode() {
        let (temp_dir, probe) = setup(RunMode::Live);
        let file = temp_dir.path().join("1/2/3.dcm");
        fs::write(&file, b"").unwrap();

        let result = probe.probe(1, 2, 3, ".dcm").unwrap();
        assert!(!result.exists);
        assert_eq!(result.removed_empty, 1);
        assert!(result.candidate_files.is_empty());
        assert!(!file.exists());
    }

    #[test]
    fn test_empty_artifact_is_kept_in_dry_run() {
        let (temp_dir, probe) = setup(RunMode::DryRun);
        let file = temp_dir.path().join("1/2/3.dcm");
        fs::write(&file, b"").unwrap();

        let result = probe.probe(1, 2, 3, ".dcm").unwrap();
        assert!(!result.exists);
        assert_eq!(result.removed_empty, 1);
        assert!(file.exists());
    }

    #[test]
    fn test_compressed_artifact_is_decompressed() {
        let (temp_dir, probe) = setup(RunMode::Live);
        let gz = temp_dir.path().join("1/2/3.dcm.gz");
        write_gz(&gz, b"DICM payload");

        let result = probe.probe(1, 2, 3, ".dcm.gz").unwrap();
        let plain = temp_dir.path().join("1/2/3.dcm");

        assert!(result.exists);
        assert_eq!(result.decompressed, 1);
        assert!(!gz.exists());
        assert_eq!(fs::read(&plain).unwrap(), b"DICM payload");
        assert_eq!(result.candidate_files, vec![plain]);
    }

    #[test]
    fn test_compressed_artifact_in_dry_run_predicts_plain_file() {
        let (temp_dir, probe) = setup(RunMode::DryRun);
        let gz = temp_dir.path().join("1/2/3.dcm.gz");
        write_gz(&gz, b"DICM payload");

        let result = probe.probe(1, 2, 3, ".dcm.gz").unwrap();
        assert!(result.exists);
        assert_eq!(result.decompressed, 1);
        assert!(gz.exists());
        assert!(!temp_dir.path().join("1/2/3.dcm").exists());
    }

    #[test]
    fn test_corrupt_gzip_is_renamed() {
        let (temp_dir, probe) = setup(RunMode::Live);
        let gz = temp_dir.path().join("1/2/3.dcm.gz");
        fs::write(&gz, b"not gzip at all").unwrap();

        let result = probe.probe(1, 2, 3, ".dcm").unwrap();
        let plain = temp_dir.path().join("1/2/3.dcm");

        assert!(result.exists);
        assert!(!gz.exists());
        assert_eq!(fs::read(&plain).unwrap(), b"not gzip at all");
        assert!(!temp_dir.path().join("1/2/3.dcm.part").exists());
    }

    #[test]
    fn test_failed_decompression_is_contained() {
        let (temp_dir, probe) = setup(RunMode::Live);
        let gz = temp_dir.path().join("1/2/3.dcm.gz");
        write_gz(&gz, b"DICM");
        // The target name is taken by a directory, so the rename fails.
        fs::create_dir(temp_dir.path().join("1/2/3.dcm")).unwrap();

        let result = probe.probe(1, 2, 3, ".dcm").unwrap();

        assert!(!result.exists);
        assert_eq!(result.io_errors, 1);
        assert_eq!(result.decompressed, 0);
        assert_eq!(result.candidate_files, vec![gz.clone()]);
        assert!(result.has_unexpected_name());
        assert!(gz.exists());
        assert!(!temp_dir.path().join("1/2/3.dcm.part").exists());
    }

    #[test]
    fn test_unexpected_name_is_reported() {
        let (temp_dir, probe) = setup(RunMode::Live);
        fs::write(temp_dir.path().join("1/2/3.mha"), b"volume").unwrap();

        let result = probe.probe(1, 2, 3, ".dcm").unwrap();
        assert!(!result.exists);
        assert!(result.has_unexpected_name());
    }

    #[test]
    fn test_prefix_does_not_match_longer_ids() {
        let (temp_dir, probe) = setup(RunMode::Live);
        fs::write(temp_dir.path().join("1/2/30.dcm"), b"other image").unwrap();

        let result = probe.probe(1, 2, 3, ".dcm").unwrap();
        assert!(!result.exists);
        assert!(result.candidate_files.is_empty());
    }

    #[test]
    fn test_second_probe_is_stable() {
        let (temp_dir, probe) = setup(RunMode::Live);
        write_gz(&temp_dir.path().join("1/2/3.dcm.gz"), b"DICM");
        fs::write(temp_dir.path().join("1/2/3.txt"), b"").unwrap();

        let first = probe.probe(1, 2, 3, ".dcm").unwrap();
        assert_eq!((first.removed_empty, first.decompressed), (1, 1));

        let second = probe.probe(1, 2, 3, ".dcm").unwrap();
        assert_eq!((second.removed_empty, second.decompressed), (0, 0));
        assert!(second.exists);
    }
}
