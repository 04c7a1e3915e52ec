//! tar.gz archive helpers for configuration trees.
//!
//! Volume archives are produced inside helper containers by the runtime;
//! these helpers handle the host-side configuration directory.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder};
use tracing::warn;

use crate::error::{BackupError, BackupResult};

/// Archive `src_dir` (recursively, relative paths) into a tar.gz at `dest`.
pub fn create_tar_gz(src_dir: &Path, dest: &Path) -> BackupResult<()> {
    let file = File::create(dest).map_err(|e| BackupError::io(dest, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder
        .append_dir_all(".", src_dir)
        .map_err(|e| BackupError::io(src_dir, e))?;
    let encoder = builder.into_inner().map_err(|e| BackupError::io(dest, e))?;
    encoder.finish().map_err(|e| BackupError::io(dest, e))?;
    Ok(())
}

/// Extract a tar.gz at `src` into `dest_dir`, creating it if needed.
///
/// Entries with parent-directory components are skipped, not an error — an
/// archive must not be able to write outside `dest_dir`.
pub fn extract_tar_gz(src: &Path, dest_dir: &Path) -> BackupResult<()> {
    std::fs::create_dir_all(dest_dir).map_err(|e| BackupError::io(dest_dir, e))?;

    let file = File::open(src).map_err(|e| BackupError::io(src, e))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = Archive::new(decoder);

    for entry in archive.entries().map_err(|e| BackupError::io(src, e))? {
        let mut entry = entry.map_err(|e| BackupError::io(src, e))?;
        let path = entry.path().map_err(|e| BackupError::io(src, e))?;

        if path
            .components()
            .any(|c| c == std::path::Component::ParentDir)
        {
            warn!(path = %path.display(), "skipping archive entry with parent directory");
            continue;
        }

        let full_path = dest_dir.join(&path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
        }
        entry
            .unpack(&full_path)
            .map_err(|e| BackupError::io(&full_path, e))?;
    }
    Ok(())
}

/// Replace the contents of `dest_dir` with the archive at `src`.
pub fn replace_dir_from_tar_gz(src: &Path, dest_dir: &Path) -> BackupResult<()> {
    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir).map_err(|e| BackupError::io(dest_dir, e))?;
    }
    extract_tar_gz(src, dest_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path) {
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("app.conf"), "port = 8080\n").unwrap();
        std::fs::write(dir.join("nested/extra.conf"), "debug = false\n").unwrap();
    }

    #[test]
    fn roundtrip_preserves_tree() {
        let workspace = tempfile::tempdir().unwrap();
        let src = workspace.path().join("src");
        populate(&src);

        let archive = workspace.path().join("config.tar.gz");
        create_tar_gz(&src, &archive).unwrap();

        let dest = workspace.path().join("dest");
        extract_tar_gz(&archive, &dest).unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("app.conf")).unwrap(),
            "port = 8080\n"
        );
        assert_eq!(
            std::fs::read_to_string(dest.join("nested/extra.conf")).unwrap(),
            "debug = false\n"
        );
    }

    #[test]
    fn replace_dir_discards_stale_files() {
        let workspace = tempfile::tempdir().unwrap();
        let src = workspace.path().join("src");
        populate(&src);
        let archive = workspace.path().join("config.tar.gz");
        create_tar_gz(&src, &archive).unwrap();

        let dest = workspace.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("drifted.conf"), "stale").unwrap();

        replace_dir_from_tar_gz(&archive, &dest).unwrap();
        assert!(!dest.join("drifted.conf").exists());
        assert!(dest.join("app.conf").exists());
    }

    #[test]
    fn extract_missing_archive_fails() {
        let workspace = tempfile::tempdir().unwrap();
        let result = extract_tar_gz(
            &workspace.path().join("nope.tar.gz"),
            &workspace.path().join("out"),
        );
        assert!(matches!(result, Err(BackupError::Io { .. })));
    }
}
