//! Directory archiving ahead of a transfer
//!
//! The protocol treats the archive as an opaque blob: the client archives a
//! directory into a single file, then sends that file like any other.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

/// What a finished archive looks like on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Files, directories and links stored (the root directory itself excluded)
    pub entries: u64,
    pub bytes: u64,
}

/// Turns a directory into one transferable archive file.
pub trait ArchiveBuilder {
    fn build(&self, source_dir: &Path, output: &Path) -> Result<ArchiveSummary>;
}

/// Tar archives with paths relative to the archived directory.
#[derive(Debug, Clone, Default)]
pub struct TarArchiveBuilder {
    /// Store symlink targets instead of the links themselves
    pub follow_symlinks: bool,
}

impl ArchiveBuilder for TarArchiveBuilder {
    fn build(&self, source_dir: &Path, output: &Path) -> Result<ArchiveSummary> {
        if !source_dir.is_dir() {
            bail!("not a directory: {}", source_dir.display());
        }
        let file = File::create(output)
            .with_context(|| format!("create archive {}", output.display()))?;
        // the archive may live inside the directory being archived
        let skip = output.canonicalize().ok();

        let mut builder = Builder::new(BufWriter::new(file));
        builder.follow_symlinks(self.follow_symlinks);

        let mut entries = 0u64;
        for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if skip.is_some() && path.canonicalize().ok() == skip {
                continue;
            }
            let rel = path.strip_prefix(source_dir)?;
            if entry.file_type().is_dir() {
                builder
                    .append_dir(rel, path)
                    .with_context(|| format!("archive dir {}", path.display()))?;
            } else {
                builder
                    .append_path_with_name(path, rel)
                    .with_context(|| format!("archive {}", path.display()))?;
            }
            entries += 1;
        }

        let mut writer = builder.into_inner()?;
        writer.flush()?;
        drop(writer);

        Ok(ArchiveSummary {
            path: output.to_path_buf(),
            entries,
            bytes: fs::metadata(output)?.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::Archive;

    fn listing(archive: &Path) -> Vec<String> {
        let mut ar = Archive::new(File::open(archive).unwrap());
        let mut names: Vec<String> = ar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn archives_nested_directory() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("album/2024")).unwrap();
        fs::write(src.path().join("readme"), b"hi").unwrap();
        fs::write(src.path().join("album/2024/a.jpg"), vec![7u8; 4096]).unwrap();

        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("photos-backup");
        let summary = TarArchiveBuilder::default().build(src.path(), &target).unwrap();

        assert_eq!(summary.path, target);
        assert_eq!(summary.entries, 4);
        assert!(summary.bytes > 4096);
        assert_eq!(
            listing(&target),
            vec!["album", "album/2024", "album/2024/a.jpg", "readme"]
        );
    }

    #[test]
    fn archive_inside_source_skips_itself() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"a").unwrap();
        let target = src.path().join("self");
        let summary = TarArchiveBuilder::default().build(src.path(), &target).unwrap();
        assert_eq!(summary.entries, 1);
        assert_eq!(listing(&target), vec!["a.txt"]);
    }

    #[test]
    fn refuses_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.txt");
        fs::write(&file, b"x").unwrap();
        let err = TarArchiveBuilder::default()
            .build(&file, &dir.path().join("out"))
            .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
