use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::SortError;

pub const BACKUP_DIR_NAME: &str = "backup";

/// Directories the recursive walk leaves out. A pattern matches either the
/// path relative to the processing root (`set/raw_*`) or the directory's own
/// name (`raw_*`).
#[derive(Debug, Clone)]
pub struct DirectoryExcludes {
    globs: GlobSet,
}

impl DirectoryExcludes {
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns.iter().map(|pattern| pattern.trim()) {
            if !pattern.is_empty() {
                builder.add(Glob::new(pattern)?);
            }
        }
        Ok(Self {
            globs: builder.build()?,
        })
    }

    pub fn is_excluded(&self, root: &Path, directory: &Path) -> bool {
        if self.globs.is_empty() {
            return false;
        }
        let relative = directory.strip_prefix(root).unwrap_or(directory);
        self.globs.is_match(relative)
            || directory
                .file_name()
                .is_some_and(|name| self.globs.is_match(Path::new(name)))
    }
}

pub fn is_backup_dir(path: &Path, backup_root: Option<&Path>) -> bool {
    if path.file_name().is_some_and(|name| name == BACKUP_DIR_NAME) {
        return true;
    }
    backup_root.is_some_and(|root| path.starts_with(root))
}

/// Directories to process under `root`, in walk order. Backup folders and
/// excluded paths are pruned together with everything below them. Entries
/// the walk cannot read are reported and skipped.
pub fn collect_directories(
    root: &Path,
    recursive: bool,
    backup_root: Option<&Path>,
    excludes: &DirectoryExcludes,
    warnings: &mut Vec<String>,
) -> Vec<PathBuf> {
    if !recursive {
        return vec![root.to_path_buf()];
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if !entry.file_type().is_dir() {
                return false;
            }
            !is_backup_dir(entry.path(), backup_root) && !excludes.is_excluded(root, entry.path())
        });

    let mut directories = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_dir() {
                    directories.push(entry.into_path());
                }
            }
            Err(err) => {
                let directory = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                warnings.push(
                    SortError::DirectoryUnreadable {
                        directory,
                        reason: err.to_string(),
                    }
                    .to_string(),
                );
            }
        }
    }
    directories
}
