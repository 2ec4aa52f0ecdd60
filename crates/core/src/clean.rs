use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::SortError;
use crate::walk::BACKUP_DIR_NAME;

#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    pub dry_run: bool,
    /// Central backup root from a previous `--backup-dir` run, removed as a
    /// whole when present.
    pub backup_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanReport {
    pub dry_run: bool,
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Every `backup` folder under `root`, outermost only.
pub fn find_backup_dirs(root: &Path, warnings: &mut Vec<String>) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_dir() || entry.depth() == 0 {
                    continue;
                }
                if entry.file_name() == BACKUP_DIR_NAME {
                    found.push(entry.into_path());
                    walker.skip_current_dir();
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
    found
}

pub fn clean_backups(root: &Path, options: &CleanOptions) -> Result<CleanReport> {
    if !root.is_dir() {
        return Err(SortError::RootNotFound {
            root: root.to_path_buf(),
        }
        .into());
    }

    let mut report = CleanReport {
        dry_run: options.dry_run,
        ..CleanReport::default()
    };
    let mut targets = find_backup_dirs(root, &mut report.warnings);
    if let Some(backup_dir) = &options.backup_dir {
        if backup_dir.is_dir() && !targets.iter().any(|target| backup_dir.starts_with(target)) {
            targets.push(backup_dir.clone());
        }
    }

    for target in targets {
        if options.dry_run {
            info!("would remove {}", target.display());
        } else if let Err(err) = fs::remove_dir_all(&target)
            .with_context(|| format!("failed to remove {}", target.display()))
        {
            warn!("{err:#}");
            report.warnings.push(format!("{err:#}"));
            continue;
        } else {
            info!("removed {}", target.display());
        }
        report.removed.push(target);
    }
    Ok(report)
}
