use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SortError;
use crate::executor::{execute_plan, ExecutionContext, PreviewState};
use crate::fs::{FileSystem, LocalFs};
use crate::model::{DirectoryReport, GroupStatus, RunReport, REPORT_VERSION};
use crate::naming::{normalize_extension, Classifier, NamingTemplate, DEFAULT_IMAGE_EXTENSIONS};
use crate::planner::plan_directory;
use crate::walk::{collect_directories, DirectoryExcludes, BACKUP_DIR_NAME};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackupMode {
    Disabled,
    /// `<directory>/backup` next to the files being renamed.
    #[default]
    Local,
    /// `<root>/<directory relative to the processing root>`.
    Root(PathBuf),
}

impl BackupMode {
    pub fn backup_dir_for(&self, processing_root: &Path, directory: &Path) -> Option<PathBuf> {
        match self {
            BackupMode::Disabled => None,
            BackupMode::Local => Some(directory.join(BACKUP_DIR_NAME)),
            BackupMode::Root(root) => {
                let relative = directory.strip_prefix(processing_root).unwrap_or(Path::new(""));
                Some(root.join(relative))
            }
        }
    }

    pub(crate) fn root(&self) -> Option<&Path> {
        match self {
            BackupMode::Root(root) => Some(root.as_path()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortOptions {
    pub root: PathBuf,
    pub recursive: bool,
    pub overwrite: bool,
    pub dry_run: bool,
    pub backup: BackupMode,
    pub naming_template: String,
    pub extensions: Vec<String>,
    /// Globs for directories the recursive walk skips.
    pub excludes: Vec<String>,
    /// Seeds `{random}` tokens so repeated dry runs plan identical names.
    pub seed: Option<u64>,
    pub progress: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            recursive: false,
            overwrite: false,
            dry_run: false,
            backup: BackupMode::Local,
            naming_template: NamingTemplate::INDEX.to_string(),
            extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            excludes: Vec::new(),
            seed: None,
            progress: false,
        }
    }
}

pub fn validate_sort_options(options: &SortOptions) -> Result<NamingTemplate> {
    let template = NamingTemplate::parse(&options.naming_template)?;
    if !options
        .extensions
        .iter()
        .any(|ext| normalize_extension(ext).is_some_and(|ext| ext != "txt"))
    {
        return Err(anyhow!("at least one image extension is required"));
    }
    if !options.root.is_dir() {
        return Err(SortError::RootNotFound {
            root: options.root.clone(),
        }
        .into());
    }
    Ok(template)
}

/// Classifies, plans and renames the top-level files of one directory.
pub fn sort_directory<F: FileSystem + ?Sized, R: Rng + ?Sized>(
    fs: &F,
    directory: &Path,
    classifier: &Classifier,
    options: &SortOptions,
    backup_dir: Option<&Path>,
    rng: &mut R,
) -> Result<DirectoryReport, SortError> {
    let files = fs
        .list_files(directory)
        .map_err(|err| SortError::DirectoryUnreadable {
            directory: directory.to_path_buf(),
            reason: err.to_string(),
        })?;

    let plan = plan_directory(directory, &files, classifier, rng);
    let mut report = DirectoryReport {
        directory: directory.to_path_buf(),
        orphans: plan.orphans.iter().map(|entry| entry.path.clone()).collect(),
        ignored: plan.ignored.len() as u64,
        ..DirectoryReport::default()
    };

    let mut pending_sources = plan
        .plans
        .iter()
        .flat_map(|group| group.entries.iter().map(|entry| entry.source.clone()))
        .collect::<HashSet<_>>();

    let mut preview = PreviewState::default();
    let total = plan.plans.len();
    for (position, group) in plan.plans.iter().enumerate() {
        let ctx = ExecutionContext {
            overwrite: options.overwrite,
            dry_run: options.dry_run,
            backup_dir,
            pending_sources: &pending_sources,
            preview: options.dry_run.then_some(&preview),
        };
        let outcome = execute_plan(fs, group, &ctx);

        if matches!(outcome.status, GroupStatus::Renamed | GroupStatus::Previewed) {
            for entry in &group.entries {
                pending_sources.remove(&entry.source);
            }
        }
        preview.record(&outcome);
        if options.progress {
            info!(
                "progress: group {}/{} in {} ({:?})",
                position + 1,
                total,
                directory.display(),
                outcome.status
            );
        }
        report.record(outcome);
    }

    if !report.is_empty() || !report.orphans.is_empty() {
        info!(
            "{}: renamed {}, previewed {}, skipped {}, failed {}, orphans {}",
            directory.display(),
            report.renamed,
            report.previewed,
            report.skipped,
            report.failed,
            report.orphans.len()
        );
    }
    Ok(report)
}

pub fn run_sort(options: &SortOptions) -> Result<RunReport> {
    run_sort_with_callback(options, |_| {})
}

pub fn run_sort_with_callback<F>(options: &SortOptions, mut on_directory: F) -> Result<RunReport>
where
    F: FnMut(&DirectoryReport),
{
    let template = validate_sort_options(options)?;
    let classifier = Classifier::new(template, &options.extensions);
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let excludes =
        DirectoryExcludes::new(&options.excludes).context("invalid exclude pattern")?;
    let mut warnings = Vec::new();
    let directories = collect_directories(
        &options.root,
        options.recursive,
        options.backup.root(),
        &excludes,
        &mut warnings,
    );

    let fs = LocalFs;
    let mut reports = Vec::new();
    for directory in directories {
        let backup_dir = options.backup.backup_dir_for(&options.root, &directory);
        match sort_directory(
            &fs,
            &directory,
            &classifier,
            options,
            backup_dir.as_deref(),
            &mut rng,
        ) {
            Ok(report) => {
                on_directory(&report);
                reports.push(report);
            }
            Err(err) => {
                warn!("{err}");
                warnings.push(err.to_string());
            }
        }
    }

    Ok(RunReport {
        report_version: REPORT_VERSION.to_string(),
        run_id: Uuid::new_v4().to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        root: options.root.clone(),
        dry_run: options.dry_run,
        totals: RunReport::tally(&reports),
        directories: reports,
        warnings,
    })
}
