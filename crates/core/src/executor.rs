use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::SortError;
use crate::fs::FileSystem;
use crate::model::{BackupRecord, GroupOutcome, GroupStatus, RenameEntry, RenamePlan};

#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub overwrite: bool,
    pub dry_run: bool,
    /// `None` disables backups.
    pub backup_dir: Option<&'a Path>,
    /// Sources of groups in this directory that have not been renamed yet.
    /// They are never treated as overwritable destinations.
    pub pending_sources: &'a HashSet<PathBuf>,
    /// Moves and backups earlier groups of a dry run would have made.
    pub preview: Option<&'a PreviewState>,
}

/// The directory as a dry run sees it after the groups previewed so far.
#[derive(Debug, Clone, Default)]
pub struct PreviewState {
    vacated: HashSet<PathBuf>,
    occupied: HashSet<PathBuf>,
}

impl PreviewState {
    pub fn exists<F: FileSystem + ?Sized>(&self, fs: &F, path: &Path) -> bool {
        self.occupied.contains(path) || (!self.vacated.contains(path) && fs.exists(path))
    }

    /// Applies a previewed group as if it had been renamed.
    pub fn record(&mut self, outcome: &GroupOutcome) {
        if outcome.status != GroupStatus::Previewed {
            return;
        }
        for entry in &outcome.entries {
            if entry.source == entry.destination {
                continue;
            }
            self.occupied.remove(&entry.source);
            self.vacated.insert(entry.source.clone());
            self.vacated.remove(&entry.destination);
            self.occupied.insert(entry.destination.clone());
        }
        for backup in &outcome.backups {
            self.occupied.insert(backup.backup_path.clone());
        }
    }
}

fn exists<F: FileSystem + ?Sized>(fs: &F, ctx: &ExecutionContext<'_>, path: &Path) -> bool {
    match ctx.preview {
        Some(preview) => preview.exists(fs, path),
        None => fs.exists(path),
    }
}

/// Applies one group's plan. The group ends up fully renamed or untouched;
/// errors are reported in the outcome and never abort the caller.
pub fn execute_plan<F: FileSystem + ?Sized>(
    fs: &F,
    plan: &RenamePlan,
    ctx: &ExecutionContext<'_>,
) -> GroupOutcome {
    let mut outcome = GroupOutcome {
        stem: plan.group_stem.clone(),
        index: plan.index,
        status: GroupStatus::Failed,
        entries: plan.entries.clone(),
        backups: Vec::new(),
        error: None,
    };

    if let Err(err) = check_collisions(fs, &plan.entries, ctx) {
        warn!("skipped {}: {}", plan.group_stem, err);
        outcome.status = GroupStatus::Skipped;
        outcome.error = Some(err.to_string());
        return outcome;
    }

    if ctx.dry_run {
        if let Some(backup_dir) = ctx.backup_dir {
            outcome.backups = preview_backups(fs, &plan.entries, backup_dir, ctx);
        }
        for entry in &plan.entries {
            debug!(
                "dry run: would rename {} -> {}",
                entry.source.display(),
                entry.destination.display()
            );
        }
        outcome.status = GroupStatus::Previewed;
        return outcome;
    }

    if let Some(backup_dir) = ctx.backup_dir {
        match back_up_group(fs, &plan.entries, backup_dir, ctx) {
            Ok(records) => outcome.backups = records,
            Err(err) => {
                warn!("failed {}: {}", plan.group_stem, err);
                outcome.error = Some(err.to_string());
                return outcome;
            }
        }
    }

    match rename_group(fs, &plan.entries, ctx.overwrite) {
        Ok(()) => {
            info!(
                "renamed {} -> index {} ({} file(s))",
                plan.group_stem,
                plan.index,
                plan.entries.len()
            );
            outcome.status = GroupStatus::Renamed;
        }
        Err(err) => {
            warn!("failed {}: {}", plan.group_stem, err);
            outcome.error = Some(err.to_string());
        }
    }
    outcome
}

fn check_collisions<F: FileSystem + ?Sized>(
    fs: &F,
    entries: &[RenameEntry],
    ctx: &ExecutionContext<'_>,
) -> Result<(), SortError> {
    for entry in entries {
        if entry.source == entry.destination {
            continue;
        }
        let blocks_pending = ctx.pending_sources.contains(&entry.destination);
        if blocks_pending || (!ctx.overwrite && exists(fs, ctx, &entry.destination)) {
            return Err(SortError::DestinationCollision {
                destination: entry.destination.clone(),
            });
        }
    }
    Ok(())
}

/// Files the backup step copies: every source, plus every destination that
/// is about to be overwritten.
fn backup_targets<F: FileSystem + ?Sized>(
    fs: &F,
    entries: &[RenameEntry],
    ctx: &ExecutionContext<'_>,
) -> Vec<PathBuf> {
    let mut targets = Vec::new();
    for entry in entries {
        targets.push(entry.source.clone());
        if ctx.overwrite
            && entry.source != entry.destination
            && exists(fs, ctx, &entry.destination)
        {
            targets.push(entry.destination.clone());
        }
    }
    targets
}

fn preview_backups<F: FileSystem + ?Sized>(
    fs: &F,
    entries: &[RenameEntry],
    backup_dir: &Path,
    ctx: &ExecutionContext<'_>,
) -> Vec<BackupRecord> {
    let mut reserved = HashSet::new();
    backup_targets(fs, entries, ctx)
        .into_iter()
        .map(|source| {
            let backup_path = backup_path_for(fs, ctx, backup_dir, &source, &mut reserved);
            debug!(
                "dry run: would back up {} -> {}",
                source.display(),
                backup_path.display()
            );
            BackupRecord {
                source,
                backup_path,
                digest: None,
            }
        })
        .collect()
}

fn back_up_group<F: FileSystem + ?Sized>(
    fs: &F,
    entries: &[RenameEntry],
    backup_dir: &Path,
    ctx: &ExecutionContext<'_>,
) -> Result<Vec<BackupRecord>, SortError> {
    let failure = |source: &Path, reason: String| SortError::BackupWriteFailure {
        source_path: source.to_path_buf(),
        reason,
    };

    fs.create_dir_all(backup_dir)
        .map_err(|err| failure(backup_dir, err.to_string()))?;

    let mut reserved = HashSet::new();
    let mut records = Vec::new();
    for source in backup_targets(fs, entries, ctx) {
        let backup_path = backup_path_for(fs, ctx, backup_dir, &source, &mut reserved);
        fs.copy(&source, &backup_path)
            .map_err(|err| failure(&source, err.to_string()))?;

        let expected = fs
            .digest(&source)
            .map_err(|err| failure(&source, err.to_string()))?;
        let actual = fs
            .digest(&backup_path)
            .map_err(|err| failure(&source, err.to_string()))?;
        if expected != actual {
            return Err(failure(
                &source,
                format!("backup {} does not match source", backup_path.display()),
            ));
        }

        debug!("backed up {} -> {}", source.display(), backup_path.display());
        records.push(BackupRecord {
            source,
            backup_path,
            digest: Some(actual),
        });
    }
    Ok(records)
}

/// Original file name inside `backup_dir`, or `<stem>.bak<k>.<ext>` when that
/// name is already taken. Existing backups are never overwritten.
fn backup_path_for<F: FileSystem + ?Sized>(
    fs: &F,
    ctx: &ExecutionContext<'_>,
    backup_dir: &Path,
    source: &Path,
    reserved: &mut HashSet<PathBuf>,
) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let candidate = backup_dir.join(&file_name);
    if !exists(fs, ctx, &candidate) && reserved.insert(candidate.clone()) {
        return candidate;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem.to_string(), format!(".{extension}")),
        _ => (file_name.clone(), String::new()),
    };
    let mut k = 1;
    loop {
        let candidate = backup_dir.join(format!("{stem}.bak{k}{extension}"));
        if !exists(fs, ctx, &candidate) && reserved.insert(candidate.clone()) {
            return candidate;
        }
        k += 1;
    }
}

/// A completed step of a group rename, undone in reverse on failure.
enum Step<'a> {
    Moved(&'a RenameEntry),
    /// An existing destination moved aside so the rename can take its place.
    Parked { original: PathBuf, parked: PathBuf },
}

fn rename_group<F: FileSystem + ?Sized>(
    fs: &F,
    entries: &[RenameEntry],
    overwrite: bool,
) -> Result<(), SortError> {
    let mut steps: Vec<Step<'_>> = Vec::new();

    for entry in entries {
        if entry.source == entry.destination {
            continue;
        }
        if let Err(err) = move_entry(fs, entry, overwrite, &mut steps) {
            roll_back(fs, &steps);
            return Err(err);
        }
        debug!(
            "renamed {} -> {}",
            entry.source.display(),
            entry.destination.display()
        );
        steps.push(Step::Moved(entry));
    }

    for step in &steps {
        if let Step::Parked { original, parked } = step {
            match fs.remove_file(parked) {
                Ok(()) => debug!("replaced {}", original.display()),
                Err(err) => warn!(
                    "replaced {} but could not remove {}: {}",
                    original.display(),
                    parked.display(),
                    err
                ),
            }
        }
    }
    Ok(())
}

fn move_entry<'a, F: FileSystem + ?Sized>(
    fs: &F,
    entry: &'a RenameEntry,
    overwrite: bool,
    steps: &mut Vec<Step<'a>>,
) -> Result<(), SortError> {
    let failure = |reason: String| SortError::RenameIoFailure {
        source_path: entry.source.clone(),
        destination: entry.destination.clone(),
        reason,
    };

    if overwrite && fs.exists(&entry.destination) {
        let parked = parked_path_for(fs, &entry.destination);
        fs.rename(&entry.destination, &parked)
            .map_err(|err| failure(format!("cannot move existing target aside: {err}")))?;
        steps.push(Step::Parked {
            original: entry.destination.clone(),
            parked,
        });
    }
    fs.rename(&entry.source, &entry.destination)
        .map_err(|err| failure(err.to_string()))
}

/// Hidden sibling name for a destination that is about to be replaced.
fn parked_path_for<F: FileSystem + ?Sized>(fs: &F, destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut candidate = destination.with_file_name(format!(".{file_name}.replaced"));
    let mut k = 2;
    while fs.exists(&candidate) {
        candidate = destination.with_file_name(format!(".{file_name}.replaced{k}"));
        k += 1;
    }
    candidate
}

fn roll_back<F: FileSystem + ?Sized>(fs: &F, steps: &[Step<'_>]) {
    for step in steps.iter().rev() {
        let (from, to) = match step {
            Step::Moved(entry) => (&entry.destination, &entry.source),
            Step::Parked { original, parked } => (parked, original),
        };
        match fs.rename(from, to) {
            Ok(()) => debug!("rolled back {} -> {}", from.display(), to.display()),
            Err(err) => warn!(
                "rollback of {} -> {} failed: {}",
                from.display(),
                to.display(),
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    use super::{execute_plan, ExecutionContext, PreviewState};
    use crate::fs::{FileSystem, MemoryFs};
    use crate::model::{FileRole, GroupStatus, RenameEntry, RenamePlan};

    fn plan() -> RenamePlan {
        RenamePlan {
            group_stem: "abc".to_string(),
            index: 5,
            entries: vec![
                entry("abc.png", "5.png", FileRole::Image),
                entry("abc.txt", "5_prompt.txt", FileRole::Prompt),
                entry("abc_negative.txt", "5_negative_prompt.txt", FileRole::NegativePrompt),
            ],
        }
    }

    fn entry(source: &str, destination: &str, role: FileRole) -> RenameEntry {
        RenameEntry {
            source: Path::new("/d").join(source),
            destination: Path::new("/d").join(destination),
            role,
        }
    }

    fn group_fs() -> MemoryFs {
        MemoryFs::with_files([
            ("/d/abc.png", b"image".to_vec()),
            ("/d/abc.txt", b"prompt".to_vec()),
            ("/d/abc_negative.txt", b"negative".to_vec()),
        ])
    }

    fn context<'a>(
        pending: &'a HashSet<PathBuf>,
        backup_dir: Option<&'a Path>,
    ) -> ExecutionContext<'a> {
        ExecutionContext {
            overwrite: false,
            dry_run: false,
            backup_dir,
            pending_sources: pending,
            preview: None,
        }
    }

    #[test]
    fn renames_group_and_backs_up_first() {
        let fs = group_fs();
        let pending = HashSet::new();
        let outcome = execute_plan(&fs, &plan(), &context(&pending, Some(Path::new("/d/backup"))));

        assert_eq!(outcome.status, GroupStatus::Renamed);
        assert_eq!(fs.read(Path::new("/d/5.png")), Some(b"image".to_vec()));
        assert_eq!(
            fs.read(Path::new("/d/5_negative_prompt.txt")),
            Some(b"negative".to_vec())
        );
        assert_eq!(fs.read(Path::new("/d/backup/abc.png")), Some(b"image".to_vec()));
        assert_eq!(outcome.backups.len(), 3);
        assert!(outcome.backups.iter().all(|record| record.digest.is_some()));
        assert!(!fs.exists(Path::new("/d/abc.png")));
    }

    #[test]
    fn collision_skips_whole_group_without_mutation() {
        let fs = group_fs();
        let pending = HashSet::new();
        fs.copy(Path::new("/d/abc.txt"), Path::new("/d/5_prompt.txt"))
            .expect("seed collision");
        let before = fs.file_paths();

        let outcome = execute_plan(&fs, &plan(), &context(&pending, Some(Path::new("/d/backup"))));

        assert_eq!(outcome.status, GroupStatus::Skipped);
        assert!(outcome.error.unwrap_or_default().contains("5_prompt.txt"));
        assert_eq!(fs.file_paths(), before);
    }

    #[test]
    fn overwrite_backs_up_replaced_destination() {
        let fs = group_fs();
        fs.copy(Path::new("/d/abc.txt"), Path::new("/d/5.png"))
            .expect("seed existing");
        let pending = HashSet::new();
        let ctx = ExecutionContext {
            overwrite: true,
            ..context(&pending, Some(Path::new("/d/backup")))
        };

        let outcome = execute_plan(&fs, &plan(), &ctx);

        assert_eq!(outcome.status, GroupStatus::Renamed);
        assert_eq!(fs.read(Path::new("/d/5.png")), Some(b"image".to_vec()));
        assert_eq!(fs.read(Path::new("/d/backup/5.png")), Some(b"prompt".to_vec()));
        assert_eq!(outcome.backups.len(), 4);
    }

    #[test]
    fn pending_source_is_never_overwritten() {
        let fs = group_fs();
        let mut pending = HashSet::new();
        pending.insert(PathBuf::from("/d/5_prompt.txt"));
        let ctx = ExecutionContext {
            overwrite: true,
            ..context(&pending, None)
        };

        let outcome = execute_plan(&fs, &plan(), &ctx);
        assert_eq!(outcome.status, GroupStatus::Skipped);
    }

    #[test]
    fn backup_failure_leaves_sources_in_place() {
        let fs = group_fs();
        fs.fail_copy_from("/d/abc.txt");
        let pending = HashSet::new();

        let outcome = execute_plan(&fs, &plan(), &context(&pending, Some(Path::new("/d/backup"))));

        assert_eq!(outcome.status, GroupStatus::Failed);
        assert!(fs.exists(Path::new("/d/abc.png")));
        assert!(fs.exists(Path::new("/d/abc.txt")));
        assert!(!fs.exists(Path::new("/d/5.png")));
    }

    #[test]
    fn image_failure_does_not_touch_sidecars() {
        let fs = group_fs();
        fs.fail_rename_to("/d/5.png");
        let pending = HashSet::new();

        let outcome = execute_plan(&fs, &plan(), &context(&pending, None));

        assert_eq!(outcome.status, GroupStatus::Failed);
        assert!(fs.exists(Path::new("/d/abc.txt")));
        assert!(!fs.exists(Path::new("/d/5_prompt.txt")));
    }

    #[test]
    fn sidecar_failure_rolls_back_group() {
        let fs = group_fs();
        fs.fail_rename_to("/d/5_negative_prompt.txt");
        let pending = HashSet::new();

        let outcome = execute_plan(&fs, &plan(), &context(&pending, None));

        assert_eq!(outcome.status, GroupStatus::Failed);
        assert_eq!(fs.read(Path::new("/d/abc.png")), Some(b"image".to_vec()));
        assert_eq!(fs.read(Path::new("/d/abc.txt")), Some(b"prompt".to_vec()));
        assert!(!fs.exists(Path::new("/d/5.png")));
        assert!(!fs.exists(Path::new("/d/5_prompt.txt")));
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let fs = group_fs();
        let pending = HashSet::new();
        let before = fs.file_paths();
        let ctx = ExecutionContext {
            dry_run: true,
            ..context(&pending, Some(Path::new("/d/backup")))
        };

        let outcome = execute_plan(&fs, &plan(), &ctx);

        assert_eq!(outcome.status, GroupStatus::Previewed);
        assert_eq!(outcome.backups.len(), 3);
        assert_eq!(fs.file_paths(), before);
        assert!(!fs.exists(Path::new("/d/backup")));
    }

    #[test]
    fn existing_backup_names_get_a_counter() {
        let fs = group_fs();
        fs.create_dir_all(Path::new("/d/backup")).expect("mkdir");
        fs.copy(Path::new("/d/abc.png"), Path::new("/d/backup/abc.png"))
            .expect("old backup");
        let pending = HashSet::new();

        let outcome = execute_plan(&fs, &plan(), &context(&pending, Some(Path::new("/d/backup"))));

        assert_eq!(outcome.status, GroupStatus::Renamed);
        assert_eq!(
            outcome.backups[0].backup_path,
            PathBuf::from("/d/backup/abc.bak1.png")
        );
    }

    #[test]
    fn failed_overwrite_restores_replaced_destination() {
        let fs = group_fs();
        fs.copy(Path::new("/d/abc.png"), Path::new("/d/5_prompt.txt"))
            .expect("seed existing");
        fs.fail_rename_to("/d/5_negative_prompt.txt");
        let before = fs.file_paths();
        let pending = HashSet::new();
        let ctx = ExecutionContext {
            overwrite: true,
            ..context(&pending, None)
        };

        let outcome = execute_plan(&fs, &plan(), &ctx);

        assert_eq!(outcome.status, GroupStatus::Failed);
        assert_eq!(fs.file_paths(), before);
        assert_eq!(fs.read(Path::new("/d/5_prompt.txt")), Some(b"image".to_vec()));
        assert_eq!(fs.read(Path::new("/d/abc.txt")), Some(b"prompt".to_vec()));
    }

    #[test]
    fn overwrite_leaves_no_parked_files_behind() {
        let fs = group_fs();
        fs.copy(Path::new("/d/abc.png"), Path::new("/d/5_prompt.txt"))
            .expect("seed existing");
        let pending = HashSet::new();
        let ctx = ExecutionContext {
            overwrite: true,
            ..context(&pending, None)
        };

        let outcome = execute_plan(&fs, &plan(), &ctx);

        assert_eq!(outcome.status, GroupStatus::Renamed);
        assert_eq!(fs.read(Path::new("/d/5_prompt.txt")), Some(b"prompt".to_vec()));
        assert_eq!(
            fs.file_paths(),
            vec![
                PathBuf::from("/d/5.png"),
                PathBuf::from("/d/5_negative_prompt.txt"),
                PathBuf::from("/d/5_prompt.txt"),
            ]
        );
    }

    #[test]
    fn preview_state_sees_earlier_previewed_moves() {
        let fs = MemoryFs::with_files([
            ("/d/abc.png", b"image".to_vec()),
            ("/d/abc.txt", b"prompt".to_vec()),
            ("/d/5.png", b"old".to_vec()),
        ]);
        let pending = HashSet::new();
        let mut preview = PreviewState::default();
        let first = RenamePlan {
            group_stem: "old".to_string(),
            index: 6,
            entries: vec![entry("5.png", "6.png", FileRole::Image)],
        };

        let outcome = execute_plan(
            &fs,
            &first,
            &ExecutionContext {
                dry_run: true,
                preview: Some(&preview),
                ..context(&pending, Some(Path::new("/d/backup")))
            },
        );
        assert_eq!(outcome.status, GroupStatus::Previewed);
        preview.record(&outcome);
        assert!(!preview.exists(&fs, Path::new("/d/5.png")));
        assert!(preview.exists(&fs, Path::new("/d/6.png")));
        assert!(preview.exists(&fs, Path::new("/d/backup/5.png")));

        let second = execute_plan(
            &fs,
            &plan(),
            &ExecutionContext {
                dry_run: true,
                preview: Some(&preview),
                ..context(&pending, Some(Path::new("/d/backup")))
            },
        );
        assert_eq!(second.status, GroupStatus::Previewed);
        assert_eq!(fs.read(Path::new("/d/5.png")), Some(b"old".to_vec()));
    }
}
