use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub stem: String,
    /// Lower-cased extension without the leading dot; empty when absent.
    pub extension: String,
    pub kind: FileKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum FileKind {
    Numbered(u64),
    Candidate,
    Sidecar,
    Ignored,
}

pub type NumberedSet = BTreeSet<u64>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "role", content = "suffix")]
pub enum FileRole {
    Image,
    Prompt,
    NegativePrompt,
    SuffixPrompt(String),
}

impl FileRole {
    /// Destination file name for a sidecar with this role at `index`.
    /// Images are named by the naming template instead.
    pub fn sidecar_file_name(&self, index: u64) -> Option<String> {
        match self {
            FileRole::Image => None,
            FileRole::Prompt => Some(format!("{index}_prompt.txt")),
            FileRole::NegativePrompt => Some(format!("{index}_negative_prompt.txt")),
            FileRole::SuffixPrompt(suffix) => Some(format!("{index}_{suffix}_prompt.txt")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairedSidecar {
    pub entry: FileEntry,
    pub role: FileRole,
}

/// One candidate image and the sidecars that share its stem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashGroup {
    pub stem: String,
    pub image: FileEntry,
    pub sidecars: Vec<PairedSidecar>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub role: FileRole,
}

/// Renames for a single group. The image entry is always first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenamePlan {
    pub group_stem: String,
    pub index: u64,
    pub entries: Vec<RenameEntry>,
}

impl RenamePlan {
    pub fn image(&self) -> Option<&RenameEntry> {
        self.entries.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub source: PathBuf,
    pub backup_path: PathBuf,
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Renamed,
    Previewed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupOutcome {
    pub stem: String,
    pub index: u64,
    pub status: GroupStatus,
    pub entries: Vec<RenameEntry>,
    #[serde(default)]
    pub backups: Vec<BackupRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub renamed: u64,
    pub previewed: u64,
    pub skipped: u64,
    pub failed: u64,
    #[serde(default)]
    pub orphans: Vec<PathBuf>,
    #[serde(default)]
    pub ignored: u64,
    #[serde(default)]
    pub groups: Vec<GroupOutcome>,
}

impl DirectoryReport {
    pub fn record(&mut self, outcome: GroupOutcome) {
        match outcome.status {
            GroupStatus::Renamed => self.renamed += 1,
            GroupStatus::Previewed => self.previewed += 1,
            GroupStatus::Skipped => self.skipped += 1,
            GroupStatus::Failed => self.failed += 1,
        }
        self.groups.push(outcome);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunTotals {
    pub directories: u64,
    pub renamed: u64,
    pub previewed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub orphans: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub report_version: String,
    pub run_id: String,
    pub generated_at: String,
    pub root: PathBuf,
    pub dry_run: bool,
    pub directories: Vec<DirectoryReport>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub totals: RunTotals,
}

impl RunReport {
    pub fn tally(directories: &[DirectoryReport]) -> RunTotals {
        directories
            .iter()
            .fold(RunTotals::default(), |mut totals, directory| {
                totals.directories += 1;
                totals.renamed += directory.renamed;
                totals.previewed += directory.previewed;
                totals.skipped += directory.skipped;
                totals.failed += directory.failed;
                totals.orphans += directory.orphans.len() as u64;
                totals
            })
    }
}
