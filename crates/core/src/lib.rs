pub mod allocator;
pub mod clean;
pub mod config;
pub mod error;
pub mod executor;
pub mod fs;
pub mod model;
pub mod naming;
pub mod pairing;
pub mod planner;
pub mod sort;
pub mod walk;

pub use allocator::IndexAllocator;
pub use clean::{clean_backups, find_backup_dirs, CleanOptions, CleanReport};
pub use config::{load_config, SortConfig};
pub use error::SortError;
pub use executor::{execute_plan, ExecutionContext, PreviewState};
pub use fs::{FileSystem, LocalFs, MemoryFs};
pub use model::{
    BackupRecord, DirectoryReport, FileEntry, FileKind, FileRole, GroupOutcome, GroupStatus,
    HashGroup, NumberedSet, PairedSidecar, RenameEntry, RenamePlan, RunReport, RunTotals,
    REPORT_VERSION,
};
pub use naming::{Classifier, NamingTemplate, DEFAULT_IMAGE_EXTENSIONS};
pub use pairing::{pair_sidecars, Pairing};
pub use planner::{plan_directory, DirectoryPlan};
pub use sort::{
    run_sort, run_sort_with_callback, sort_directory, validate_sort_options, BackupMode,
    SortOptions,
};
