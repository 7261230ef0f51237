mod error;
mod executor;
mod fs_ops;
mod journal;
mod planner;
mod preflight;
mod report;

pub use error::{
    DestinationIssue, RelocationError, SourceIssue, TransactionError, ValidationError,
    WriteFailure,
};
pub use executor::{
    NonRelocatablePathWarning, RelocationExecutor, RelocationOutcome, RelocationState,
};
pub use fs_ops::{backup_path_for, part_path_for, LocalFs, TransactionFs};
pub use journal::{
    append_journal_entry, begin_relocation, clear_active_relocation, current_unix_timestamp,
    default_state_root, ensure_no_active_relocation, last_journal_state, read_active_relocation,
    read_journal_entries, read_relocation_record, resolve_relocation, set_relocation_status,
    write_relocation_record, JournalEntry, RelocationJournal, RelocationRecord,
    RelocationStatus, StateLayout,
};
pub use planner::{
    compute_path_updates, plan_relocation, LocationField, PathUpdate, PathUpdates,
    RelocationRequest,
};
pub use preflight::{
    ensure_launcher_idle, launcher_processes, parse_ps_output, parse_tasklist_csv,
    ProcessLister, SystemProcessLister, LAUNCHER_PROCESS_NAMES,
};
pub use report::{spawn_relocation, NullReporter, RelocationEvent, RelocationTask, Reporter};
