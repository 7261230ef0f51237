use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, Write};
use std::path::{self, Path, PathBuf};

use egmove_backup::{
    create_backup, prepare_restore, ArchiveCompression, BackupOutcome, PreparedRestore,
    RestoreExecutor, RestoreOutcome,
};
use egmove_inventory::{load_catalog, Catalog};
use egmove_relocator::{
    compute_path_updates, ensure_launcher_idle, last_journal_state, plan_relocation,
    read_active_relocation, read_relocation_record, spawn_relocation, NonRelocatablePathWarning,
    ProcessLister, RelocationError, RelocationEvent, RelocationExecutor, RelocationJournal,
    RelocationOutcome, RelocationRequest, RelocationState, RelocationStatus, Reporter,
    ValidationError,
};
use tracing::warn;

use crate::config::ResolvedConfig;
use crate::render::{
    display_path, render_relocation_preview_lines, render_restore_preview_lines,
    render_status_line, OutputStyle, RelocationProgress,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub(crate) enum CliCompression {
    Gzip,
    Lz4,
}

impl From<CliCompression> for ArchiveCompression {
    fn from(value: CliCompression) -> Self {
        match value {
            CliCompression::Gzip => Self::Gzip,
            CliCompression::Lz4 => Self::Lz4,
        }
    }
}

pub(crate) fn load_catalog_for(config: &ResolvedConfig, style: OutputStyle) -> Result<Catalog> {
    let paths = config.launcher_paths()?;
    let catalog = load_catalog(&paths)?;
    for skipped in catalog.skipped() {
        eprintln!(
            "{}",
            render_status_line(
                style,
                "warn",
                &format!(
                    "skipped manifest {}: {}",
                    skipped.path.display(),
                    skipped.reason
                )
            )
        );
    }
    Ok(catalog)
}

pub(crate) fn format_list_lines(catalog: &Catalog, with_ids: bool) -> Vec<String> {
    catalog
        .list_applications()
        .iter()
        .map(|label| {
            let manifest = catalog
                .select_application(label)
                .and_then(|app_id| catalog.manifest(app_id));
            match (with_ids, manifest) {
                (true, Some(manifest)) => format!(
                    "{label}\tapp_id={} install={}",
                    manifest.app_id(),
                    manifest.install_location()
                ),
                _ => label.clone(),
            }
        })
        .collect()
}

/// Plans a relocation for a label or application id, then checks that the
/// launcher is not running when a lister is given.
pub(crate) fn plan_for_selector(
    catalog: &Catalog,
    selector: &str,
    destination: &Path,
    lister: Option<&dyn ProcessLister>,
) -> Result<RelocationRequest, ValidationError> {
    let app_id = catalog
        .resolve_selector(selector)
        .ok_or_else(|| ValidationError::NotFound {
            app_id: selector.to_string(),
        })?;
    let request = plan_relocation(catalog, app_id, destination)?;
    if let Some(lister) = lister {
        ensure_launcher_idle(lister)?;
    }
    Ok(request)
}

pub(crate) fn preview_lines(request: &RelocationRequest) -> Vec<String> {
    let updates = compute_path_updates(&request.manifest, &request.source, &request.target);
    render_relocation_preview_lines(request, &updates)
}

pub(crate) fn ensure_confirmation_possible(assume_yes: bool, stdin_is_tty: bool) -> Result<()> {
    if assume_yes || stdin_is_tty {
        return Ok(());
    }
    Err(anyhow!(
        "refusing to continue without confirmation: stdin is not interactive (pass --yes)"
    ))
}

/// Asks before moving; only `y` or `yes` proceeds.
pub(crate) fn confirm_relocation<R: BufRead, W: Write>(
    request: &RelocationRequest,
    reader: &mut R,
    writer: &mut W,
) -> Result<bool> {
    let question = format!(
        "Move {} from {} to {}?",
        request.display_name,
        request.source.display(),
        request.target.display()
    );
    confirm(&question, reader, writer)
}

pub(crate) fn confirm_restore<R: BufRead, W: Write>(
    prepared: &PreparedRestore,
    reader: &mut R,
    writer: &mut W,
) -> Result<bool> {
    let question = format!(
        "Restore {} from {} to {}?",
        prepared.metadata.display_name,
        prepared.archive.display(),
        prepared.target.display()
    );
    confirm(&question, reader, writer)
}

fn confirm<R: BufRead, W: Write>(question: &str, reader: &mut R, writer: &mut W) -> Result<bool> {
    write!(writer, "{question} [y/N] ")?;
    writer.flush()?;

    let mut answer = String::new();
    reader.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

pub(crate) fn relocation_status_for<T>(result: &Result<T, RelocationError>) -> RelocationStatus {
    match result {
        Ok(_) => RelocationStatus::Committed,
        Err(RelocationError::Aborted(_)) => RelocationStatus::Aborted,
        Err(RelocationError::RolledBack(_)) => RelocationStatus::RolledBack,
        Err(RelocationError::ManualRecoveryRequired { .. }) => {
            RelocationStatus::ManualRecoveryRequired
        }
    }
}

/// Runs `request` in the background under a journal record, driving the
/// progress display from its events.
pub(crate) fn run_relocation(
    config: &ResolvedConfig,
    request: RelocationRequest,
    style: OutputStyle,
) -> Result<RelocationOutcome> {
    let mut journal =
        RelocationJournal::start(&config.state, &request.app_id, &request.source, &request.target)?;
    let progress = RelocationProgress::start(style, &format!("relocating {}", request.app_id));

    let task = spawn_relocation(RelocationExecutor::new(), request)?;
    let mut reporter = JournaledProgress {
        progress: &progress,
        journal: &mut journal,
    };
    let result = task.wait_with(|event| match event {
        RelocationEvent::Transition(state) => reporter.transition(*state),
        RelocationEvent::Warning(warning) => reporter.warning(warning),
        RelocationEvent::Finished(_) => {}
    });
    progress.finish();

    finish_journal(journal, relocation_status_for(&result));
    Ok(result?)
}

/// Feeds transactional progress to the display and the journal record.
struct JournaledProgress<'a> {
    progress: &'a RelocationProgress,
    journal: &'a mut RelocationJournal,
}

impl Reporter for JournaledProgress<'_> {
    fn transition(&mut self, state: RelocationState) {
        self.progress.transition(state);
        if let Err(err) = self.journal.record_transition(state) {
            warn!(error = %format!("{err:#}"), "failed to journal relocation state");
        }
    }

    fn warning(&mut self, warning: &NonRelocatablePathWarning) {
        self.progress.warning(warning);
        if let Err(err) = self
            .journal
            .record_warning(warning.field.as_str(), &warning.path)
        {
            warn!(error = %format!("{err:#}"), "failed to journal relocation warning");
        }
    }
}

fn finish_journal(journal: RelocationJournal, status: RelocationStatus) {
    let journal_id = journal.id().to_string();
    if let Err(err) = journal.finish(status) {
        warn!(
            id = %journal_id,
            error = %format!("{err:#}"),
            "failed to record relocation result"
        );
    }
}

fn absolute_archive_path(archive: &Path) -> Result<PathBuf> {
    path::absolute(archive)
        .with_context(|| format!("failed to resolve archive path {}", archive.display()))
}

/// Writes a backup archive for a label or application id.
pub(crate) fn run_backup(
    catalog: &Catalog,
    selector: &str,
    archive: &Path,
    compression: ArchiveCompression,
    style: OutputStyle,
) -> Result<BackupOutcome> {
    let app_id = catalog
        .resolve_selector(selector)
        .ok_or_else(|| ValidationError::NotFound {
            app_id: selector.to_string(),
        })?;
    let archive = absolute_archive_path(archive)?;

    let progress = RelocationProgress::start(style, &format!("backing up {app_id}"));
    let result = create_backup(catalog, app_id, &archive, compression);
    progress.finish();
    Ok(result?)
}

/// Checks that the launcher is idle, then unpacks and checks `archive` next to
/// its restore target inside `destination`.
pub(crate) fn prepare_restore_for(
    config: &ResolvedConfig,
    archive: &Path,
    destination: &Path,
    lister: Option<&dyn ProcessLister>,
) -> Result<PreparedRestore> {
    let paths = config.launcher_paths()?;
    if let Some(lister) = lister {
        ensure_launcher_idle(lister)?;
    }
    let archive = absolute_archive_path(archive)?;
    Ok(prepare_restore(&archive, destination, &paths)?)
}

pub(crate) fn restore_preview_lines(prepared: &PreparedRestore) -> Vec<String> {
    render_restore_preview_lines(prepared)
}

/// Puts a prepared restore in place under a journal record. The record's
/// source is the archive, its target the new install directory.
pub(crate) fn run_restore(
    config: &ResolvedConfig,
    prepared: PreparedRestore,
    style: OutputStyle,
) -> Result<RestoreOutcome> {
    let mut journal = RelocationJournal::start(
        &config.state,
        prepared.app_id(),
        &prepared.archive,
        &prepared.target,
    )?;
    let progress = RelocationProgress::start(style, &format!("restoring {}", prepared.app_id()));

    let mut reporter = JournaledProgress {
        progress: &progress,
        journal: &mut journal,
    };
    let result = RestoreExecutor::new().execute(prepared, &mut reporter);
    progress.finish();

    finish_journal(journal, relocation_status_for(&result));
    Ok(result?)
}

pub(crate) fn format_status_lines(config: &ResolvedConfig) -> Result<Vec<String>> {
    let mut lines = vec![
        format!("registry={}", display_path(config.registry_path.as_deref())),
        format!("manifests_dir={}", display_path(config.manifests_dir.as_deref())),
        format!("state_dir={}", config.state.root().display()),
        format!("launcher_check={}", config.launcher_check),
    ];

    let Some(id) = read_active_relocation(&config.state)? else {
        lines.push("active_relocation=none".to_string());
        return Ok(lines);
    };
    match read_relocation_record(&config.state, &id)? {
        Some(record) => lines.push(format!(
            "active_relocation id={} app_id={} status={} last_state={} source={} target={}",
            record.id,
            record.app_id,
            record.status,
            last_journal_state(&config.state, &record.id).as_deref().unwrap_or("none"),
            record.source.display(),
            record.target.display()
        )),
        None => lines.push(format!("active_relocation id={id} status=record_missing")),
    }
    Ok(lines)
}
