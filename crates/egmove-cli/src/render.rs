use std::io::IsTerminal;
use std::path::Path;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};

use egmove_backup::{BackupOutcome, PreparedRestore, RestoreOutcome};
use egmove_relocator::{
    NonRelocatablePathWarning, PathUpdate, PathUpdates, RelocationError, RelocationOutcome,
    RelocationRequest, RelocationState,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub(crate) enum ColorChoice {
    Auto,
    Always,
    Never,
}

pub(crate) fn output_style_for(choice: ColorChoice) -> OutputStyle {
    match choice {
        ColorChoice::Always => OutputStyle::Rich,
        ColorChoice::Never => OutputStyle::Plain,
        ColorChoice::Auto => resolve_output_style(
            std::io::stdout().is_terminal(),
            std::io::stderr().is_terminal(),
        ),
    }
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        "critical" => "[CRITICAL]",
        _ => "[..]",
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn critical_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::Red.into()))
        .effects(Effects::BOLD)
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

/// Script-friendly description of what a relocation will change.
pub(crate) fn render_relocation_preview_lines(
    request: &RelocationRequest,
    updates: &PathUpdates,
) -> Vec<String> {
    let mut lines = vec![
        format!(
            "relocation_preview app_id={} from={} to={}",
            request.app_id,
            request.source.display(),
            request.target.display()
        ),
        format!(
            "path_update field=InstallLocation action=rebase from={} to={}",
            request.manifest.install_location(),
            updates.install_location
        ),
    ];
    for (field, update) in updates.fields() {
        lines.push(match update {
            PathUpdate::Rebase { from, to } => {
                format!("path_update field={field} action=rebase from={from} to={to}")
            }
            PathUpdate::Keep { path } => {
                format!("path_update field={field} action=keep path={path}")
            }
        });
    }
    lines.push(format!(
        "document_update file={}",
        request.registry_path.display()
    ));
    lines.push(format!(
        "document_update file={}",
        request.manifest_path.display()
    ));
    lines
}

pub(crate) fn render_warning_line(
    style: OutputStyle,
    warning: &NonRelocatablePathWarning,
) -> String {
    render_status_line(style, "warn", &format!("warning: {warning}"))
}

pub(crate) fn render_outcome_lines(style: OutputStyle, outcome: &RelocationOutcome) -> Vec<String> {
    vec![
        render_status_line(
            style,
            "ok",
            &format!(
                "relocated {} from {} to {}",
                outcome.app_id,
                outcome.previous_location.display(),
                outcome.new_location.display()
            ),
        ),
        format!("backup file={}", outcome.registry_backup.display()),
        format!("backup file={}", outcome.manifest_backup.display()),
    ]
}

pub(crate) fn render_restore_preview_lines(prepared: &PreparedRestore) -> Vec<String> {
    let mut lines = vec![format!(
        "restore_preview app_id={} archive={} compression={} to={}",
        prepared.app_id(),
        prepared.archive.display(),
        prepared.compression,
        prepared.target.display()
    )];
    lines.extend(
        prepared
            .metadata
            .external
            .iter()
            .map(|entry| format!("external_path field={} path={}", entry.field, entry.path)),
    );
    lines.push(format!(
        "document_update file={}",
        prepared.registry_path.display()
    ));
    lines.push(format!(
        "document_update file={}",
        prepared.manifest_path.display()
    ));
    lines
}

pub(crate) fn render_backup_outcome_lines(
    style: OutputStyle,
    outcome: &BackupOutcome,
) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "ok",
        &format!(
            "backed up {} to {} ({})",
            outcome.app_id,
            outcome.archive.display(),
            outcome.compression
        ),
    )];
    lines.extend(
        outcome
            .external
            .iter()
            .map(|entry| format!("external_path field={} path={}", entry.field, entry.path)),
    );
    lines.extend(outcome.missing.iter().map(|(field, path)| {
        render_status_line(
            style,
            "warn",
            &format!("warning: {field} {path} does not exist; not archived"),
        )
    }));
    lines
}

pub(crate) fn render_restore_outcome_lines(
    style: OutputStyle,
    outcome: &RestoreOutcome,
) -> Vec<String> {
    let mut lines = vec![
        render_status_line(
            style,
            "ok",
            &format!(
                "restored {} to {}",
                outcome.app_id,
                outcome.install_location.display()
            ),
        ),
        format!(
            "registry_entry action={}",
            if outcome.registry_entry_added {
                "added"
            } else {
                "updated"
            }
        ),
        format!("backup file={}", outcome.registry_backup.display()),
    ];
    if let Some(manifest_backup) = &outcome.manifest_backup {
        lines.push(format!("backup file={}", manifest_backup.display()));
    }
    lines.extend(
        outcome
            .restored_external
            .iter()
            .map(|path| format!("external_path action=restored path={}", path.display())),
    );
    lines.extend(outcome.kept_external.iter().map(|path| {
        render_status_line(
            style,
            "warn",
            &format!(
                "warning: {} already exists; kept instead of the archived copy",
                path.display()
            ),
        )
    }));
    lines
}

/// Lines for a failure that needs a person to put files back by hand.
pub(crate) fn render_critical_lines(style: OutputStyle, err: &RelocationError) -> Vec<String> {
    let RelocationError::ManualRecoveryRequired {
        payload_location,
        original_location,
        cause,
        rollback_failures,
    } = err
    else {
        return vec![render_status_line(style, "err", &format!("error: {err}"))];
    };

    let headline = "relocation failed and rollback did not complete; manual recovery required";
    let first = match style {
        OutputStyle::Plain => format!("CRITICAL: {headline}"),
        OutputStyle::Rich => format!(
            "{} {}",
            colorize(critical_style(), status_badge("critical")),
            colorize(critical_style(), headline)
        ),
    };

    let mut lines = vec![
        first,
        format!("  application files are at: {}", payload_location.display()),
        format!("  original location:        {}", original_location.display()),
        format!("  cause: {cause}"),
    ];
    lines.extend(
        rollback_failures
            .iter()
            .map(|failure| format!("  rollback failure: {failure}")),
    );
    lines.push(
        "  check the install registry and manifest against their .bak copies before starting the launcher"
            .to_string(),
    );
    lines
}

pub(crate) fn render_state_line(state: RelocationState) -> String {
    format!("relocation_state state={state}")
}

pub(crate) fn display_path(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string())
        .unwrap_or_else(|| "<unset>".to_string())
}

/// Spinner over a background relocation. Plain output prints one line per state.
pub(crate) struct RelocationProgress {
    style: OutputStyle,
    spinner: Option<ProgressBar>,
    started_at: Instant,
}

impl RelocationProgress {
    pub(crate) fn start(style: OutputStyle, label: &str) -> Self {
        let spinner = (style == OutputStyle::Rich).then(|| {
            let spinner = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}")
            {
                spinner.set_style(template.tick_chars("|/-\\ "));
            }
            spinner.set_message(label.to_string());
            spinner.enable_steady_tick(Duration::from_millis(80));
            spinner
        });

        Self {
            style,
            spinner,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn transition(&self, state: RelocationState) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(state.to_string()),
            None => println!("{}", render_state_line(state)),
        }
    }

    pub(crate) fn warning(&self, warning: &NonRelocatablePathWarning) {
        let line = render_warning_line(self.style, warning);
        match &self.spinner {
            Some(spinner) => spinner.println(line),
            None => println!("{line}"),
        }
    }

    pub(crate) fn finish(mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
            println!(
                "{}",
                render_status_line(
                    self.style,
                    "..",
                    &format!("finished in {}", format_elapsed(self.started_at.elapsed()))
                )
            );
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}
