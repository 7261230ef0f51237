use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use egmove_backup::BackupError;
use egmove_relocator::{
    ensure_no_active_relocation, resolve_relocation, ProcessLister, RelocationError,
    SystemProcessLister, ValidationError,
};
use tracing_subscriber::EnvFilter;

mod completion;
mod config;
mod flows;
mod render;

use completion::{write_completions_script, CliCompletionShell};
use config::{resolve_config, ConfigOverrides};
use flows::{
    confirm_relocation, confirm_restore, ensure_confirmation_possible, format_list_lines,
    format_status_lines, load_catalog_for, plan_for_selector, prepare_restore_for,
    preview_lines, restore_preview_lines, run_backup, run_relocation, run_restore,
    CliCompression,
};
use render::{
    output_style_for, render_backup_outcome_lines, render_critical_lines, render_outcome_lines,
    render_restore_outcome_lines, render_section_header, render_status_line, ColorChoice,
    OutputStyle,
};

#[derive(Parser, Debug)]
#[command(name = "egmove", version)]
#[command(about = "Move installed Epic Games Launcher applications to another folder", long_about = None)]
struct Cli {
    /// Launcher install registry (LauncherInstalled.dat).
    #[arg(long, global = true, value_name = "PATH")]
    registry: Option<PathBuf>,
    /// Directory holding the per-application `.item` manifests.
    #[arg(long, global = true, value_name = "DIR")]
    manifests_dir: Option<PathBuf>,
    /// Where egmove keeps config.toml and its relocation journal.
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List installed applications.
    List {
        #[arg(long)]
        ids: bool,
    },
    /// Validate a relocation and print what it would change.
    Plan {
        app: String,
        destination: PathBuf,
        #[arg(long)]
        skip_launcher_check: bool,
    },
    /// Relocate an application into a destination folder.
    Move {
        app: String,
        destination: PathBuf,
        #[arg(long, short = 'y')]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        skip_launcher_check: bool,
    },
    /// Write an application's files and launcher records to a new archive.
    Backup {
        app: String,
        archive: PathBuf,
        #[arg(long, value_enum, default_value_t = CliCompression::Gzip)]
        compression: CliCompression,
    },
    /// Reinstall an application from a backup archive into a destination folder.
    Restore {
        archive: PathBuf,
        destination: PathBuf,
        #[arg(long, short = 'y')]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        skip_launcher_check: bool,
    },
    /// Show configured paths and any active relocation.
    Status,
    /// Clear a failed or interrupted relocation once its files have been checked.
    Recover {
        #[arg(long, value_name = "ID")]
        resolved: String,
    },
    /// Print a shell completion script.
    Completions { shell: CliCompletionShell },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let style = output_style_for(cli.color);

    match run_cli(cli, style) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            for line in render_error_report(style, &err) {
                eprintln!("{line}");
            }
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// 3 when files need manual recovery, 2 for refused plans, 1 otherwise.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(relocation) = err.downcast_ref::<RelocationError>() {
        return if relocation.is_critical() { 3 } else { 1 };
    }
    if err.downcast_ref::<ValidationError>().is_some() {
        return 2;
    }
    if let Some(backup) = err.downcast_ref::<BackupError>() {
        return if backup.is_validation() { 2 } else { 1 };
    }
    1
}

fn render_error_report(style: OutputStyle, err: &anyhow::Error) -> Vec<String> {
    match err.downcast_ref::<RelocationError>() {
        Some(relocation) if relocation.is_critical() => render_critical_lines(style, relocation),
        _ => vec![render_status_line(style, "err", &format!("error: {err:#}"))],
    }
}

fn run_cli(cli: Cli, style: OutputStyle) -> Result<()> {
    let overrides = ConfigOverrides {
        registry: cli.registry,
        manifests_dir: cli.manifests_dir,
        state_dir: cli.state_dir,
    };

    match cli.command {
        Commands::List { ids } => {
            let config = resolve_config(&overrides)?;
            let catalog = load_catalog_for(&config, style)?;
            for line in format_list_lines(&catalog, ids) {
                println!("{line}");
            }
        }
        Commands::Plan {
            app,
            destination,
            skip_launcher_check,
        } => {
            let config = resolve_config(&overrides)?;
            let catalog = load_catalog_for(&config, style)?;
            let lister = SystemProcessLister;
            let lister = (config.launcher_check && !skip_launcher_check)
                .then_some(&lister as &dyn ProcessLister);
            let request = plan_for_selector(&catalog, &app, &destination, lister)?;
            for line in preview_lines(&request) {
                println!("{line}");
            }
        }
        Commands::Move {
            app,
            destination,
            yes,
            dry_run,
            skip_launcher_check,
        } => {
            let config = resolve_config(&overrides)?;
            config.state.ensure_base_dirs()?;
            ensure_no_active_relocation(&config.state)?;
            let catalog = load_catalog_for(&config, style)?;

            let lister = SystemProcessLister;
            let lister = (config.launcher_check && !skip_launcher_check)
                .then_some(&lister as &dyn ProcessLister);
            let request = plan_for_selector(&catalog, &app, &destination, lister)?;

            if let Some(header) = render_section_header(style, "plan") {
                println!("{header}");
            }
            for line in preview_lines(&request) {
                println!("{line}");
            }
            if dry_run {
                return Ok(());
            }

            if !yes {
                ensure_confirmation_possible(yes, io::stdin().is_terminal())?;
                let confirmed =
                    confirm_relocation(&request, &mut io::stdin().lock(), &mut io::stdout())?;
                if !confirmed {
                    println!("{}", render_status_line(style, "warn", "relocation cancelled"));
                    return Ok(());
                }
            }

            let outcome = run_relocation(&config, request, style)?;
            for line in render_outcome_lines(style, &outcome) {
                println!("{line}");
            }
        }
        Commands::Backup {
            app,
            archive,
            compression,
        } => {
            let config = resolve_config(&overrides)?;
            let catalog = load_catalog_for(&config, style)?;
            let outcome = run_backup(&catalog, &app, &archive, compression.into(), style)?;
            for line in render_backup_outcome_lines(style, &outcome) {
                println!("{line}");
            }
        }
        Commands::Restore {
            archive,
            destination,
            yes,
            dry_run,
            skip_launcher_check,
        } => {
            let config = resolve_config(&overrides)?;
            config.state.ensure_base_dirs()?;
            ensure_no_active_relocation(&config.state)?;

            let lister = SystemProcessLister;
            let lister = (config.launcher_check && !skip_launcher_check)
                .then_some(&lister as &dyn ProcessLister);
            let prepared = prepare_restore_for(&config, &archive, &destination, lister)?;

            if let Some(header) = render_section_header(style, "restore") {
                println!("{header}");
            }
            for line in restore_preview_lines(&prepared) {
                println!("{line}");
            }
            if dry_run {
                return Ok(());
            }

            if !yes {
                ensure_confirmation_possible(yes, io::stdin().is_terminal())?;
                let confirmed =
                    confirm_restore(&prepared, &mut io::stdin().lock(), &mut io::stdout())?;
                if !confirmed {
                    println!("{}", render_status_line(style, "warn", "restore cancelled"));
                    return Ok(());
                }
            }

            let outcome = run_restore(&config, prepared, style)?;
            for line in render_restore_outcome_lines(style, &outcome) {
                println!("{line}");
            }
        }
        Commands::Status => {
            let config = resolve_config(&overrides)?;
            for line in format_status_lines(&config)? {
                println!("{line}");
            }
        }
        Commands::Recover { resolved } => {
            let config = resolve_config(&overrides)?;
            let record = resolve_relocation(&config.state, &resolved)?;
            println!(
                "{}",
                render_status_line(
                    style,
                    "ok",
                    &format!(
                        "relocation {} of '{}' marked resolved",
                        record.id, record.app_id
                    )
                )
            );
        }
        Commands::Completions { shell } => {
            write_completions_script(shell, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}
