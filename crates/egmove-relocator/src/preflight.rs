use anyhow::{anyhow, Context, Result};
use std::process::Command;

use tracing::{debug, warn};

use crate::ValidationError;

/// Process names of the launcher; a relocation under a running launcher races
/// its own writes to the registry and manifests.
pub const LAUNCHER_PROCESS_NAMES: &[&str] = &["EpicGamesLauncher", "EpicWebHelper"];

pub trait ProcessLister {
    /// Names of the running processes, as the OS reports them.
    fn running_processes(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessLister;

impl ProcessLister for SystemProcessLister {
    fn running_processes(&self) -> Result<Vec<String>> {
        if cfg!(windows) {
            let stdout = run_capture(
                Command::new("tasklist").args(["/fo", "csv", "/nh"]),
                "failed to list processes with tasklist",
            )?;
            Ok(parse_tasklist_csv(&stdout))
        } else {
            let stdout = run_capture(
                Command::new("ps").args(["-A", "-o", "comm="]),
                "failed to list processes with ps",
            )?;
            Ok(parse_ps_output(&stdout))
        }
    }
}

fn run_capture(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

/// Image names from `tasklist /fo csv /nh`: the first quoted column per row.
pub fn parse_tasklist_csv(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('"')?;
            let (name, _) = rest.split_once('"')?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Command names from `ps -A -o comm=`, reduced to their final path component.
pub fn parse_ps_output(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.rsplit(['/', '\\']).next().unwrap_or(line).to_string())
        .collect()
}

/// Launcher processes among `running`, sorted and without duplicates.
pub fn launcher_processes(running: &[String]) -> Vec<String> {
    let mut found = running
        .iter()
        .map(|name| strip_exe_suffix(name))
        .filter_map(|name| {
            LAUNCHER_PROCESS_NAMES
                .iter()
                .find(|launcher| launcher.eq_ignore_ascii_case(name))
                .map(|launcher| launcher.to_string())
        })
        .collect::<Vec<_>>();
    found.sort();
    found.dedup();
    found
}

fn strip_exe_suffix(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

/// Refuses when a launcher process is running. Failing to list running
/// processes only produces a warning.
pub fn ensure_launcher_idle(lister: &dyn ProcessLister) -> Result<(), ValidationError> {
    let running = match lister.running_processes() {
        Ok(running) => running,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "could not check for a running launcher");
            return Ok(());
        }
    };

    let processes = launcher_processes(&running);
    if processes.is_empty() {
        debug!(checked = running.len(), "no launcher process running");
        return Ok(());
    }
    Err(ValidationError::LauncherRunning { processes })
}
