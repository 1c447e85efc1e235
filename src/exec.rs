// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! External-tool invocation and the restart/skip policy.
//!
//! Every pipeline stage funnels through [`Executor::run_or_skip`]: if restart
//! mode is on and the stage's primary output already exists, the stage is
//! skipped; otherwise the assembled command runs to completion before the
//! next stage is considered. A non-zero exit aborts the whole pipeline.

use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use log::{debug, info, warn};
use thiserror::Error;

/// An ordered command line for an external tool. Flags accumulate in the
/// order they are pushed and are only serialised when the process is spawned,
/// so flag presence can be asserted on without running anything.
#[derive(Debug, Clone)]
pub(crate) struct ToolCommand {
    program: String,
    args: Vec<(String, Option<String>)>,
}

impl ToolCommand {
    pub(crate) fn new<S: Into<String>>(program: S) -> ToolCommand {
        ToolCommand {
            program: program.into(),
            args: vec![],
        }
    }

    pub(crate) fn program(&self) -> &str {
        &self.program
    }

    /// Push a bare flag (or positional argument).
    pub(crate) fn flag<S: Into<String>>(&mut self, flag: S) {
        self.args.push((flag.into(), None));
    }

    /// Push a `--Flag=value` pair.
    pub(crate) fn arg<S: Into<String>, V: ToString>(&mut self, flag: S, value: V) {
        self.args.push((flag.into(), Some(value.to_string())));
    }

    #[cfg(test)]
    pub(crate) fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|(f, _)| f == flag)
    }

    #[cfg(test)]
    pub(crate) fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(f, _)| f == flag)
            .and_then(|(_, v)| v.as_deref())
    }

    /// One argv element per pushed flag; values are attached with `=`, which
    /// both the DDF and killMS option parsers accept.
    fn to_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|(flag, value)| match value {
                Some(value) => format!("{flag}={value}"),
                None => flag.clone(),
            })
            .collect()
    }

    /// The full command line as it would be typed into a shell.
    pub(crate) fn render(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in self.to_args() {
            rendered.push(' ');
            rendered.push_str(&arg);
        }
        rendered
    }
}

/// Did a stage actually invoke its tool, or was the invocation skipped
/// because the output was already in place?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageOutcome {
    Ran,
    Skipped,
}

impl StageOutcome {
    pub(crate) fn ran(self) -> bool {
        matches!(self, StageOutcome::Ran)
    }
}

/// The run policy shared by every stage, resolved once at pipeline start.
#[derive(Debug, Clone)]
pub(crate) struct Executor {
    /// Skip a stage when its primary output already exists.
    pub(crate) restart: bool,

    /// Log command lines but never spawn anything.
    pub(crate) dry_run: bool,

    /// Where per-stage log files go. `None` disables logging; tool output
    /// then goes wherever ours does.
    pub(crate) log_dir: Option<PathBuf>,
}

impl Executor {
    /// The skip decision every stage shares. The existence check is made
    /// fresh on every call; external tools may have written the artifact
    /// since the last look.
    pub(crate) fn run_or_skip(
        &self,
        primary_output: &Path,
        cmd: &ToolCommand,
        log_name: Option<&str>,
    ) -> Result<StageOutcome, ExecError> {
        if self.restart && primary_output.is_file() {
            warn!(
                "File {} already exists, skipping {}",
                primary_output.display(),
                cmd.program()
            );
            return Ok(StageOutcome::Skipped);
        }
        self.run(cmd, log_name)?;
        Ok(StageOutcome::Ran)
    }

    /// Run a command to completion, with stdout/stderr redirected to the
    /// named log file when a log directory is configured.
    pub(crate) fn run(&self, cmd: &ToolCommand, log_name: Option<&str>) -> Result<(), ExecError> {
        info!("Running: {}", cmd.render());
        if self.dry_run {
            info!("Dry run, skipping this step");
            return Ok(());
        }

        let mut command = Command::new(cmd.program());
        command.args(cmd.to_args());
        if let Some(log_path) = self.log_path(log_name) {
            debug!("Logging to {}", log_path.display());
            let log_file = File::create(&log_path).map_err(|err| ExecError::LogFile {
                path: log_path.clone(),
                err,
            })?;
            let log_file2 = log_file.try_clone().map_err(|err| ExecError::LogFile {
                path: log_path,
                err,
            })?;
            command.stdout(log_file).stderr(log_file2);
        }
        let status = command.status().map_err(|err| ExecError::Spawn {
            program: cmd.program().to_string(),
            err,
        })?;
        check_status(cmd.program(), status)
    }

    /// As [`Executor::run`], but capture the tool's stdout for helpers that
    /// report a value. Returns `None` under dry-run.
    pub(crate) fn run_capture(&self, cmd: &ToolCommand) -> Result<Option<String>, ExecError> {
        info!("Running: {}", cmd.render());
        if self.dry_run {
            info!("Dry run, skipping this step");
            return Ok(None);
        }

        let output = Command::new(cmd.program())
            .args(cmd.to_args())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|err| ExecError::Spawn {
                program: cmd.program().to_string(),
                err,
            })?;
        check_status(cmd.program(), output.status)?;
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn log_path(&self, log_name: Option<&str>) -> Option<PathBuf> {
        match (&self.log_dir, log_name) {
            (Some(dir), Some(name)) => Some(dir.join(name)),
            _ => None,
        }
    }
}

fn check_status(program: &str, status: ExitStatus) -> Result<(), ExecError> {
    if status.success() {
        Ok(())
    } else {
        Err(ExecError::ToolFailed {
            program: program.to_string(),
            status,
        })
    }
}

#[derive(Error, Debug)]
pub(crate) enum ExecError {
    #[error("Couldn't start {program}: {err}")]
    Spawn { program: String, err: std::io::Error },

    #[error("{program} failed ({status})")]
    ToolFailed { program: String, status: ExitStatus },

    #[error("Couldn't create log file {path}: {err}")]
    LogFile { path: PathBuf, err: std::io::Error },
}
