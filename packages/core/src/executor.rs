//! Command execution with privilege escalation support.
//!
//! Mount backend commands can run directly (when the process is already
//! root) or wrapped with `pkexec` (GUI hosts) or `sudo` (terminals).

use std::process::{Command, Output};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exit status pkexec uses when the user dismisses the authentication dialog.
const PKEXEC_DISMISSED: i32 = 126;

/// How backend commands obtain root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeEscalation {
    /// Run directly; the process must already be root for writes.
    #[default]
    None,
    /// Wrap with `pkexec` (polkit dialog, for GUI hosts).
    Pkexec,
    /// Wrap with `sudo` (terminal prompt).
    Sudo,
}

impl PrivilegeEscalation {
    /// Name of the wrapper program, if any.
    pub fn wrapper(self) -> Option<&'static str> {
        match self {
            PrivilegeEscalation::None => None,
            PrivilegeEscalation::Pkexec => Some("pkexec"),
            PrivilegeEscalation::Sudo => Some("sudo"),
        }
    }
}

/// Runs mount backend commands, optionally through an escalation wrapper.
///
/// # Example
///
/// ```
/// use ntfs_mount_core::executor::{ExecutionContext, PrivilegeEscalation};
///
/// let ctx = ExecutionContext::with_escalation(PrivilegeEscalation::Sudo);
/// assert_eq!(ctx.escalation(), PrivilegeEscalation::Sudo);
/// assert_eq!(
///     ctx.command_line("umount", &["/mnt/data"]),
///     vec!["sudo", "umount", "/mnt/data"]
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    escalation: PrivilegeEscalation,
}

impl ExecutionContext {
    /// Runs commands directly.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self { escalation }
    }

    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    /// Returns true if commands are wrapped with an escalation tool.
    pub fn escalates(&self) -> bool {
        self.escalation != PrivilegeEscalation::None
    }

    /// The full argv a privileged invocation of `cmd` would execute.
    pub fn command_line<'a>(&self, cmd: &'a str, args: &[&'a str]) -> Vec<&'a str> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if let Some(wrapper) = self.escalation.wrapper() {
            argv.push(wrapper);
        }
        argv.push(cmd);
        argv.extend_from_slice(args);
        argv
    }

    /// Runs `cmd` with the configured escalation and captures its output.
    ///
    /// A non-zero exit status is not an error here; callers classify the
    /// output themselves. Only spawn failures and a dismissed pkexec
    /// dialog are reported as errors.
    pub fn run_privileged(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let output = match self.escalation.wrapper() {
            None => run_command(cmd, args)?,
            Some(wrapper) => run_with_wrapper(wrapper, cmd, args)?,
        };

        if self.escalation == PrivilegeEscalation::Pkexec
            && output.status.code() == Some(PKEXEC_DISMISSED)
        {
            return Err(Error::AuthenticationCancelled);
        }

        Ok(output)
    }
}

/// Spawns `cmd` as-is.
fn run_command(cmd: &str, args: &[&str]) -> Result<Output> {
    Command::new(cmd)
        .args(args)
        .output()
        .map_err(|e| Error::CommandExecution {
            command: cmd.to_string(),
            source: e,
        })
}

/// Spawns `wrapper cmd args...`. A missing wrapper binary gets its own error.
fn run_with_wrapper(wrapper: &str, cmd: &str, args: &[&str]) -> Result<Output> {
    Command::new(wrapper)
        .arg(cmd)
        .args(args)
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::EscalationToolNotFound {
                    tool: wrapper.to_string(),
                }
            } else {
                Error::CommandExecution {
                    command: format!("{} {}", wrapper, cmd),
                    source: e,
                }
            }
        })
}
