//! Smoke test for a configured service: run its command with `--help`.

use std::io::ErrorKind;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use super::process::run_command;
use crate::core::config_merge::ServiceDescriptor;

/// How long a service gets to answer `--help`.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const CHECK_OUTPUT_LIMIT: usize = 16 * 1024;

/// Outcome of [`check_service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCheck {
    /// `--help` exited successfully.
    Valid,
    /// The command ran but exited unsuccessfully.
    Failed { code: Option<i32>, detail: String },
    /// The command could not be found.
    CommandNotFound(String),
    /// Still running when the limit passed; long-running servers often ignore `--help`.
    TimedOut,
}

/// Run `command args --help` with the service's environment.
///
/// Descriptors without a command (remote services) are an error.
#[instrument(skip_all, fields(command = descriptor.command.as_deref()))]
pub fn check_service(descriptor: &ServiceDescriptor, timeout: Duration) -> Result<ServiceCheck> {
    let program = descriptor
        .command
        .as_deref()
        .ok_or_else(|| anyhow!("service has no command to run"))?;
    let mut cmd = Command::new(program);
    cmd.args(&descriptor.args).arg("--help").envs(&descriptor.env);

    let output = match run_command(cmd, None, Some(timeout), CHECK_OUTPUT_LIMIT) {
        Ok(output) => output,
        Err(err) => {
            if let Some(io_err) = err.downcast_ref::<std::io::Error>()
                && io_err.kind() == ErrorKind::NotFound
            {
                return Ok(ServiceCheck::CommandNotFound(program.to_string()));
            }
            return Err(err);
        }
    };
    debug!(exit_code = ?output.status.code(), timed_out = output.timed_out, "service check finished");
    if output.timed_out {
        return Ok(ServiceCheck::TimedOut);
    }
    if output.status.success() {
        return Ok(ServiceCheck::Valid);
    }
    let detail = output
        .stderr_lossy()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();
    Ok(ServiceCheck::Failed {
        code: output.status.code(),
        detail,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ServiceDescriptor {
        ServiceDescriptor::command("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn zero_exit_is_valid() {
        let check = check_service(&sh("exit 0"), CHECK_TIMEOUT).expect("check");
        assert_eq!(check, ServiceCheck::Valid);
    }

    #[test]
    fn service_env_reaches_the_command() {
        let mut descriptor = sh(r#"test "$MCP_TOKEN" = secret"#);
        descriptor
            .env
            .insert("MCP_TOKEN".to_string(), "secret".to_string());
        assert_eq!(
            check_service(&descriptor, CHECK_TIMEOUT).expect("check"),
            ServiceCheck::Valid
        );
    }

    #[test]
    fn nonzero_exit_reports_first_stderr_line() {
        let check = check_service(&sh("echo 'bad flag' >&2; exit 2"), CHECK_TIMEOUT).expect("check");
        assert_eq!(
            check,
            ServiceCheck::Failed {
                code: Some(2),
                detail: "bad flag".to_string()
            }
        );
    }

    #[test]
    fn missing_command_is_reported() {
        let descriptor = ServiceDescriptor::command("no-such-mcp-server-binary", Vec::new());
        assert_eq!(
            check_service(&descriptor, CHECK_TIMEOUT).expect("check"),
            ServiceCheck::CommandNotFound("no-such-mcp-server-binary".to_string())
        );
    }

    #[test]
    fn slow_server_times_out() {
        let check = check_service(&sh("exec sleep 5"), Duration::from_millis(200)).expect("check");
        assert_eq!(check, ServiceCheck::TimedOut);
    }

    #[test]
    fn remote_service_cannot_be_checked() {
        let descriptor = ServiceDescriptor::default();
        assert!(check_service(&descriptor, CHECK_TIMEOUT).is_err());
    }
}
