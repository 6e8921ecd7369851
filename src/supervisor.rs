use anyhow::{Context, Result};
use std::process::{Command, ExitStatus};
use std::time::Duration;

/// Exit code the tray child uses to request a relaunch (EX_TEMPFAIL).
pub const DEFAULT_RESTART_EXIT_CODE: i32 = 75;
pub const RESTART_EXIT_CODE_ENV: &str = "DMS_RESTART_EXIT_CODE";
pub const AUTOSTART_FLAG: &str = "--autostart";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub restart_exit_code: i32,
    pub relaunch_delay: Duration,
    /// Arguments passed to every child launch (the child marker flag plus
    /// whatever the user supplied).
    pub child_args: Vec<String>,
}

pub fn restart_exit_code_from_env() -> i32 {
    parse_restart_exit_code(std::env::var(RESTART_EXIT_CODE_ENV).ok().as_deref())
}

fn parse_restart_exit_code(raw: Option<&str>) -> i32 {
    raw.and_then(|value| value.trim().parse::<i32>().ok())
        .filter(|code| *code != 0)
        .unwrap_or(DEFAULT_RESTART_EXIT_CODE)
}

pub fn should_relaunch(status: ExitStatus, restart_exit_code: i32) -> bool {
    status.code() == Some(restart_exit_code)
}

/// Relaunch loop around the tray child process.
///
/// The child signals "restart needed" by exiting with the reserved code;
/// every relaunch after that carries the autostart flag so the hotkey comes
/// back without user action. Any other exit code ends the loop and becomes
/// the supervisor's own exit code.
pub fn run(config: &SupervisorConfig) -> Result<i32> {
    let exe = std::env::current_exe().context("failed to resolve current executable path")?;
    let mut relaunched = false;

    loop {
        let mut command = Command::new(&exe);
        command.args(&config.child_args);
        if relaunched && !config.child_args.iter().any(|arg| arg == AUTOSTART_FLAG) {
            command.arg(AUTOSTART_FLAG);
        }

        let status = command
            .status()
            .with_context(|| format!("failed to launch tray child {}", exe.display()))?;

        if should_relaunch(status, config.restart_exit_code) {
            relaunched = true;
            std::thread::sleep(config.relaunch_delay);
            continue;
        }

        return Ok(status.code().unwrap_or(0));
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_RESTART_EXIT_CODE, parse_restart_exit_code, should_relaunch};

    #[test]
    fn parse_falls_back_to_default() {
        assert_eq!(parse_restart_exit_code(None), DEFAULT_RESTART_EXIT_CODE);
        assert_eq!(
            parse_restart_exit_code(Some("nonsense")),
            DEFAULT_RESTART_EXIT_CODE
        );
        // Zero would collide with a normal exit, so it is rejected.
        assert_eq!(parse_restart_exit_code(Some("0")), DEFAULT_RESTART_EXIT_CODE);
        assert_eq!(parse_restart_exit_code(Some(" 42 ")), 42);
    }

    #[cfg(unix)]
    #[test]
    fn relaunch_decision_is_keyed_on_the_reserved_code_only() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        let restart = ExitStatus::from_raw(75 << 8);
        let clean = ExitStatus::from_raw(0);
        let other = ExitStatus::from_raw(1 << 8);

        assert!(should_relaunch(restart, 75));
        assert!(!should_relaunch(clean, 75));
        assert!(!should_relaunch(other, 75));
        assert!(should_relaunch(other, 1));
    }
}
