//! Host clock mutation behind a platform-neutral port.
//!
//! The synchronization core only ever talks to [`SystemClockPort`]. The
//! OS-backed implementation shells out to the platform's date utility and
//! therefore usually needs elevated privileges.

use berkeley_types::unix_time_secs;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Setting the system clock is not supported on {0}")]
    Unsupported(&'static str),

    #[error("Refusing to set the system clock to {0}")]
    InvalidTime(f64),

    #[error("Clock command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read and write the host's wall clock in seconds since the Unix epoch.
pub trait SystemClockPort: Send + Sync {
    fn get(&self) -> Result<f64, ClockError>;
    fn set(&self, secs: f64) -> Result<(), ClockError>;
}

/// Port that never touches the host. Reads pass through to the wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSystemClock;

impl SystemClockPort for NoopSystemClock {
    fn get(&self) -> Result<f64, ClockError> {
        Ok(unix_time_secs())
    }

    fn set(&self, _secs: f64) -> Result<(), ClockError> {
        Ok(())
    }
}

/// Port backed by the operating system's date utility.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSystemClock;

impl OsSystemClock {
    fn command_for(secs: f64) -> Result<Command, ClockError> {
        if cfg!(target_os = "linux") {
            let mut command = Command::new("date");
            command.arg("-u").arg("-s").arg(format!("@{secs:.3}"));
            Ok(command)
        } else if cfg!(target_os = "macos") {
            // BSD date only takes whole seconds: [[[mm]dd]HH]MM[[cc]yy][.ss]
            let formatted = berkeley_types::format_timestamp(secs);
            let digits: String = formatted.chars().filter(char::is_ascii_digit).collect();
            if digits.len() != 14 {
                return Err(ClockError::InvalidTime(secs));
            }
            let (year, rest) = digits.split_at(4);
            let (month_day_hour_min, seconds) = rest.split_at(8);
            let mut command = Command::new("date");
            command
                .arg("-u")
                .arg(format!("{month_day_hour_min}{year}.{seconds}"));
            Ok(command)
        } else if cfg!(target_os = "windows") {
            let millis = (secs * 1_000.0).round() as i64;
            let mut command = Command::new("powershell");
            command.arg("-NoProfile").arg("-Command").arg(format!(
                "Set-Date -Date ([DateTimeOffset]::FromUnixTimeMilliseconds({millis}).LocalDateTime)"
            ));
            Ok(command)
        } else {
            Err(ClockError::Unsupported(std::env::consts::OS))
        }
    }
}

impl SystemClockPort for OsSystemClock {
    fn get(&self) -> Result<f64, ClockError> {
        Ok(unix_time_secs())
    }

    fn set(&self, secs: f64) -> Result<(), ClockError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ClockError::InvalidTime(secs));
        }

        let mut command = Self::command_for(secs)?;
        debug!("setting system clock via {:?}", command);
        let output = command.output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ClockError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_port_accepts_any_time() {
        let port = NoopSystemClock;
        assert!(port.set(123.0).is_ok());
        assert!(port.get().unwrap() > 0.0);
    }

    #[test]
    fn os_port_rejects_nonsense_targets() {
        let port = OsSystemClock;
        assert!(matches!(port.set(f64::NAN), Err(ClockError::InvalidTime(_))));
        assert!(matches!(port.set(-1.0), Err(ClockError::InvalidTime(_))));
    }
}
