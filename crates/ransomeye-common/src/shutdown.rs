//! Graceful shutdown handling and the frozen exit-code set

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process exit codes. Frozen across all RansomEye services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    ConfigError = 1,
    StartupError = 2,
    RuntimeError = 3,
    FatalError = 4,
    ShutdownError = 5,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Exit with a configuration error
pub fn exit_config_error(message: &str) -> ! {
    eprintln!("CONFIG_ERROR: {}", message);
    std::process::exit(ExitCode::ConfigError.code());
}

/// Exit with a startup error
pub fn exit_startup_error(message: &str) -> ! {
    eprintln!("STARTUP_ERROR: {}", message);
    std::process::exit(ExitCode::StartupError.code());
}

/// Graceful shutdown handler
///
/// SIGTERM/SIGINT set a flag that batch loops observe at each iteration.
/// No work is interrupted mid-pass.
#[derive(Clone)]
pub struct ShutdownHandler {
    component: String,
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install SIGTERM/SIGINT listeners on the current tokio runtime
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let flag = self.flag.clone();
        let component = self.component.clone();
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::interrupt(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!(component = %component, "SIGTERM received, requesting shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!(component = %component, "SIGINT received, requesting shutdown");
                }
            }
            flag.store(true, Ordering::SeqCst);
        })
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Programmatic shutdown request (tests, fatal paths)
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_frozen() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::ConfigError.code(), 1);
        assert_eq!(ExitCode::StartupError.code(), 2);
        assert_eq!(ExitCode::RuntimeError.code(), 3);
        assert_eq!(ExitCode::FatalError.code(), 4);
        assert_eq!(ExitCode::ShutdownError.code(), 5);
    }

    #[test]
    fn shutdown_flag_is_observable() {
        let handler = ShutdownHandler::new("test");
        assert!(!handler.is_shutdown_requested());
        handler.request_shutdown();
        assert!(handler.is_shutdown_requested());

        let clone = handler.clone();
        assert!(clone.is_shutdown_requested());
    }
}
