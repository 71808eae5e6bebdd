//! Systemd watchdog notifications
//!
//! A dedicated thread sends `WATCHDOG=1` at half the declared interval.
//! The thread survives inner errors by logging and continuing; a hung main
//! loop is exactly what the watchdog exists to catch.

use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const WATCHDOG_INTERVAL_VAR: &str = "RANSOMEYE_WATCHDOG_INTERVAL_SECS";
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

fn notify_socket() -> Option<String> {
    std::env::var("NOTIFY_SOCKET").ok().filter(|s| !s.is_empty())
}

/// Send one notification message to the systemd notify socket
pub fn sd_notify(message: &str) -> std::io::Result<()> {
    let Some(path) = notify_socket() else {
        return Ok(());
    };
    if path.starts_with('@') {
        // abstract-namespace sockets are not used by our unit files
        return Ok(());
    }
    let socket = UnixDatagram::unbound()?;
    socket.send_to(message.as_bytes(), path)?;
    Ok(())
}

/// Spawn the watchdog thread. Returns a stop flag; the thread exits at the
/// next tick after the flag is set.
pub fn spawn_watchdog(component: &str, interval: Duration) -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();
    let component = component.to_string();
    let tick = interval / 2;

    std::thread::Builder::new()
        .name(format!("{}-watchdog", component))
        .spawn(move || {
            tracing::info!(component = %component, tick_secs = tick.as_secs(), "watchdog thread started");
            while !stop_thread.load(Ordering::SeqCst) {
                if let Err(e) = sd_notify("WATCHDOG=1") {
                    tracing::warn!(component = %component, error = %e, "watchdog notify failed");
                }
                std::thread::sleep(tick);
            }
            tracing::info!(component = %component, "watchdog thread stopped");
        })
        .expect("failed to spawn watchdog thread");

    stop
}

/// Declared watchdog interval from the environment, or the default
pub fn watchdog_interval() -> Duration {
    std::env::var(WATCHDOG_INTERVAL_VAR)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_WATCHDOG_INTERVAL)
}
