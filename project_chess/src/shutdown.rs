//! Server-wide stop signal.
//!
//! One `StopHandle` lives in `main`; every subsystem holds a `StopListener`.
//! The first stop request wins and its reason is what the coordinator logs
//! while it flushes parked results.

use std::fmt;

use tokio::sync::watch;

/// Why the server is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupt,
    Terminate,
    /// Stopped from code (tests, or signal registration failed).
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Interrupt => "interrupt",
            StopReason::Terminate => "terminate",
            StopReason::Requested => "requested",
        })
    }
}

pub struct StopHandle(watch::Sender<Option<StopReason>>);

#[derive(Clone)]
pub struct StopListener(watch::Receiver<Option<StopReason>>);

pub fn stop_channel() -> (StopHandle, StopListener) {
    let (tx, rx) = watch::channel(None);
    (StopHandle(tx), StopListener(rx))
}

impl StopHandle {
    /// Request a stop. Returns false if one was already requested; the
    /// earlier reason is kept.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.0.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
            true
        })
    }

    /// Wait for SIGINT or SIGTERM (Ctrl+C off Unix), then stop with the
    /// matching reason.
    pub async fn stop_on_signal(&self) -> std::io::Result<StopReason> {
        let reason = next_signal().await?;
        tracing::info!(%reason, "Stop signal received");
        self.stop(reason);
        Ok(reason)
    }
}

impl StopListener {
    /// The reason, once a stop has been requested.
    pub fn reason(&self) -> Option<StopReason> {
        *self.0.borrow()
    }

    /// Resolve once a stop is requested. `None` means the handle was dropped
    /// without stopping.
    pub async fn stopped(&mut self) -> Option<StopReason> {
        self.0.wait_for(Option::is_some).await.ok().and_then(|r| *r)
    }
}

#[cfg(unix)]
async fn next_signal() -> std::io::Result<StopReason> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(tokio::select! {
        _ = sigint.recv() => StopReason::Interrupt,
        _ = sigterm.recv() => StopReason::Terminate,
    })
}

#[cfg(not(unix))]
async fn next_signal() -> std::io::Result<StopReason> {
    tokio::signal::ctrl_c().await?;
    Ok(StopReason::Interrupt)
}
