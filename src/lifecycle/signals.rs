//! OS signal handling.
//!
//! # Responsibilities
//! - Translate SIGTERM/SIGINT into shutdown and SIGHUP into config reload
//! - Let background components request a graceful shutdown of the process
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - `interrupt_self` raises a real SIGINT so every shutdown takes the same path

/// What a received signal asks the process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

/// Wait for the next signal the gateway reacts to.
pub async fn wait_for_signal() -> SignalEvent {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(term), Ok(hup)) => (term, hup),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM/SIGHUP handlers, listening for Ctrl+C only");
                return wait_for_ctrl_c().await;
            }
        };

        tokio::select! {
            event = wait_for_ctrl_c() => event,
            _ = term.recv() => {
                tracing::info!("Received SIGTERM");
                SignalEvent::Shutdown
            }
            _ = hup.recv() => {
                tracing::info!("Received SIGHUP");
                SignalEvent::Reload
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await
    }
}

async fn wait_for_ctrl_c() -> SignalEvent {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received SIGINT"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
    SignalEvent::Shutdown
}

/// Ask this process to shut down gracefully.
pub fn interrupt_self() {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::this(), Signal::SIGINT) {
            tracing::error!(error = %e, "Failed to send SIGINT to self");
        }
    }

    #[cfg(not(unix))]
    {
        tracing::error!("Self-interrupt unsupported on this platform, exiting");
        std::process::exit(1);
    }
}
