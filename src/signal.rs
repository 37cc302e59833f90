//! Process signal handling.

use tokio::sync::broadcast;
use tracing::{debug, info};

/// Lifecycle request delivered to the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetSignal {
    /// Graceful shutdown (SIGTERM, SIGINT).
    Shutdown,
    /// Reload configuration (SIGHUP).
    Reload,
}

impl std::fmt::Display for FleetSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FleetSignal::Shutdown => write!(f, "SHUTDOWN"),
            FleetSignal::Reload => write!(f, "RELOAD"),
        }
    }
}

/// Turns OS signals into [`FleetSignal`]s.
#[derive(Clone)]
pub struct SignalHandler {
    sender: broadcast::Sender<FleetSignal>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetSignal> {
        self.sender.subscribe()
    }

    pub fn send(&self, signal: FleetSignal) {
        debug!("Sending signal: {}", signal);
        let _ = self.sender.send(signal);
    }

    /// Install OS signal listeners (Unix).
    #[cfg(unix)]
    pub fn install(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let listeners = [
            (SignalKind::terminate(), "SIGTERM", FleetSignal::Shutdown),
            (SignalKind::interrupt(), "SIGINT", FleetSignal::Shutdown),
            (SignalKind::hangup(), "SIGHUP", FleetSignal::Reload),
        ];
        for (kind, name, request) in listeners {
            let mut stream = signal(kind)?;
            let handler = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Received {}", name);
                    handler.send(request);
                }
            });
        }

        info!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP)");
        Ok(())
    }

    /// Install OS signal listeners (non-Unix fallback).
    #[cfg(not(unix))]
    pub fn install(&self) -> std::io::Result<()> {
        let handler = self.clone();

        // Only Ctrl+C is available on non-Unix
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received Ctrl+C");
                handler.send(FleetSignal::Shutdown);
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(FleetSignal::Shutdown.to_string(), "SHUTDOWN");
        assert_eq!(FleetSignal::Reload.to_string(), "RELOAD");
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_signal() {
        let handler = SignalHandler::new();
        let mut rx1 = handler.subscribe();
        let mut rx2 = handler.clone().subscribe();

        handler.send(FleetSignal::Reload);

        assert_eq!(rx1.recv().await.unwrap(), FleetSignal::Reload);
        assert_eq!(rx2.recv().await.unwrap(), FleetSignal::Reload);
    }

    #[test]
    fn test_send_without_subscribers() {
        SignalHandler::new().send(FleetSignal::Shutdown);
    }
}
