use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::log_info;

/// Registers SIGTERM/SIGINT handlers that flip a flag, then spawns a poller
/// that cancels `token` once the flag is observed. Grounded on the agent
/// runner's shutdown-flag pattern, adapted from a raw `AtomicBool` poll loop
/// to driving a `CancellationToken` since the coordinator's outer loop
/// already selects on one.
pub fn install(token: CancellationToken) -> Result<(), String> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;

    tokio::spawn(async move {
        loop {
            if flag.load(Ordering::Relaxed) {
                log_info!("Shutdown signal received, finishing the current phase turn before exiting.");
                token.cancel();
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_does_not_cancel_without_a_signal() {
        let token = CancellationToken::new();
        install(token.clone()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!token.is_cancelled());
    }
}
