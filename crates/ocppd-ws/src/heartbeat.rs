//! Ping/pong liveness monitoring per connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, Frame};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped answering pings within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally (disconnect or shutdown).
    Cancelled,
}

/// Run liveness pings for one connection.
///
/// Each `interval` tick sends a ping and checks whether the client has
/// shown any sign of life since the previous tick. After `timeout /
/// interval` consecutive silent ticks (at least one) the connection is
/// declared dead.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticks = time::interval(interval);
    // The first tick fires immediately; skip it so the client gets a full
    // interval before its first liveness check.
    let _ = ticks.tick().await;

    let interval_secs = interval.as_secs().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = (timeout.as_secs() / interval_secs).max(1) as u32;
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
                let _ = connection.send(Frame::Ping);
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocppd_core::ClientId;
    use tokio::sync::mpsc;

    fn make_connection() -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(Connection::new(ClientId::from("CP001"), tx)), rx)
    }

    #[tokio::test]
    async fn cancelled_heartbeat_returns_cancelled() {
        let (connection, _rx) = make_connection();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            connection,
            Duration::from_secs(100),
            Duration::from_secs(300),
            cancel.clone(),
        ));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn silent_connection_times_out() {
        let (connection, _rx) = make_connection();
        // Consume the initial alive flag so every tick is a miss
        let _ = connection.check_alive();

        let result = run_heartbeat(
            connection,
            Duration::from_millis(10),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test]
    async fn responsive_connection_stays_up() {
        let (connection, _rx) = make_connection();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            connection.clone(),
            Duration::from_millis(20),
            Duration::from_millis(60),
            cancel.clone(),
        ));

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            connection.mark_alive();
        }
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn pings_are_queued() {
        let (connection, mut rx) = make_connection();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            connection,
            Duration::from_millis(10),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, Frame::Ping));
        cancel.cancel();
        let _ = handle.await.unwrap();
    }
}
