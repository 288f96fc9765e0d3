//! Connection Supervisor
//!
//! Owns a transport and drives connection establishment under a bounded,
//! constant-delay retry policy. A `disconnect` issued from another task
//! aborts any attempt or wait that is in flight.

use crate::domain::models::{RetryPolicy, TransportState};
use crate::error::{ConnectError, Result};
use crate::infrastructure::bluetooth::transport::{ensure_connected, NotificationHandler, Transport};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

pub struct ConnectionSupervisor<T: Transport> {
    transport: Mutex<T>,
    policy: RetryPolicy,
    cancel: watch::Sender<bool>,
    /// Mirror of the transport state, readable without the transport lock.
    state: watch::Sender<TransportState>,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        let (cancel, _) = watch::channel(false);
        let (state, _) = watch::channel(transport.state());
        Self {
            transport: Mutex::new(transport),
            policy,
            cancel,
            state,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Lifecycle state as of the last completed step. Reads `Connecting`
    /// for the whole duration of an attempt.
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Follow state changes, e.g. to notice the link dropping to `Disconnected`.
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// Connect, retrying transient failures up to the policy bound.
    ///
    /// Non-transient failures are returned as-is after the attempt that
    /// produced them. Running out of attempts yields
    /// [`ConnectError::Exhausted`]; a concurrent [`disconnect`](Self::disconnect)
    /// yields [`ConnectError::Cancelled`].
    pub async fn connect_with_retry(&self) -> Result<(), ConnectError> {
        self.cancel.send_replace(false);
        let mut cancelled = self.cancel.subscribe();

        for attempt in self.policy.attempts() {
            info!(
                "Connecting (attempt {}/{})",
                attempt.attempt_number, attempt.max_attempts
            );

            // published before taking the lock so I/O callers are turned away
            // instead of queueing behind the attempt
            self.state.send_replace(TransportState::Connecting);
            let outcome = {
                let mut transport = self.transport.lock().await;
                let outcome = tokio::select! {
                    biased;
                    _ = wait_cancelled(&mut cancelled) => None,
                    res = transport.connect() => Some(res),
                };
                if outcome.is_none() {
                    transport.disconnect().await;
                }
                self.state.send_replace(transport.state());
                outcome
            };

            let err = match outcome {
                None => {
                    info!("Connect cancelled during attempt {}", attempt.attempt_number);
                    return Err(ConnectError::Cancelled {
                        attempts: attempt.attempt_number,
                    });
                }
                Some(Ok(())) => {
                    info!("Connected on attempt {}", attempt.attempt_number);
                    return Ok(());
                }
                Some(Err(e)) => e,
            };

            if !err.is_transient() {
                error!("Connect failed: {}", err);
                return Err(err);
            }

            warn!(
                "Connection attempt {} failed: {}",
                attempt.attempt_number, err
            );
            if attempt.is_last() {
                error!("Could not connect. Make sure the printer is powered on and in BLE mode");
                return Err(ConnectError::Exhausted {
                    attempts: attempt.attempt_number,
                    last: Box::new(err),
                });
            }

            info!("Retrying in {:?}", attempt.delay);
            tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancelled) => {
                    info!("Connect cancelled while waiting to retry");
                    return Err(ConnectError::Cancelled {
                        attempts: attempt.attempt_number,
                    });
                }
                _ = tokio::time::sleep(attempt.delay) => {}
            }
        }

        // attempts() always yields at least one item
        Err(ConnectError::Cancelled { attempts: 0 })
    }

    /// Cancel any pending connect and close the link. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.cancel.send_replace(true);
        let mut transport = self.transport.lock().await;
        transport.disconnect().await;
        self.state.send_replace(transport.state());
    }

    /// Rejected with `NotConnected` while an attempt is running; never waits
    /// for the attempt to finish.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        ensure_connected(self.state())?;
        self.transport.lock().await.write(data).await
    }

    pub async fn subscribe(&self, handler: NotificationHandler) -> Result<()> {
        ensure_connected(self.state())?;
        self.transport.lock().await.subscribe(handler).await
    }

    pub async fn unsubscribe(&self) -> Result<()> {
        ensure_connected(self.state())?;
        self.transport.lock().await.unsubscribe().await
    }

    pub fn into_inner(self) -> T {
        self.transport.into_inner()
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::infrastructure::bluetooth::mock::{MockPeripheralConnector, MockTransport};
    use crate::infrastructure::bluetooth::peripheral::PeripheralTransport;
    use crate::infrastructure::bluetooth::protocol::LinkConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn transient() -> ConnectError {
        ConnectError::Transient("le-connection-abort-by-local".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let transport = MockTransport::always_failing(transient());
        let monitor = transport.monitor();
        let supervisor = ConnectionSupervisor::new(transport, RetryPolicy::new(3, Duration::from_secs(2)));

        let err = supervisor.connect_with_retry().await.unwrap_err();
        assert_eq!(err.attempts(), Some(3));
        assert!(matches!(err, ConnectError::Exhausted { ref last, .. } if last.is_transient()));
        assert_eq!(monitor.connect_attempts(), 3);
        assert_eq!(supervisor.state(), TransportState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let transport = MockTransport::with_connect_results([Err(transient()), Err(transient()), Ok(())]);
        let monitor = transport.monitor();
        let supervisor = ConnectionSupervisor::new(transport, RetryPolicy::default());

        let started = tokio::time::Instant::now();
        supervisor.connect_with_retry().await.unwrap();
        assert_eq!(monitor.connect_attempts(), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(supervisor.state(), TransportState::Connected);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let transport = MockTransport::always_failing(ConnectError::PermissionDenied("not authorized".into()));
        let monitor = transport.monitor();
        let supervisor = ConnectionSupervisor::new(transport, RetryPolicy::default());

        let err = supervisor.connect_with_retry().await.unwrap_err();
        assert!(matches!(err, ConnectError::PermissionDenied(_)));
        assert_eq!(err.attempts(), None);
        assert_eq!(monitor.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_retry_wait() {
        let transport = MockTransport::always_failing(transient());
        let monitor = transport.monitor();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            transport,
            RetryPolicy::new(5, Duration::from_secs(2)),
        ));

        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.connect_with_retry().await })
        };

        // first attempt at t=0, second at t=2s, then waiting until t=4s
        tokio::time::sleep(Duration::from_millis(2500)).await;
        supervisor.disconnect().await;

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(monitor.connect_attempts(), 2);
        assert_eq!(supervisor.state(), TransportState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_attempt_in_flight() {
        let transport = MockTransport::new().with_connect_delay(Duration::from_secs(30));
        let monitor = transport.monitor();
        let supervisor = Arc::new(ConnectionSupervisor::new(transport, RetryPolicy::default()));

        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.connect_with_retry().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        supervisor.disconnect().await;

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), Some(1));
        assert_eq!(monitor.disconnects(), 1);
        assert_eq!(supervisor.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_after_cancel() {
        let supervisor = ConnectionSupervisor::new(MockTransport::new(), RetryPolicy::default());
        supervisor.disconnect().await;

        // a previous cancel does not poison the next connect
        supervisor.connect_with_retry().await.unwrap();
        assert_eq!(supervisor.state(), TransportState::Connected);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let transport = MockTransport::new();
        let monitor = transport.monitor();
        let supervisor = ConnectionSupervisor::new(transport, RetryPolicy::default());

        let err = supervisor.write(&[0x55, 0x55]).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
        assert!(monitor.writes().is_empty());

        supervisor.connect_with_retry().await.unwrap();
        supervisor.write(&[0x55, 0x55]).await.unwrap();
        assert_eq!(monitor.writes(), vec![vec![0x55, 0x55]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_during_connect_is_rejected_not_queued() {
        let transport = MockTransport::new().with_connect_delay(Duration::from_secs(5));
        let monitor = transport.monitor();
        let supervisor = Arc::new(ConnectionSupervisor::new(transport, RetryPolicy::default()));

        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.connect_with_retry().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let issued = tokio::time::Instant::now();
        let err = supervisor.write(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotConnected {
                state: TransportState::Connecting
            }
        ));
        assert_eq!(issued.elapsed(), Duration::ZERO);
        assert!(matches!(
            supervisor.subscribe(Box::new(|_: &[u8]| {})).await,
            Err(Error::NotConnected { .. })
        ));

        task.await.unwrap().unwrap();
        assert_eq!(supervisor.state(), TransportState::Connected);
        assert!(monitor.writes().is_empty());
    }

    #[tokio::test]
    async fn test_state_watch_follows_lifecycle() {
        let supervisor = ConnectionSupervisor::new(MockTransport::new(), RetryPolicy::default());
        let states = supervisor.watch_state();
        assert_eq!(*states.borrow(), TransportState::Disconnected);

        supervisor.connect_with_retry().await.unwrap();
        assert_eq!(*states.borrow(), TransportState::Connected);

        supervisor.disconnect().await;
        assert_eq!(*states.borrow(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_double_disconnect_is_noop() {
        let transport = MockTransport::new();
        let monitor = transport.monitor();
        let supervisor = ConnectionSupervisor::new(transport, RetryPolicy::default());
        supervisor.connect_with_retry().await.unwrap();

        supervisor.disconnect().await;
        supervisor.disconnect().await;
        assert_eq!(monitor.disconnects(), 1);
        assert_eq!(supervisor.state(), TransportState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_peripheral_setup_closes_link() {
        let connector = MockPeripheralConnector::new().with_resolve_delay(Duration::from_secs(5));
        let monitor = connector.monitor();
        let link = PeripheralTransport::new(connector, "03:0D:7A:D6:5E:B1".to_string(), LinkConfig::default());
        let supervisor = Arc::new(ConnectionSupervisor::new(link, RetryPolicy::default()));

        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.connect_with_retry().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        supervisor.disconnect().await;

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.attempts(), Some(1));
        assert!(err.is_cancelled());
        assert_eq!(monitor.open_attempts(), 1);
        assert_eq!(monitor.closes(), 1);
        assert_eq!(supervisor.state(), TransportState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peripheral_link_recovers_on_third_attempt() {
        let connector = MockPeripheralConnector::new();
        let monitor = connector.monitor();
        monitor.fail_next_open(transient());
        monitor.fail_next_open(transient());

        let link = PeripheralTransport::new(connector, "03:0D:7A:D6:5E:B1".to_string(), LinkConfig::default());
        let supervisor = ConnectionSupervisor::new(link, RetryPolicy::new(5, Duration::from_secs(2)));

        supervisor.connect_with_retry().await.unwrap();
        assert_eq!(monitor.open_attempts(), 3);
        assert_eq!(supervisor.state(), TransportState::Connected);
    }
}
