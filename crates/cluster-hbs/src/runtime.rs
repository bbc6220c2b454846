//! Readiness reactor and periodic scheduler collaborators.
//!
//! The client only depends on the [`Reactor`] and [`Scheduler`] traits. The
//! tokio-backed implementations here run each registration as its own task.
//! A reactor never keeps the watched socket alive: whoever owns the socket
//! closes it by dropping it.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, Weak};
use std::task::Poll;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Invoked whenever the watched socket becomes readable.
pub type ReadableHandler = Arc<dyn Fn() + Send + Sync>;

/// Zero-argument periodic action.
pub type Action = Arc<dyn Fn() + Send + Sync>;

/// Notifies a handler when a socket has data to read.
pub trait Reactor: Send + Sync {
    /// Watch `socket` and call `handler` on readability.
    ///
    /// The watch ends on its own once the socket has been dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] if the socket cannot be watched.
    fn register(&self, socket: Weak<UdpSocket>, handler: ReadableHandler) -> Result<Registration>;
}

/// Runs an action on a fixed period.
pub trait Scheduler: Send + Sync {
    /// Call `action` every `period`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] if the action cannot be scheduled.
    fn schedule(&self, name: &str, period: Duration, action: Action) -> Result<Registration>;
}

/// Cancels a reactor or scheduler registration when dropped.
pub struct Registration {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    /// A registration that runs `cancel` when released.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A registration with nothing to cancel.
    #[must_use]
    pub const fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancel now.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

fn current_handle() -> Result<Handle> {
    Handle::try_current().map_err(|e| Error::Register(format!("no tokio runtime: {e}")))
}

/// Reactor backed by the tokio I/O driver.
#[derive(Clone, Debug)]
pub struct TokioReactor {
    handle: Handle,
}

impl TokioReactor {
    /// Reactor on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] when called outside a tokio runtime.
    pub fn new() -> Result<Self> {
        Ok(Self {
            handle: current_handle()?,
        })
    }
}

impl Reactor for TokioReactor {
    fn register(&self, socket: Weak<UdpSocket>, handler: ReadableHandler) -> Result<Registration> {
        let task = self.handle.spawn(async move {
            loop {
                // The strong reference only lives for a single poll.
                let ready = std::future::poll_fn(|cx| match socket.upgrade() {
                    None => Poll::Ready(None),
                    Some(socket) => socket.poll_recv_ready(cx).map(Some),
                })
                .await;

                match ready {
                    None => {
                        debug!("Watched socket closed, reactor task exiting");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Socket readiness failed: {e}");
                        break;
                    }
                    Some(Ok(())) => handler(),
                }
            }
        });
        Ok(Registration::new(move || task.abort()))
    }
}

/// Scheduler backed by `tokio::time::interval`.
#[derive(Clone, Debug)]
pub struct IntervalScheduler {
    handle: Handle,
}

impl IntervalScheduler {
    /// Scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Register`] when called outside a tokio runtime.
    pub fn new() -> Result<Self> {
        Ok(Self {
            handle: current_handle()?,
        })
    }
}

impl Scheduler for IntervalScheduler {
    fn schedule(&self, name: &str, period: Duration, action: Action) -> Result<Registration> {
        if period.is_zero() {
            return Err(Error::Register(format!("{name}: period must be non-zero")));
        }

        debug!("Scheduling action \"{name}\" every {period:?}");
        let task = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                action();
            }
        });
        Ok(Registration::new(move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registration_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registration = Registration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registration.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        drop(Registration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(TokioReactor::new(), Err(Error::Register(_))));
        assert!(matches!(IntervalScheduler::new(), Err(Error::Register(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_scheduler_runs_and_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let scheduler = IntervalScheduler::new().unwrap();
        let registration = scheduler
            .schedule(
                "count",
                Duration::from_millis(100),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        let seen = calls.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 ticks, saw {seen}");

        registration.cancel();
        tokio::task::yield_now().await;
        let after_cancel = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let scheduler = IntervalScheduler::new().unwrap();
        assert!(
            scheduler
                .schedule("bad", Duration::ZERO, Arc::new(|| {}))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_reactor_fires_on_datagram() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let reactor = TokioReactor::new().unwrap();
        let weak = Arc::downgrade(&socket);
        let _registration = reactor
            .register(
                Arc::downgrade(&socket),
                Arc::new(move || {
                    let Some(s) = weak.upgrade() else {
                        return;
                    };
                    let mut buf = [0u8; 16];
                    while let Ok(len) = s.try_recv(&mut buf) {
                        let _ = tx.send(buf[..len].to_vec());
                    }
                }),
            )
            .unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"ping", addr).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, b"ping");
    }

    #[tokio::test]
    async fn test_reactor_does_not_keep_socket_open() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        let reactor = TokioReactor::new().unwrap();
        let _registration = reactor
            .register(Arc::downgrade(&socket), Arc::new(|| {}))
            .unwrap();
        // Let the task reach its first readiness wait.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(socket);
        assert!(std::net::UdpSocket::bind(addr).is_ok());
    }
}
