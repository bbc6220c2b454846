//! Query coordinator: sends queries and pulses, folds responses into state.
//!
//! Two independent primitives guard the shared state:
//! - an atomic send gate collapses concurrent alive pulses without touching
//!   the mutex;
//! - a single mutex protects the socket slot, the current/previous states
//!   and the pending callback queue.

use crate::codec::{ClusterMessage, QueryRequest};
use crate::config::ClientConfig;
use crate::constants::{INVALID_REQ_ID, MAX_MESSAGE_SIZE};
use crate::error::{Error, ProtocolError, Result};
use crate::identity::{ControllerIdentity, ControllerIdentityResolver, HostnameSource};
use crate::report::{StateReport, StateSummary};
use crate::runtime::{Reactor, Registration, Scheduler};
use crate::state::{ClusterHbsState, StateHistory};
use crate::transport;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Called once when the next cluster message has been processed.
pub type QueryCallback = Box<dyn FnOnce() + Send + 'static>;

/// What a query or pulse call did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// A datagram was sent with this request id.
    Sent {
        /// Request id carried by the datagram, 0 for alive pulses.
        reqid: u16,
    },
    /// An alive pulse was skipped because a send was already in progress.
    Collapsed,
}

/// Single-flight latch for sends.
#[derive(Debug, Default)]
struct SendGate {
    sending: AtomicBool,
}

impl SendGate {
    fn try_acquire(&self) -> Option<SendGuard<'_>> {
        if self.sending.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(SendGuard { gate: self })
        }
    }
}

/// Releases the gate when dropped.
struct SendGuard<'a> {
    gate: &'a SendGate,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.gate.sending.store(false, Ordering::Release);
    }
}

struct Inner {
    socket: Option<Arc<UdpSocket>>,
    history: StateHistory,
    callbacks: VecDeque<QueryCallback>,
    registrations: Vec<Registration>,
}

/// Client keeping the cluster heartbeat state in sync with the local agent.
pub struct ClusterHbsClient {
    inner: Mutex<Inner>,
    gate: SendGate,
    destination: SocketAddr,
    local_addr: SocketAddr,
    identity: ControllerIdentity,
}

/// Request id derived from the sub-second clock, in `[1, 0xFFFE]`.
fn generate_reqid() -> u16 {
    #[allow(clippy::cast_possible_truncation)]
    let low = Utc::now().timestamp_subsec_nanos() as u16;
    low % 0xFFFE + 1
}

impl ClusterHbsClient {
    /// Resolve identity, bind the socket, register for readability and
    /// schedule the periodic alive pulse.
    ///
    /// Nothing acquired before a failing step is left behind. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that failed.
    pub fn initialize(
        config: &ClientConfig,
        hostname: impl HostnameSource + 'static,
        reactor: &dyn Reactor,
        scheduler: &dyn Scheduler,
    ) -> Result<Arc<Self>> {
        let resolver =
            ControllerIdentityResolver::with_controller0_name(hostname, &config.controller0_name);
        let identity = resolver.resolve().inspect_err(|_| {
            error!("Failed to get controller index");
        })?;

        let destination = transport::destination(config.server_port);
        let socket = Arc::new(transport::bind(config.client_port).inspect_err(|_| {
            error!("Failed to open socket");
        })?);
        let local_addr = socket.local_addr()?;
        let watched = Arc::downgrade(&socket);

        // The slot holds the only strong reference to the socket.
        let client = Arc::new(Self {
            inner: Mutex::new(Inner {
                socket: Some(socket),
                history: StateHistory::default(),
                callbacks: VecDeque::new(),
                registrations: Vec::new(),
            }),
            gate: SendGate::default(),
            destination,
            local_addr,
            identity,
        });

        // On failure `client` drops here, closing the socket and cancelling
        // whatever was already registered.
        let weak = Arc::downgrade(&client);
        let readable = reactor
            .register(
                watched,
                Arc::new(move || {
                    if let Some(client) = weak.upgrade() {
                        client.handle_readable();
                    }
                }),
            )
            .inspect_err(|_| error!("Failed to register socket for readability"))?;
        client.inner.lock().registrations.push(readable);

        let weak: Weak<Self> = Arc::downgrade(&client);
        let pulse = scheduler.schedule(
            "send hbs-cluster query",
            config.pulse_interval,
            Arc::new(move || {
                let Some(client) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = client.send_alive_pulse() {
                    debug!("Alive pulse not sent: {e}");
                }
            }),
        )?;
        client.inner.lock().registrations.push(pulse);

        info!(
            "Cluster hbs client on {local_addr} querying {destination}, controller index {}",
            identity.this_index()
        );
        Ok(client)
    }

    /// Send a query to the heartbeat agent.
    ///
    /// Without a callback this is an alive pulse: request id 0, no response
    /// expected, and skipped if another send is in progress. With a callback
    /// it is a data request; the callback runs once the next cluster message
    /// has been processed. There is no timeout at this layer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`finalize`](Self::finalize), or
    /// [`Error::Send`] if the datagram could not be sent. The callback is
    /// dropped without being called in both cases.
    pub fn query(&self, callback: Option<QueryCallback>) -> Result<SendOutcome> {
        let alive_pulse = callback.is_none();

        let guard = self.gate.try_acquire();
        if guard.is_none() && alive_pulse {
            return Ok(SendOutcome::Collapsed);
        }

        let mut inner = self.inner.lock();
        let socket = inner.socket.as_ref().ok_or(Error::Closed)?;

        let reqid = if alive_pulse {
            INVALID_REQ_ID
        } else {
            generate_reqid()
        };
        let payload = QueryRequest::cluster_info(reqid).encode()?;

        if reqid != INVALID_REQ_ID {
            info!("send hbs cluster query [{reqid}]");
        }

        transport::send_datagram(socket, &payload, self.destination).map_err(|source| {
            error!("Failed to send msg. Error {source}");
            Error::Send {
                addr: self.destination,
                source,
            }
        })?;

        if let Some(callback) = callback {
            inner.callbacks.push_back(callback);
        }
        drop(inner);
        drop(guard);

        Ok(SendOutcome::Sent { reqid })
    }

    /// Send an alive pulse.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub fn send_alive_pulse(&self) -> Result<SendOutcome> {
        self.query(None)
    }

    /// Send a data request and wait for the next processed message.
    ///
    /// Callers needing a deadline should wrap this in `tokio::time::timeout`.
    ///
    /// # Errors
    ///
    /// Returns the send error, or [`Error::Closed`] if the client is
    /// finalized while waiting.
    pub async fn query_state(&self) -> Result<ClusterHbsState> {
        let (tx, rx) = oneshot::channel();
        self.query(Some(Box::new(move || {
            let _ = tx.send(());
        })))?;
        rx.await.map_err(|_| Error::Closed)?;
        Ok(self.current_state())
    }

    /// Drain every queued datagram from the socket slot.
    ///
    /// Each read happens under the lock, so a finalized client reads nothing.
    fn handle_readable(&self) {
        let mut buf = [0u8; MAX_MESSAGE_SIZE + 1];
        loop {
            let received = {
                let inner = self.inner.lock();
                let Some(socket) = inner.socket.as_ref() else {
                    return;
                };
                socket.try_recv(&mut buf)
            };
            let len = match received {
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!("Failed to read socket. error {e}");
                    return;
                }
            };
            debug!("msg received {len} bytes. buffer size {}", buf.len());

            if let Err(e) = self.process_datagram(&buf[..len]) {
                warn!("Discarding cluster hbs message: {e}");
            }
        }
    }

    /// Decode, reduce and apply one datagram, then run pending callbacks.
    ///
    /// A rejected datagram changes nothing and leaves callbacks queued.
    fn process_datagram(&self, data: &[u8]) -> std::result::Result<bool, ProtocolError> {
        let message = ClusterMessage::decode(data)?;
        debug!(
            "msg version {}, revision {}, size {}, reqid {}, period {} number of rec {}",
            message.header.version,
            message.header.revision,
            message.header.bytes,
            message.header.reqid,
            message.header.period_msec,
            message.header.histories
        );

        let now = Utc::now();
        let state = ClusterHbsState::reduce(&message, now);

        let (changed, callbacks) = {
            let mut inner = self.inner.lock();
            let changed = inner.history.apply(state);
            if changed {
                info!("{}", StateSummary::new(inner.history.current(), now));
            }
            (changed, std::mem::take(&mut inner.callbacks))
        };

        if changed {
            debug!("cluster hbs state changed");
        } else {
            debug!("cluster hbs state unchanged");
        }

        for callback in callbacks {
            callback();
        }
        Ok(changed)
    }

    /// Copy of the current state.
    #[must_use]
    pub fn current_state(&self) -> ClusterHbsState {
        *self.inner.lock().history.current()
    }

    /// Copy of the state current replaced at the last change.
    #[must_use]
    pub fn previous_state(&self) -> ClusterHbsState {
        *self.inner.lock().history.previous()
    }

    /// Slot of the local controller.
    #[must_use]
    pub const fn this_controller_index(&self) -> usize {
        self.identity.this_index()
    }

    /// Slot of the peer controller.
    #[must_use]
    pub const fn peer_controller_index(&self) -> usize {
        self.identity.peer_index()
    }

    /// Address queries are sent to.
    #[must_use]
    pub const fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Address the client socket is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of callbacks waiting for the next message.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    /// Diagnostic report of the current and previous states.
    #[must_use]
    pub fn report(&self) -> StateReport {
        let inner = self.inner.lock();
        StateReport::new(*inner.history.current(), *inner.history.previous(), Utc::now())
    }

    /// Whether [`finalize`](Self::finalize) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().socket.is_none()
    }

    /// Close the socket, cancel registrations and drop pending callbacks.
    ///
    /// The socket is closed before this returns, so the client port can be
    /// bound again right away. Calling this more than once is harmless.
    pub fn finalize(&self) {
        let (registrations, callbacks) = {
            let mut inner = self.inner.lock();
            let Some(socket) = inner.socket.take() else {
                return;
            };
            drop(socket);
            (
                std::mem::take(&mut inner.registrations),
                std::mem::take(&mut inner.callbacks),
            )
        };

        for registration in registrations {
            registration.cancel();
        }
        if !callbacks.is_empty() {
            debug!("Dropping {} pending cluster hbs callbacks", callbacks.len());
        }
        drop(callbacks);
        info!("Cluster hbs client finalized");
    }
}

impl Drop for ClusterHbsClient {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for ClusterHbsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHbsClient")
            .field("destination", &self.destination)
            .field("local_addr", &self.local_addr)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
