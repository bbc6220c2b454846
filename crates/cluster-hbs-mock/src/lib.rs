//! Mock heartbeat agent for exercising the cluster heartbeat client.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod port_allocator;

pub use error::Error;
pub use port_allocator::{allocate_port, is_port_available};

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sm_cluster_hbs::constants::INVALID_REQ_ID;
use sm_cluster_hbs::{ClusterMessage, QueryRequest};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Shared {
    response: Mutex<ClusterMessage>,
    queries: Mutex<Vec<QueryRequest>>,
    last_peer: Mutex<Option<SocketAddr>>,
    silent: AtomicBool,
}

/// Heartbeat agent stand-in listening on loopback UDP.
///
/// Records every query it receives and answers data requests (nonzero
/// request id) with the configured cluster message. Alive pulses are
/// recorded but never answered.
#[derive(Debug)]
pub struct MockHbsAgent {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl MockHbsAgent {
    /// Start an agent on a freshly allocated port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the socket cannot be bound.
    pub async fn start() -> Result<Self, Error> {
        Self::start_on(allocate_port()).await
    }

    /// Start an agent on `port`, 0 for any free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the socket cannot be bound.
    pub async fn start_on(port: u16) -> Result<Self, Error> {
        let socket = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .map_err(Error::Bind)?;
        let addr = socket.local_addr().map_err(Error::Bind)?;
        let socket = Arc::new(socket);
        let shared = Arc::new(Shared::default());
        let shutdown = CancellationToken::new();

        tokio::spawn(serve(
            Arc::clone(&socket),
            Arc::clone(&shared),
            shutdown.clone(),
        ));
        debug!("Mock hbs agent listening on {addr}");

        Ok(Self {
            socket,
            addr,
            shared,
            shutdown,
        })
    }

    /// Port the agent listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Address the agent listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Message returned to subsequent data requests.
    pub fn set_response(&self, message: ClusterMessage) {
        *self.shared.response.lock() = message;
    }

    /// Stop answering data requests while still recording them.
    pub fn set_silent(&self, silent: bool) {
        self.shared.silent.store(silent, Ordering::SeqCst);
    }

    /// Every query received so far, in arrival order.
    #[must_use]
    pub fn queries(&self) -> Vec<QueryRequest> {
        self.shared.queries.lock().clone()
    }

    /// Number of alive pulses received so far.
    #[must_use]
    pub fn alive_pulses(&self) -> usize {
        self.shared
            .queries
            .lock()
            .iter()
            .filter(|q| q.is_alive_pulse())
            .count()
    }

    /// Source address of the most recent query.
    #[must_use]
    pub fn last_peer(&self) -> Option<SocketAddr> {
        *self.shared.last_peer.lock()
    }

    /// Wait until at least `count` queries have been received.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if fewer arrive within `timeout`.
    pub async fn wait_for_queries(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<QueryRequest>, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let queries = self.queries();
            if queries.len() >= count {
                return Ok(queries);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    expected: count,
                    seen: queries.len(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Send an unsolicited cluster message to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Send`] if the datagram cannot be sent.
    pub async fn push(&self, to: SocketAddr, message: &ClusterMessage) -> Result<(), Error> {
        self.push_raw(to, &message.encode()).await
    }

    /// Send arbitrary bytes to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Send`] if the datagram cannot be sent.
    pub async fn push_raw(&self, to: SocketAddr, data: &[u8]) -> Result<(), Error> {
        self.socket
            .send_to(data, to)
            .await
            .map(|_| ())
            .map_err(Error::Send)
    }

    /// Stop serving.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockHbsAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(socket: Arc<UdpSocket>, shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("Mock hbs agent receive failed: {e}");
                    continue;
                }
            },
        };

        let query = match QueryRequest::decode(&buf[..len]) {
            Ok(query) => query,
            Err(e) => {
                warn!("Mock hbs agent ignoring malformed query: {e}");
                continue;
            }
        };
        debug!("Mock hbs agent received query {query:?} from {peer}");

        let reqid = query.reqid().unwrap_or(INVALID_REQ_ID);
        shared.queries.lock().push(query);
        *shared.last_peer.lock() = Some(peer);

        if reqid == INVALID_REQ_ID || shared.silent.load(Ordering::SeqCst) {
            continue;
        }

        let mut response = shared.response.lock().clone();
        response.header.reqid = reqid;
        if let Err(e) = socket.send_to(&response.encode(), peer).await {
            warn!("Mock hbs agent failed to answer {peer}: {e}");
        }
    }
    debug!("Mock hbs agent stopped");
}
