use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, UdpSocket};
use std::sync::LazyLock;
use std::time::SystemTime;

use parking_lot::Mutex;

/// Next candidate port, seeded from the clock to keep parallel test binaries apart.
static NEXT_PORT: LazyLock<Mutex<u16>> = LazyLock::new(|| {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    #[allow(clippy::cast_possible_truncation)]
    let offset = (hasher.finish() % 10000) as u16;
    Mutex::new(15000 + offset)
});

/// Allocate a loopback UDP port that is currently free.
///
/// # Panics
///
/// Panics if no free port is found in 10000 attempts.
#[must_use]
pub fn allocate_port() -> u16 {
    let mut next = NEXT_PORT.lock();

    for _ in 0..10000 {
        let port = *next;
        *next = if port >= 60000 { 15000 } else { port + 1 };

        if is_port_available(port) {
            return port;
        }
    }

    panic!("No available UDP ports found after trying 10000 ports")
}

/// Whether `port` can be bound on loopback right now.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], port))).is_ok()
}
