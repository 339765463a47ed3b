// server.rs — core registry types and constants

use std::io;
use std::net::SocketAddr;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::addrmap::AddrmapList;
use crate::servers::ServerList;

// ============================================================
// Constants
// ============================================================

/// Timeout for a newly added server, before its first valid infoResponse
/// (in seconds).
pub const TIMEOUT_HEARTBEAT: u64 = 2;

/// Default hash size, in bits.
pub const DEFAULT_HASH_SIZE: u32 = 6;

/// Maximum hash size, in bits.
pub const MAX_HASH_SIZE: u32 = 8;

pub const DEFAULT_MAX_NB_SERVERS: usize = 4096;

/// Default maximum number of servers sharing one IP address (0 = unlimited).
pub const DEFAULT_MAX_NB_SERVERS_PER_ADDRESS: usize = 32;

/// Default master port.
pub const DEFAULT_MASTER_PORT: u16 = 27950;

/// Maximum number of listening sockets.
pub const MAX_LISTEN_SOCKETS: usize = 8;

// ============================================================
// server state
// ============================================================

/// Population state of a registered server, derived from the clients /
/// sv_maxclients values of its last valid infoResponse. An unused slot has
/// no state at all; a freshly admitted server starts `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
#[derive(Default)]
pub enum ServerState {
    #[default]
    Uninitialized = 0,
    Empty = 1,
    Occupied = 2,
    Full = 3,
}

impl ServerState {
    pub fn name(&self) -> &'static str {
        match self {
            ServerState::Uninitialized => "not initialized",
            ServerState::Empty => "empty",
            ServerState::Occupied => "occupied",
            ServerState::Full => "full",
        }
    }
}

// ============================================================
// ServerEntry
// ============================================================

/// One registered game server.
pub struct ServerEntry {
    pub address: SocketAddr,
    pub protocol: i32,
    pub gamename: String,
    pub state: ServerState,

    /// Outstanding challenge token, empty until the first getinfo goes out.
    pub challenge: String,
    /// Challenge deadline in wall-clock seconds; 0 = no challenge outstanding.
    pub challenge_timeout: u64,

    /// Liveness deadline in wall-clock seconds.
    pub timeout: u64,

    /// Index into the address-mapping list, fixed at admission time.
    pub addrmap: Option<usize>,

    // Hash chain links, managed by ServerList
    pub(crate) next: Option<usize>,
    pub(crate) prev: Option<usize>,
    pub(crate) hash: usize,
}

impl ServerEntry {
    pub(crate) fn new(address: SocketAddr, now: u64, addrmap: Option<usize>) -> Self {
        Self {
            address,
            protocol: 0,
            gamename: String::new(),
            state: ServerState::Uninitialized,
            challenge: String::new(),
            challenge_timeout: 0,
            timeout: now + TIMEOUT_HEARTBEAT,
            addrmap,
            next: None,
            prev: None,
            hash: 0,
        }
    }
}

// ============================================================
// Admission errors
// ============================================================

/// Why a heartbeat from an unknown peer was refused registration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("max number of servers reached for this address")]
    QuotaExceeded,
    #[error("loopback address without address mapping")]
    LoopbackRefused,
    #[error("server list is full")]
    TableFull,
}

// ============================================================
// PacketSink — outgoing datagram seam
// ============================================================

/// Where the protocol engine writes reply datagrams. The event loop hands in
/// a sink bound to the socket the request arrived on; tests hand in a
/// recording sink.
pub trait PacketSink {
    fn send(&mut self, to: SocketAddr, data: &[u8]) -> io::Result<()>;
}

// ============================================================
// MasterContext — the whole registry state: server table,
// address mappings, current time and the challenge RNG
// ============================================================

pub struct MasterContext {
    pub servers: ServerList,
    pub addrmaps: AddrmapList,
    pub allow_loopback: bool,

    /// Current wall-clock time in seconds, refreshed by the event loop
    /// before each datagram is handled.
    pub time: u64,

    /// Challenge RNG, seeded once at startup.
    pub rng: SmallRng,
}

impl MasterContext {
    pub fn new(
        max_servers: usize,
        hash_bits: u32,
        max_per_address: usize,
        allow_loopback: bool,
        addrmaps: AddrmapList,
        seed: u64,
    ) -> Self {
        Self {
            servers: ServerList::new(max_servers, hash_bits, max_per_address),
            addrmaps,
            allow_loopback,
            time: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ordering_matches_filtering() {
        // getservers filtering relies on "state > uninitialized"
        assert!(ServerState::Empty > ServerState::Uninitialized);
        assert!(ServerState::Occupied > ServerState::Uninitialized);
        assert!(ServerState::Full > ServerState::Occupied);
    }

    #[test]
    fn new_entry_defaults() {
        let addr: SocketAddr = "192.0.2.7:26000".parse().unwrap();
        let e = ServerEntry::new(addr, 100, None);
        assert_eq!(e.state, ServerState::Uninitialized);
        assert_eq!(e.timeout, 100 + TIMEOUT_HEARTBEAT);
        assert_eq!(e.challenge_timeout, 0);
        assert!(e.gamename.is_empty());
        assert!(e.challenge.is_empty());
    }

    #[test]
    fn admission_error_messages() {
        assert_eq!(
            AdmissionError::QuotaExceeded.to_string(),
            "max number of servers reached for this address"
        );
        assert_eq!(AdmissionError::TableFull.to_string(), "server list is full");
    }
}
