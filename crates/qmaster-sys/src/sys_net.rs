// sys_net.rs -- listening sockets and reader threads
//
// One UDP socket per configured local address, each drained by a dedicated
// reader thread that feeds the shared packet queue. IPv6 sockets are opened
// V6-only so an entry's address family is always unambiguous.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;

use qmaster_common::common::{
    msg_print, MsgLevel, MAX_PACKET_SIZE_IN, MIN_PACKET_SIZE_IN, PACKET_PREFIX,
};
use qmaster_common::net_queue::{PacketQueueSender, QueuedPacket};
use socket2::{Domain, Protocol, Socket, Type};

pub struct ListenSocket {
    pub socket: UdpSocket,
    pub local: SocketAddr,
}

// =============================================================================
// Socket creation
// =============================================================================

fn open_socket(address: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if address.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // Don't accept IPv4-mapped connections on IPv6 sockets; the address
    // family stored per entry must match the socket the packet came in on
    if address.is_ipv6() {
        socket.set_only_v6(true)?;
    }

    socket.bind(&address.into())?;
    Ok(socket.into())
}

/// Bind one socket per listen address. Any bind failure aborts startup.
pub fn create_listen_sockets(addresses: &[SocketAddr]) -> Option<Vec<ListenSocket>> {
    let mut sockets = Vec::with_capacity(addresses.len());

    for &address in addresses {
        match open_socket(address) {
            Ok(socket) => {
                msg_print(MsgLevel::Normal, &format!("> Listening on {}", address));
                sockets.push(ListenSocket {
                    socket,
                    local: address,
                });
            }
            Err(e) => {
                msg_print(
                    MsgLevel::Error,
                    &format!("> ERROR: can't listen on {} ({})", address, e),
                );
                return None;
            }
        }
    }

    Some(sockets)
}

// =============================================================================
// Reader threads
// =============================================================================

/// Spawn the reader thread for one listening socket.
pub fn spawn_reader(index: usize, socket: UdpSocket, sender: PacketQueueSender) {
    thread::Builder::new()
        .name(format!("udp-io-{}", index))
        .spawn(move || reader_loop(index, socket, sender))
        .expect("failed to spawn UDP reader thread");
}

fn reader_loop(index: usize, socket: UdpSocket, sender: PacketQueueSender) {
    let mut buf = [0u8; MAX_PACKET_SIZE_IN];

    loop {
        match socket.recv_from(&mut buf) {
            Ok((size, from)) => {
                if size == 0 {
                    continue;
                }
                // A full queue drops the packet, which is fine for UDP
                let _ = sender.try_send(QueuedPacket::new(index, from, buf[..size].to_vec()));
            }
            Err(e) => {
                msg_print(
                    MsgLevel::Warning,
                    &format!("> WARNING: \"recvfrom\" returned an error ({})", e),
                );
            }
        }
    }
}

// =============================================================================
// Framing
// =============================================================================

/// A few sanity checks before a datagram reaches the protocol engine.
/// Rejected packets are counted as warnings; no response is sent.
pub fn validate_framing(from: &SocketAddr, data: &[u8]) -> bool {
    if from.port() == 0 {
        msg_print(
            MsgLevel::Warning,
            &format!("> WARNING: rejected packet from {} (source port = 0)", from),
        );
        return false;
    }
    if data.len() < MIN_PACKET_SIZE_IN {
        msg_print(
            MsgLevel::Warning,
            &format!(
                "> WARNING: rejected packet from {} (size = {} bytes)",
                from,
                data.len()
            ),
        );
        return false;
    }
    if data[..PACKET_PREFIX.len()] != PACKET_PREFIX {
        msg_print(
            MsgLevel::Warning,
            &format!("> WARNING: rejected packet from {} (invalid header)", from),
        );
        return false;
    }

    true
}

/// Render a packet for the debug trace, with non-printable bytes escaped.
pub fn format_packet(packet: &[u8]) -> String {
    let mut out = String::with_capacity(packet.len() + 16);
    out.push('"');
    for &c in packet {
        if c == b'\\' {
            out.push_str("\\\\");
        } else if (32..=127).contains(&c) {
            out.push(c as char);
        } else {
            out.push_str(&format!("\\x{:02X}", c));
        }
    }
    out.push('"');
    out.push_str(&format!(" ({} bytes)", packet.len()));
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn from_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 7], port))
    }

    // -------------------------------------------------------
    // validate_framing
    // -------------------------------------------------------

    #[test]
    fn accepts_well_framed_packet() {
        assert!(validate_framing(
            &from_addr(26000),
            b"\xFF\xFF\xFF\xFFheartbeat DarkPlaces\x0A"
        ));
    }

    #[test]
    fn rejects_source_port_zero() {
        assert!(!validate_framing(
            &from_addr(0),
            b"\xFF\xFF\xFF\xFFheartbeat DarkPlaces\x0A"
        ));
    }

    #[test]
    fn rejects_short_packet() {
        assert!(!validate_framing(&from_addr(26000), b"\xFF\xFF\xFF\xFF"));
        assert!(!validate_framing(&from_addr(26000), b""));
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(!validate_framing(
            &from_addr(26000),
            b"\xFF\xFF\xFF\xFEheartbeat"
        ));
        assert!(!validate_framing(&from_addr(26000), b"heartbeat DP\x0A"));
    }

    // -------------------------------------------------------
    // format_packet
    // -------------------------------------------------------

    #[test]
    fn format_escapes_non_printables() {
        let s = format_packet(b"\xFF\xFF\xFF\xFFgetinfo A");
        assert_eq!(s, "\"\\xFF\\xFF\\xFF\\xFFgetinfo A\" (13 bytes)");
    }

    #[test]
    fn format_escapes_backslash() {
        let s = format_packet(b"\\EOT\0\0\0");
        assert_eq!(s, "\"\\\\EOT\\x00\\x00\\x00\" (7 bytes)");
    }

    // -------------------------------------------------------
    // Socket creation
    // -------------------------------------------------------

    #[test]
    fn binds_ephemeral_ipv4_socket() {
        let sockets =
            create_listen_sockets(&["127.0.0.1:0".parse().unwrap()]).expect("bind failed");
        assert_eq!(sockets.len(), 1);
        assert!(sockets[0].socket.local_addr().unwrap().port() != 0);
    }
}
