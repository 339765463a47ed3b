// messages.rs — protocol message handlers
//
// Incoming datagrams reach handle_message() with the 4-byte prefix already
// stripped. Commands are recognised by literal prefix match, as in the rest
// of the Quake protocol family.

use std::net::SocketAddr;

use qmaster_common::common::{msg_print, MsgLevel, PACKET_PREFIX};
use qmaster_common::q_shared::{
    info_value_for_key, parse_int_strict, parse_leading_int, truncate_to, GAMENAME_LENGTH,
};
use rand::Rng;

use crate::addrmap::AddrmapList;
use crate::server::{MasterContext, PacketSink, ServerEntry, ServerState};

// ============================================================
// Constants
// ============================================================

/// Timeout after a valid infoResponse (in seconds).
const TIMEOUT_INFORESPONSE: u64 = 15 * 60;

/// Period of validity for a challenge string (in seconds).
const TIMEOUT_CHALLENGE: u64 = 2;

/// Gamename used for Q3A, which doesn't send one.
const GAMENAME_Q3A: &str = "Quake3Arena";

/// Maximum size of a response packet.
const MAX_PACKET_SIZE_OUT: usize = 1400;

/// Challenge length bounds (inclusive).
const CHALLENGE_MIN_LENGTH: usize = 9;
const CHALLENGE_MAX_LENGTH: usize = 11;

/// End-of-transmission marker closing every response packet.
const EOT: [u8; 7] = [b'\\', b'E', b'O', b'T', 0, 0, 0];

// Types of messages (with samples):

// Q3: "heartbeat QuakeArena-1\x0A"
// DP: "heartbeat DarkPlaces\x0A"
const S2M_HEARTBEAT: &str = "heartbeat";

// Q3 & DP & QFusion: "getinfo A_Challenge"
const M2S_GETINFO: &str = "getinfo";

// Q3 & DP & QFusion: "infoResponse\x0A\\pure\\1\\..."
const S2M_INFORESPONSE: &str = "infoResponse\x0A";

// Q3: "getservers 67 empty full"
// DP: "getservers DarkPlaces-Quake 3 empty full"
const C2M_GETSERVERS: &str = "getservers ";

// DP: "getserversExt DarkPlaces-Quake 3 empty full ipv4 ipv6"
// IOQuake3: "getserversExt 68 empty ipv6"
const C2M_GETSERVERSEXT: &str = "getserversExt ";

const M2C_GETSERVERSRESPONSE: &str = "getserversResponse";
const M2C_GETSERVERSEXTRESPONSE: &str = "getserversExtResponse";

// ============================================================
// BuildChallenge
//
// Build a challenge string for a "getinfo" message
// ============================================================

fn build_challenge(rng: &mut impl Rng) -> String {
    let length = rng.gen_range(CHALLENGE_MIN_LENGTH..=CHALLENGE_MAX_LENGTH);
    let mut challenge = String::with_capacity(length);

    while challenge.len() < length {
        let c: u8 = rng.gen_range(33..=126);
        // Skip the characters that would break the infostring echo
        if matches!(c, b'\\' | b';' | b'"' | b'%' | b'/') {
            continue;
        }
        challenge.push(c as char);
    }

    challenge
}

// ============================================================
// SendGetInfo
//
// Send a "getinfo" message to a server
// ============================================================

fn send_getinfo(ctx: &mut MasterContext, ind: usize, sink: &mut dyn PacketSink) {
    let MasterContext {
        servers, rng, time, ..
    } = ctx;
    let now = *time;

    let Some(server) = servers.entry_mut(ind) else {
        return;
    };

    if server.challenge_timeout == 0 || server.challenge_timeout < now {
        server.challenge = build_challenge(rng);
    }
    server.challenge_timeout = now + TIMEOUT_CHALLENGE;

    let mut msg = Vec::with_capacity(64);
    msg.extend_from_slice(&PACKET_PREFIX);
    msg.extend_from_slice(M2S_GETINFO.as_bytes());
    msg.push(b' ');
    msg.extend_from_slice(server.challenge.as_bytes());

    let to = server.address;
    let challenge = server.challenge.clone();
    if let Err(e) = sink.send(to, &msg) {
        msg_print(
            MsgLevel::Warning,
            &format!("> WARNING: can't send getinfo ({})", e),
        );
    } else {
        msg_print(
            MsgLevel::Debug,
            &format!("> {} <--- getinfo with challenge \"{}\"", to, challenge),
        );
    }
}

// ============================================================
// HandleInfoResponse
//
// Parse infoResponse messages
// ============================================================

fn handle_info_response(ctx: &mut MasterContext, ind: usize, msg: &str, from: SocketAddr) {
    let now = ctx.time;

    // Check the challenge
    {
        let Some(server) = ctx.servers.entry(ind) else {
            return;
        };
        if server.challenge_timeout == 0 || server.challenge_timeout < now {
            msg_print(
                MsgLevel::Warning,
                &format!("> WARNING: infoResponse with obsolete challenge from {}", from),
            );
            return;
        }
        let value = info_value_for_key(msg, "challenge");
        if value.as_deref() != Some(server.challenge.as_str()) {
            msg_print(
                MsgLevel::Error,
                &format!(
                    "> ERROR: invalid challenge from {} ({})",
                    from,
                    value.as_deref().unwrap_or("")
                ),
            );
            return;
        }
    }

    // Check the value of "protocol"
    let new_protocol = match info_value_for_key(msg, "protocol") {
        None => {
            msg_print(
                MsgLevel::Error,
                &format!("> ERROR: invalid infoResponse from {} (no protocol value)", from),
            );
            return;
        }
        Some(value) => match parse_int_strict(&value) {
            Some(p) => p,
            None => {
                msg_print(
                    MsgLevel::Error,
                    &format!(
                        "> ERROR: invalid infoResponse from {} (invalid protocol value: {})",
                        from, value
                    ),
                );
                return;
            }
        },
    };

    // Check the value of "sv_maxclients"
    let new_maxclients = info_value_for_key(msg, "sv_maxclients")
        .map(|value| parse_leading_int(&value))
        .unwrap_or(0);
    if new_maxclients <= 0 {
        msg_print(
            MsgLevel::Error,
            &format!(
                "> ERROR: invalid infoResponse from {} (sv_maxclients = {})",
                from, new_maxclients
            ),
        );
        return;
    }

    // Check the presence of "clients"
    let Some(clients_value) = info_value_for_key(msg, "clients") else {
        msg_print(
            MsgLevel::Error,
            &format!(
                "> ERROR: invalid infoResponse from {} (no \"clients\" value)",
                from
            ),
        );
        return;
    };
    let new_clients = parse_leading_int(&clients_value);

    // Q3A doesn't send a gamename, so we add it manually
    let gamename = match info_value_for_key(msg, "gamename") {
        None => GAMENAME_Q3A.to_string(),
        Some(value) if value.is_empty() => {
            msg_print(
                MsgLevel::Error,
                &format!("> ERROR: invalid infoResponse from {} (game name is void)", from),
            );
            return;
        }
        Some(value) if value.contains(char::is_whitespace) => {
            msg_print(
                MsgLevel::Error,
                &format!(
                    "> ERROR: invalid infoResponse from {} (game name contains whitespaces)",
                    from
                ),
            );
            return;
        }
        Some(value) => truncate_to(&value, GAMENAME_LENGTH - 1).to_string(),
    };

    let Some(server) = ctx.servers.entry_mut(ind) else {
        return;
    };

    // If the gamename has changed
    if server.gamename != gamename {
        // If the server had already been initialized, warn about it
        if !server.gamename.is_empty() {
            msg_print(
                MsgLevel::Warning,
                &format!(
                    "> Server {} updated its gamename: \"{}\" -> \"{}\"",
                    from, server.gamename, gamename
                ),
            );
        }
        server.gamename = gamename;
    }

    // Save some useful informations in the server entry
    server.protocol = new_protocol;
    server.state = if new_clients == 0 {
        ServerState::Empty
    } else if new_clients == new_maxclients {
        ServerState::Full
    } else {
        ServerState::Occupied
    };

    // Set a new timeout
    server.timeout = now + TIMEOUT_INFORESPONSE;
}

// ============================================================
// HandleGetServers
//
// Parse getservers requests and send the appropriate response
// ============================================================

fn handle_getservers(
    ctx: &mut MasterContext,
    msg: &str,
    from: SocketAddr,
    sink: &mut dyn PacketSink,
    extended: bool,
) {
    // Check if there's a name before the protocol number. In this case, the
    // message comes from a DarkPlaces-compatible client.
    let first = msg.split(' ').next().unwrap_or("");
    let (gamename, options) = match parse_int_strict(first) {
        Some(_) => (GAMENAME_Q3A.to_string(), msg),
        None => {
            let gamename = truncate_to(first, GAMENAME_LENGTH - 1).to_string();
            let rest = &msg[first.len()..];
            (gamename, rest.strip_prefix(' ').unwrap_or(rest))
        }
    };
    let protocol = parse_leading_int(options);

    msg_print(
        MsgLevel::Normal,
        &format!(
            "> {} ---> {} ({})",
            if extended { "getserversExt" } else { "getservers" },
            from,
            gamename
        ),
    );

    // Parse the filtering options
    let mut opt_empty = false;
    let mut opt_full = false;
    let mut opt_ipv4 = !extended;
    let mut opt_ipv6 = false;
    for option in options.split(' ') {
        match option {
            "empty" => opt_empty = true,
            "full" => opt_full = true,
            "ipv4" if extended => opt_ipv4 = true,
            "ipv6" if extended => opt_ipv6 = true,
            _ => {}
        }
    }

    // If no IP version was given for the filtering, accept any version
    if !opt_ipv4 && !opt_ipv6 {
        opt_ipv4 = true;
        opt_ipv6 = true;
    }

    // Initialize the packet contents with the header
    let request_name = if extended {
        M2C_GETSERVERSEXTRESPONSE
    } else {
        M2C_GETSERVERSRESPONSE
    };
    let mut packet: Vec<u8> = Vec::with_capacity(MAX_PACKET_SIZE_OUT);
    packet.extend_from_slice(&PACKET_PREFIX);
    packet.extend_from_slice(request_name.as_bytes());
    let header_size = packet.len();

    // Add every relevant server
    let mut nb_servers = 0u32;
    let mut ind = 0usize;
    while let Some(i) = ctx.servers.next_active(ind, ctx.time) {
        ind = i + 1;
        let Some(sv) = ctx.servers.entry(i) else {
            continue;
        };

        // Check protocol, options and gamename
        let family_ok = if sv.address.is_ipv6() { opt_ipv6 } else { opt_ipv4 };
        if sv.state <= ServerState::Uninitialized
            || !family_ok
            || sv.protocol != protocol
            || (sv.state == ServerState::Empty && !opt_empty)
            || (sv.state == ServerState::Full && !opt_full)
            || sv.gamename != gamename
        {
            // Skip it
            continue;
        }

        let record = encode_record(sv, &ctx.addrmaps);

        // If the record wouldn't fit, flush the current packet first
        if packet.len() + record.len() + EOT.len() > MAX_PACKET_SIZE_OUT {
            flush_response(&mut packet, from, sink, request_name, nb_servers);
            packet.truncate(header_size);
        }

        packet.extend_from_slice(&record);
        nb_servers += 1;
    }

    flush_response(&mut packet, from, sink, request_name, nb_servers);
}

/// Encode one server as a response record, applying its address mapping.
fn encode_record(sv: &ServerEntry, addrmaps: &AddrmapList) -> Vec<u8> {
    match sv.address {
        SocketAddr::V4(a4) => {
            let mut ip = a4.ip().octets();
            let mut port = a4.port();

            // Use the address mapping associated with the server, if any
            if let Some(map) = sv.addrmap.and_then(|m| addrmaps.get(m)) {
                ip = map.to.ip().octets();
                if map.to.port() != 0 {
                    port = map.to.port();
                }
            }

            let mut record = Vec::with_capacity(7);
            record.push(b'\\');
            record.extend_from_slice(&ip);
            record.extend_from_slice(&port.to_be_bytes());
            record
        }
        SocketAddr::V6(a6) => {
            let mut record = Vec::with_capacity(19);
            record.push(b'/');
            record.extend_from_slice(&a6.ip().octets());
            record.extend_from_slice(&a6.port().to_be_bytes());
            record
        }
    }
}

/// Terminate the packet with the EOT marker and send it.
fn flush_response(
    packet: &mut Vec<u8>,
    to: SocketAddr,
    sink: &mut dyn PacketSink,
    request_name: &str,
    nb_servers: u32,
) {
    packet.extend_from_slice(&EOT);
    if let Err(e) = sink.send(to, packet) {
        msg_print(
            MsgLevel::Warning,
            &format!("> WARNING: can't send {} ({})", request_name, e),
        );
    } else {
        msg_print(
            MsgLevel::Debug,
            &format!("> {} <--- {} ({} servers)", request_name, to, nb_servers),
        );
    }
}

// ============================================================
// HandleMessage
//
// Parse a packet to figure out what to do with it
// ============================================================

/// Handle one datagram, already stripped of its 4-byte prefix.
pub fn handle_message(
    ctx: &mut MasterContext,
    msg: &[u8],
    from: SocketAddr,
    sink: &mut dyn PacketSink,
) {
    let text = String::from_utf8_lossy(msg);

    // If it's an heartbeat
    if let Some(rest) = text.strip_prefix(S2M_HEARTBEAT) {
        // Extract the game id
        let game_id = rest.split_whitespace().next().unwrap_or("");
        msg_print(
            MsgLevel::Debug,
            &format!("> {} ---> heartbeat ({})", from, truncate_to(game_id, 63)),
        );

        // Get the server in the list (add it to the list if necessary)
        let ind = match ctx.servers.get_or_create(
            from,
            ctx.time,
            &ctx.addrmaps,
            ctx.allow_loopback,
        ) {
            Ok(ind) => ind,
            Err(err) => {
                msg_print(
                    MsgLevel::Warning,
                    &format!("> WARNING: server {} isn't allowed ({})", from, err),
                );
                return;
            }
        };

        // Ask for some infos
        send_getinfo(ctx, ind, sink);
    }
    // If it's an infoResponse message
    else if let Some(rest) = text.strip_prefix(S2M_INFORESPONSE) {
        msg_print(MsgLevel::Debug, &format!("> {} ---> infoResponse", from));

        let Some(ind) = ctx.servers.get(from, ctx.time) else {
            msg_print(
                MsgLevel::Warning,
                &format!("> WARNING: infoResponse from unknown server {}", from),
            );
            return;
        };

        handle_info_response(ctx, ind, rest, from);
    }
    // If it's a getservers request
    else if let Some(rest) = text.strip_prefix(C2M_GETSERVERS) {
        handle_getservers(ctx, rest, from, sink, false);
    }
    // If it's a getserversExt request
    else if let Some(rest) = text.strip_prefix(C2M_GETSERVERSEXT) {
        handle_getservers(ctx, rest, from, sink, true);
    }
}

// ============================================================
// Tests
// ============================================================
