// main.rs -- startup and the event loop
//
// qmaster, a master server for DarkPlaces, Quake 3 Arena and any game
// supporting the DarkPlaces master server protocol.

mod sys_net;

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use qmaster_common::common::{self, msg_print, MsgLevel};
use qmaster_common::net::parse_listen_address;
use qmaster_common::net_queue::{PacketQueue, DEFAULT_QUEUE_CAPACITY};
use qmaster_server::addrmap::AddrmapList;
use qmaster_server::messages::handle_message;
use qmaster_server::server::{
    MasterContext, PacketSink, DEFAULT_HASH_SIZE, DEFAULT_MASTER_PORT, DEFAULT_MAX_NB_SERVERS,
    DEFAULT_MAX_NB_SERVERS_PER_ADDRESS, MAX_HASH_SIZE, MAX_LISTEN_SOCKETS,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Command line
// =============================================================================

/// A master server supporting the DarkPlaces and Quake III Arena master
/// server protocols.
#[derive(Parser, Debug)]
#[command(name = "qmaster", version)]
struct Options {
    /// Accept servers on loopback interfaces (for debugging purposes only)
    #[arg(long = "allow-loopback")]
    allow_loopback: bool,

    /// Hash size in bits, up to 8
    #[arg(
        short = 'H',
        long = "hash-size",
        value_name = "hash_size",
        default_value_t = DEFAULT_HASH_SIZE
    )]
    hash_size: u32,

    /// Listen on local address <address> (up to 8 addresses)
    #[arg(short = 'l', long = "listen", value_name = "address")]
    listen: Vec<String>,

    /// Enable the logging to disk
    #[arg(short = 'L', long = "log")]
    log: bool,

    /// Use <file_path> as the log file
    #[arg(long = "log-file", value_name = "file_path", default_value = "qmaster.log")]
    log_file: PathBuf,

    /// Map address <a1> to <a2> when sending it to clients.
    /// Addresses can contain a port number (ex: myaddr.net:1234)
    #[arg(short = 'm', long = "map", value_name = "a1=a2")]
    map: Vec<String>,

    /// Maximum number of servers recorded
    #[arg(
        short = 'n',
        long = "max-servers",
        value_name = "max_servers",
        default_value_t = DEFAULT_MAX_NB_SERVERS
    )]
    max_servers: usize,

    /// Maximum number of servers per address (0 means there's no limit)
    #[arg(
        short = 'N',
        long = "max-servers-per-addr",
        value_name = "max_per_addr",
        default_value_t = DEFAULT_MAX_NB_SERVERS_PER_ADDRESS
    )]
    max_servers_per_addr: usize,

    /// Default network port
    #[arg(
        short = 'p',
        long = "port",
        value_name = "port_num",
        default_value_t = DEFAULT_MASTER_PORT
    )]
    port: u16,

    /// Verbose level, up to 4 (no value means max)
    #[arg(
        short = 'v',
        long = "verbose",
        value_name = "verbose_lvl",
        num_args = 0..=1,
        default_missing_value = "4"
    )]
    verbose: Option<u32>,
}

// =============================================================================
// Outgoing datagrams
// =============================================================================

/// Replies go out through the socket the request arrived on.
struct UdpSink<'a> {
    socket: &'a UdpSocket,
}

impl PacketSink for UdpSink<'_> {
    fn send(&mut self, to: SocketAddr, data: &[u8]) -> io::Result<()> {
        self.socket.send_to(data, to).map(|_| ())
    }
}

// =============================================================================
// Startup
// =============================================================================

fn main() -> ExitCode {
    let opts = Options::parse();

    let max_level = match opts.verbose {
        None => MsgLevel::Normal,
        Some(value) => match MsgLevel::from_value(value) {
            Some(level) => level,
            None => {
                eprintln!("> ERROR: invalid verbose level ({})", value);
                return ExitCode::FAILURE;
            }
        },
    };
    common::set_max_msg_level(max_level);

    msg_print(
        MsgLevel::Normal,
        &format!(
            "qmaster, a master server supporting the DarkPlaces\nand Quake III Arena master server protocols (version {})",
            VERSION
        ),
    );

    if opts.hash_size > MAX_HASH_SIZE {
        msg_print(
            MsgLevel::Error,
            &format!("> ERROR: invalid hash size ({}, maximum is {})", opts.hash_size, MAX_HASH_SIZE),
        );
        return ExitCode::FAILURE;
    }
    if opts.max_servers == 0 {
        msg_print(MsgLevel::Error, "> ERROR: invalid maximum number of servers (0)");
        return ExitCode::FAILURE;
    }

    if opts.log {
        if let Err(e) = common::open_log_file(&opts.log_file) {
            msg_print(
                MsgLevel::Error,
                &format!("> ERROR: can't open the log file {} ({})", opts.log_file.display(), e),
            );
            return ExitCode::FAILURE;
        }
    }

    // Resolve the address mapping list before anything binds
    let mut addrmaps = AddrmapList::new();
    for rule in &opts.map {
        if !addrmaps.add(rule) {
            return ExitCode::FAILURE;
        }
    }
    if !addrmaps.resolve() {
        return ExitCode::FAILURE;
    }

    // Resolve the listening socket addresses
    if opts.listen.len() > MAX_LISTEN_SOCKETS {
        msg_print(
            MsgLevel::Error,
            &format!("> ERROR: you can listen on up to {} addresses", MAX_LISTEN_SOCKETS),
        );
        return ExitCode::FAILURE;
    }
    let mut addresses: Vec<SocketAddr> = Vec::new();
    if opts.listen.is_empty() {
        addresses.push(SocketAddr::from((Ipv4Addr::UNSPECIFIED, opts.port)));
        addresses.push(SocketAddr::from((Ipv6Addr::UNSPECIFIED, opts.port)));
    } else {
        for listen in &opts.listen {
            match parse_listen_address(listen, opts.port) {
                Some(address) => addresses.push(address),
                None => {
                    msg_print(
                        MsgLevel::Error,
                        &format!("> ERROR: can't resolve listen address \"{}\"", listen),
                    );
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    let Some(sockets) = sys_net::create_listen_sockets(&addresses) else {
        return ExitCode::FAILURE;
    };
    if sockets.is_empty() {
        msg_print(
            MsgLevel::Error,
            "> ERROR: there's no listening socket. There's nothing to do",
        );
        return ExitCode::FAILURE;
    }

    // Init the time and the challenge seed
    let now = common::unix_seconds();
    let mut ctx = MasterContext::new(
        opts.max_servers,
        opts.hash_size,
        opts.max_servers_per_addr,
        opts.allow_loopback,
        addrmaps,
        now,
    );
    ctx.time = now;

    let queue = PacketQueue::new(DEFAULT_QUEUE_CAPACITY);
    for (index, listen) in sockets.iter().enumerate() {
        let socket = match listen.socket.try_clone() {
            Ok(socket) => socket,
            Err(e) => {
                msg_print(
                    MsgLevel::Error,
                    &format!("> ERROR: can't clone the socket for {} ({})", listen.local, e),
                );
                return ExitCode::FAILURE;
            }
        };
        sys_net::spawn_reader(index, socket, queue.sender());
    }

    run_event_loop(&mut ctx, &sockets, &queue, opts.max_servers);
    ExitCode::SUCCESS
}

// =============================================================================
// Event loop
// =============================================================================

fn run_event_loop(
    ctx: &mut MasterContext,
    sockets: &[sys_net::ListenSocket],
    queue: &PacketQueue,
    max_servers: usize,
) {
    // Opportunistic sweeps happen during table walks; this cadence keeps
    // timeouts bounded even when no traversal runs
    let sweep_every = (max_servers / 10).max(1);
    let mut since_sweep = 0usize;

    // Until the end of times...
    loop {
        let Some(packet) = queue.recv() else {
            break;
        };

        // Update the current time
        ctx.time = common::unix_seconds();
        common::mark_new_cycle();

        if !sys_net::validate_framing(&packet.from, &packet.data) {
            continue;
        }

        if common::max_msg_level() >= MsgLevel::Debug {
            msg_print(
                MsgLevel::Debug,
                &format!(
                    "> New packet received from {}: {}",
                    packet.from,
                    sys_net::format_packet(&packet.data)
                ),
            );
        }

        let Some(listen) = sockets.get(packet.sock_index) else {
            continue;
        };
        let mut sink = UdpSink {
            socket: &listen.socket,
        };
        handle_message(ctx, &packet.data[4..], packet.from, &mut sink);

        since_sweep += 1;
        if since_sweep >= sweep_every {
            ctx.servers.check_timeouts(ctx.time);
            if common::max_msg_level() >= MsgLevel::Debug {
                let now = ctx.time;
                let MasterContext {
                    servers, addrmaps, ..
                } = ctx;
                servers.print_server_list(MsgLevel::Debug, now, addrmaps);
            }
            since_sweep = 0;
        }

        common::flush_log();
    }
}
