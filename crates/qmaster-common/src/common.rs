// common.rs -- leveled console and log file printing
//
// Every module prints through msg_print(). Output goes to stdout and, when
// enabled, to an append-mode log file. The first message after each
// event-loop cycle is preceded by a dated header line.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

// =============================================================================
// Packet framing constants
// =============================================================================

/// Maximum size for a valid incoming packet.
pub const MAX_PACKET_SIZE_IN: usize = 2048;

/// Minimum size for a valid incoming packet (prefix plus one byte).
pub const MIN_PACKET_SIZE_IN: usize = 5;

/// The four-byte prefix every protocol datagram starts with.
pub const PACKET_PREFIX: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

// =============================================================================
// Message levels
// =============================================================================

/// Verbosity of a message. A message is printed when its level is less than
/// or equal to the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum MsgLevel {
    /// Used only as a maximum level, meaning "print nothing".
    NoPrint = 0,
    Error = 1,
    Warning = 2,
    Normal = 3,
    Debug = 4,
}

impl MsgLevel {
    /// Map a numeric verbose level (as given on the command line) to a level.
    pub fn from_value(value: u32) -> Option<MsgLevel> {
        match value {
            0 => Some(MsgLevel::NoPrint),
            1 => Some(MsgLevel::Error),
            2 => Some(MsgLevel::Warning),
            3 => Some(MsgLevel::Normal),
            4 => Some(MsgLevel::Debug),
            _ => None,
        }
    }
}

// =============================================================================
// Print sink
// =============================================================================

struct MsgSink {
    max_level: MsgLevel,
    log_file: Option<File>,
    print_date: bool,
}

static MSG_SINK: OnceLock<Mutex<MsgSink>> = OnceLock::new();

fn sink() -> &'static Mutex<MsgSink> {
    MSG_SINK.get_or_init(|| {
        Mutex::new(MsgSink {
            max_level: MsgLevel::Normal,
            log_file: None,
            print_date: false,
        })
    })
}

/// Set the maximum level for a message to be printed.
pub fn set_max_msg_level(level: MsgLevel) {
    sink().lock().max_level = level;
}

pub fn max_msg_level() -> MsgLevel {
    sink().lock().max_level
}

/// Request a dated header line before the next printed message. Called once
/// per event-loop cycle.
pub fn mark_new_cycle() {
    sink().lock().print_date = true;
}

/// Print a message line, depending on its verbose level.
pub fn msg_print(level: MsgLevel, msg: &str) {
    let mut guard = sink().lock();

    if level > guard.max_level {
        return;
    }

    if guard.print_date {
        let datestring = build_date_string();
        println!("\n* {}", datestring);
        if let Some(ref mut f) = guard.log_file {
            let _ = writeln!(f, "\n* {}", datestring);
        }
        guard.print_date = false;
    }

    println!("{}", msg);
    if let Some(ref mut f) = guard.log_file {
        let _ = writeln!(f, "{}", msg);
    }
}

/// Open the log file in append mode. Further messages are mirrored to it.
pub fn open_log_file(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "> Opening log file (time: {})", build_date_string())?;

    sink().lock().log_file = Some(file);
    Ok(())
}

/// Flush the log file, if one is open. Called once per event-loop iteration.
pub fn flush_log() {
    if let Some(ref mut f) = sink().lock().log_file {
        let _ = f.flush();
    }
}

// =============================================================================
// Time helpers
// =============================================================================

/// Wall-clock time in whole seconds since the UNIX epoch.
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Return a string containing the current date and time.
pub fn build_date_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// =============================================================================
// Tests
// =============================================================================
