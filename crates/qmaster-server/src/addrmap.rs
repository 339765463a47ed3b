// addrmap.rs — address mapping management
//
// A mapping rule rewrites a server's externally-visible address when it is
// sent to clients, projecting internal addresses through NAT. Rules are
// declared on the command line, resolved once at startup, and frozen from
// then on.

use std::net::SocketAddrV4;

use qmaster_common::common::{msg_print, MsgLevel};
use qmaster_common::net::resolve_ipv4;

/// A resolved mapping rule. A `from` port of 0 makes the rule the
/// wildcard-port rule for its IP; a `to` port of 0 keeps the server's own
/// port.
pub struct Addrmap {
    pub from_string: String,
    pub to_string: String,
    pub from: SocketAddrV4,
    pub to: SocketAddrV4,
}

/// The mapping rules, sorted by (from IP, from port). Rules are accumulated
/// as strings with `add`, then fixed by `resolve`; `add` is rejected
/// afterwards.
pub struct AddrmapList {
    pending: Vec<(String, String)>,
    maps: Vec<Addrmap>,
    resolved: bool,
}

impl Default for AddrmapList {
    fn default() -> Self {
        Self::new()
    }
}

impl AddrmapList {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            maps: Vec::new(),
            resolved: false,
        }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, ind: usize) -> Option<&Addrmap> {
        self.maps.get(ind)
    }

    /// Record an unresolved address mapping.
    /// `mapping` must be of the form "addr1:port1=addr2:port2", ":portX" optional.
    pub fn add(&mut self, mapping: &str) -> bool {
        if self.resolved {
            msg_print(
                MsgLevel::Error,
                "> ERROR: address mappings can't be added after initialization",
            );
            return false;
        }

        let Some((from, to)) = mapping.split_once('=') else {
            msg_print(
                MsgLevel::Error,
                "> ERROR: invalid syntax in address mapping string",
            );
            return false;
        };

        self.pending.push((from.to_string(), to.to_string()));
        true
    }

    /// Resolve every recorded mapping and sort the list. Returns false on
    /// the first rule that does not resolve or is invalid.
    pub fn resolve(&mut self) -> bool {
        let pending = std::mem::take(&mut self.pending);

        for (from_string, to_string) in pending {
            let Some(from) = resolve_ipv4(&from_string) else {
                msg_print(
                    MsgLevel::Error,
                    &format!("> ERROR: can't resolve {}", from_string),
                );
                return false;
            };
            let Some(to) = resolve_ipv4(&to_string) else {
                msg_print(
                    MsgLevel::Error,
                    &format!("> ERROR: can't resolve {}", to_string),
                );
                return false;
            };

            // 0.0.0.0 addresses are forbidden
            if from.ip().is_unspecified() || to.ip().is_unspecified() {
                msg_print(
                    MsgLevel::Error,
                    "> ERROR: Mapping from or to 0.0.0.0 is forbidden",
                );
                return false;
            }

            // Do NOT allow mapping to loopback addresses
            if to.ip().octets()[0] == 127 {
                msg_print(
                    MsgLevel::Error,
                    "> ERROR: Mapping to a loopback address is forbidden",
                );
                return false;
            }

            self.insert_sorted(Addrmap {
                from_string,
                to_string,
                from,
                to,
            });
        }

        self.resolved = true;
        true
    }

    /// Insert a resolved rule at its sorted position, overwriting any rule
    /// with the same (from IP, from port).
    fn insert_sorted(&mut self, map: Addrmap) {
        msg_print(
            MsgLevel::Normal,
            &format!(
                "> Address \"{}\" ({}) mapped to \"{}\" ({})",
                map.from_string, map.from, map.to_string, map.to
            ),
        );

        let key = Self::sort_key(&map.from);
        match self
            .maps
            .binary_search_by_key(&key, |m| Self::sort_key(&m.from))
        {
            Ok(pos) => {
                msg_print(
                    MsgLevel::Warning,
                    &format!(
                        "> WARNING: overwriting the previous mapping of address {}",
                        map.from
                    ),
                );
                self.maps[pos] = map;
            }
            Err(pos) => self.maps.insert(pos, map),
        }
    }

    fn sort_key(addr: &SocketAddrV4) -> (u32, u16) {
        (u32::from(*addr.ip()), addr.port())
    }

    /// Look for the mapping rule covering `addr`: the exact-port rule when
    /// present, the wildcard-port rule for that IP otherwise.
    pub fn find_v4(&self, addr: &SocketAddrV4) -> Option<usize> {
        let mut found = None;

        for (ind, map) in self.maps.iter().enumerate() {
            // Stop once the addresses become too high
            if u32::from(*map.from.ip()) > u32::from(*addr.ip()) {
                break;
            }
            if map.from.ip() == addr.ip() {
                // Past the port in sorted order: the exact rule isn't there
                if map.from.port() > addr.port() {
                    return found;
                }
                if map.from.port() == addr.port() {
                    return Some(ind);
                }
                if map.from.port() == 0 {
                    found = Some(ind);
                }
            }
        }

        found
    }
}

// ============================================================
// Tests
// ============================================================
