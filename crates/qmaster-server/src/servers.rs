// servers.rs — the registered-server table
//
// All entries live in one slot pool of `max_servers` slots. Each used slot is
// also linked into one bucket of the hash table for its address family; the
// hash is computed from the IP address only, so every server behind one NAT
// shares a bucket and the per-address quota bounds the chain walk. Timed-out
// entries are reaped wherever a traversal happens to meet them.

use std::net::{IpAddr, SocketAddr};

use qmaster_common::common::{msg_print, MsgLevel};
use qmaster_common::net::is_loopback;

use crate::addrmap::AddrmapList;
use crate::server::{AdmissionError, ServerEntry};

pub struct ServerList {
    servers: Vec<Option<ServerEntry>>,
    hash_ipv4: Vec<Option<usize>>,
    hash_ipv6: Vec<Option<usize>>,
    hash_bits: u32,
    max_per_address: usize,

    nb_servers: usize,
    // Speed up the slot allocation / deallocation process
    first_free: Option<usize>,
    last_used: Option<usize>,
}

impl ServerList {
    pub fn new(max_servers: usize, hash_bits: u32, max_per_address: usize) -> Self {
        let table_size = 1usize << hash_bits;

        if max_per_address == 0 {
            msg_print(
                MsgLevel::Normal,
                &format!(
                    "> {} server records allocated (maximum number per address: unlimited)",
                    max_servers
                ),
            );
        } else {
            msg_print(
                MsgLevel::Normal,
                &format!(
                    "> {} server records allocated (maximum number per address: {})",
                    max_servers, max_per_address
                ),
            );
        }
        msg_print(
            MsgLevel::Normal,
            &format!("> IPv4 hash table allocated ({} entries)", table_size),
        );
        msg_print(
            MsgLevel::Normal,
            &format!("> IPv6 hash table allocated ({} entries)", table_size),
        );

        Self {
            servers: (0..max_servers).map(|_| None).collect(),
            hash_ipv4: vec![None; table_size],
            hash_ipv6: vec![None; table_size],
            hash_bits,
            max_per_address,
            nb_servers: 0,
            first_free: Some(0),
            last_used: None,
        }
    }

    // ============================================================
    // Accessors
    // ============================================================

    pub fn nb_servers(&self) -> usize {
        self.nb_servers
    }

    pub fn capacity(&self) -> usize {
        self.servers.len()
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.first_free
    }

    pub fn last_used_slot(&self) -> Option<usize> {
        self.last_used
    }

    pub fn entry(&self, ind: usize) -> Option<&ServerEntry> {
        self.servers.get(ind).and_then(|s| s.as_ref())
    }

    pub fn entry_mut(&mut self, ind: usize) -> Option<&mut ServerEntry> {
        self.servers.get_mut(ind).and_then(|s| s.as_mut())
    }

    // ============================================================
    // Address hash
    // ============================================================

    /// Compute the hash of a server address. The port deliberately does not
    /// contribute: servers sharing an IP must share a bucket so that
    /// admission can count them in one walk.
    fn address_hash(&self, address: &SocketAddr) -> usize {
        let mut hash: u32 = match address.ip() {
            IpAddr::V4(ip) => u32::from_be_bytes(ip.octets()),
            IpAddr::V6(ip) => {
                let o = ip.octets();
                let mut folded = 0u32;
                for word in o.chunks_exact(4) {
                    folded ^= u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
                }
                folded
            }
        };

        // Merge all the bits in the first 16 bits
        hash = (hash & 0xFFFF) ^ (hash >> 16);

        // Merge the bits to try to not lose too many of them (3 max here)
        if self.hash_bits >= 8 {
            hash = (hash >> self.hash_bits) ^ hash;
        } else if self.hash_bits > 4 {
            hash = (hash >> 8) ^ hash;
        } else {
            hash = (hash >> 12) ^ (hash >> 8) ^ (hash >> 4) ^ hash;
        }

        (hash as usize) & ((1usize << self.hash_bits) - 1)
    }

    fn bucket_head(&self, is_v6: bool, hash: usize) -> Option<usize> {
        if is_v6 {
            self.hash_ipv6[hash]
        } else {
            self.hash_ipv4[hash]
        }
    }

    fn set_bucket_head(&mut self, is_v6: bool, hash: usize, head: Option<usize>) {
        if is_v6 {
            self.hash_ipv6[hash] = head;
        } else {
            self.hash_ipv4[hash] = head;
        }
    }

    /// Link a slot at the head of its bucket.
    fn add_to_hash_table(&mut self, ind: usize) {
        let address = match self.entry(ind) {
            Some(e) => e.address,
            None => return,
        };
        let hash = self.address_hash(&address);
        let is_v6 = address.is_ipv6();
        let head = self.bucket_head(is_v6, hash);

        if let Some(e) = self.servers[ind].as_mut() {
            e.next = head;
            e.prev = None;
            e.hash = hash;
        }
        self.set_bucket_head(is_v6, hash, Some(ind));
        if let Some(h) = head {
            if let Some(e) = self.servers[h].as_mut() {
                e.prev = Some(ind);
            }
        }
    }

    /// Unlink a slot from its bucket.
    fn remove_from_hash_table(&mut self, ind: usize) {
        let (prev, next, hash, is_v6) = match self.entry(ind) {
            Some(e) => (e.prev, e.next, e.hash, e.address.is_ipv6()),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(e) = self.servers[p].as_mut() {
                    e.next = next;
                }
            }
            None => self.set_bucket_head(is_v6, hash, next),
        }
        if let Some(n) = next {
            if let Some(e) = self.servers[n].as_mut() {
                e.prev = prev;
            }
        }
    }

    // ============================================================
    // Removal
    // ============================================================

    /// Remove a server from the lists and return its slot to the pool.
    fn remove(&mut self, ind: usize) {
        self.remove_from_hash_table(ind);

        let entry = match self.servers[ind].take() {
            Some(e) => e,
            None => return,
        };

        // Update first_free if necessary
        if self.first_free.map_or(true, |f| ind < f) {
            self.first_free = Some(ind);
        }

        // If it was the last used slot, look for the previous one
        if self.last_used == Some(ind) {
            let mut l = ind;
            loop {
                if l == 0 {
                    self.last_used = None;
                    break;
                }
                l -= 1;
                if self.servers[l].is_some() {
                    self.last_used = Some(l);
                    break;
                }
            }
        }

        self.nb_servers -= 1;
        msg_print(
            MsgLevel::Normal,
            &format!(
                "> {} timed out; {} server(s) currently registered",
                entry.address, self.nb_servers
            ),
        );
    }

    /// Return true if a slot holds a live server. A timed-out entry found
    /// here is removed on the spot.
    pub fn is_active(&mut self, ind: usize, now: u64) -> bool {
        let timeout = match self.entry(ind) {
            Some(e) => e.timeout,
            None => return false,
        };

        if timeout < now {
            self.remove(ind);
            return false;
        }

        true
    }

    /// Browse the whole slot range and remove every server that has timed out.
    pub fn check_timeouts(&mut self, now: u64) {
        let mut ind = 0;
        while let Some(last) = self.last_used {
            if ind > last {
                break;
            }
            self.is_active(ind, now);
            ind += 1;
        }
    }

    /// Find the next live slot at or after `ind`, reaping as it goes.
    pub fn next_active(&mut self, mut ind: usize, now: u64) -> Option<usize> {
        while let Some(last) = self.last_used {
            if ind > last {
                return None;
            }
            if self.is_active(ind, now) {
                return Some(ind);
            }
            ind += 1;
        }
        None
    }

    // ============================================================
    // Lookup
    // ============================================================

    /// Walk the bucket for `address`. Returns the matching slot, if any, and
    /// the number of live entries sharing the IP. On a hit the entry is
    /// moved to the head of its bucket, because heartbeats are almost always
    /// followed by infoResponses.
    fn find_in_bucket(&mut self, address: SocketAddr, now: u64) -> (Option<usize>, usize) {
        let hash = self.address_hash(&address);
        let mut crt = self.bucket_head(address.is_ipv6(), hash);
        let mut same_ip = 0usize;

        while let Some(ind) = crt {
            // Fetch the link before is_active, which may unlink the node
            let next = self.entry(ind).and_then(|e| e.next);

            if self.is_active(ind, now) {
                if let Some(e) = self.entry(ind) {
                    if e.address.ip() == address.ip() {
                        same_ip += 1;
                        if e.address.port() == address.port() {
                            self.remove_from_hash_table(ind);
                            self.add_to_hash_table(ind);
                            return (Some(ind), same_ip);
                        }
                    }
                }
            }

            crt = next;
        }

        (None, same_ip)
    }

    /// Search for a particular server in the list.
    pub fn get(&mut self, address: SocketAddr, now: u64) -> Option<usize> {
        self.find_in_bucket(address, now).0
    }

    /// Search for a particular server in the list; admit it if unknown.
    pub fn get_or_create(
        &mut self,
        address: SocketAddr,
        now: u64,
        addrmaps: &AddrmapList,
        allow_loopback: bool,
    ) -> Result<usize, AdmissionError> {
        let (found, same_ip) = self.find_in_bucket(address, now);
        if let Some(ind) = found {
            return Ok(ind);
        }

        if self.max_per_address != 0 && same_ip >= self.max_per_address {
            return Err(AdmissionError::QuotaExceeded);
        }

        // Servers on a loopback address are allowed only when a mapping
        // projects them somewhere routable (IPv4), or never (IPv6)
        let addrmap = match address {
            SocketAddr::V4(a4) => {
                let map = addrmaps.find_v4(&a4);
                if !allow_loopback && is_loopback(&address.ip()) && map.is_none() {
                    return Err(AdmissionError::LoopbackRefused);
                }
                map
            }
            SocketAddr::V6(_) => {
                if !allow_loopback && is_loopback(&address.ip()) {
                    return Err(AdmissionError::LoopbackRefused);
                }
                None
            }
        };

        // If the list is full, check the entries to see if we can free a slot
        if self.nb_servers == self.servers.len() {
            self.check_timeouts(now);
            if self.nb_servers == self.servers.len() {
                return Err(AdmissionError::TableFull);
            }
        }

        let slot = self.first_free.ok_or(AdmissionError::TableFull)?;
        if self.last_used.map_or(true, |l| l < slot) {
            self.last_used = Some(slot);
        }

        self.servers[slot] = Some(ServerEntry::new(address, now, addrmap));
        self.add_to_hash_table(slot);
        self.nb_servers += 1;

        // Look for the next free slot
        self.first_free = None;
        let mut ind = slot + 1;
        while ind < self.servers.len() {
            if !self.is_active(ind, now) {
                self.first_free = Some(ind);
                break;
            }
            ind += 1;
        }

        msg_print(
            MsgLevel::Normal,
            &format!(
                "> New server added: {}. {} server(s) now registered, including {} at this IP address",
                address,
                self.nb_servers,
                same_ip + 1
            ),
        );
        msg_print(
            MsgLevel::Debug,
            &format!("  - index: {}\n  - hash: 0x{:04X}", slot, self.entry(slot).map_or(0, |e| e.hash)),
        );

        Ok(slot)
    }

    // ============================================================
    // Listing
    // ============================================================

    /// Print the list of servers to the output.
    pub fn print_server_list(&mut self, level: MsgLevel, now: u64, addrmaps: &AddrmapList) {
        msg_print(
            level,
            &format!(
                "\n> {} servers registered (time: {}):",
                self.nb_servers, now
            ),
        );

        let mut ind = 0;
        while let Some(i) = self.next_active(ind, now) {
            if let Some(e) = self.entry(i) {
                let mapped = e
                    .addrmap
                    .and_then(|m| addrmaps.get(m))
                    .map(|m| format!(", mapped to {}", m.to_string))
                    .unwrap_or_default();
                msg_print(
                    level,
                    &format!(
                        " * {}{} (timeout: {})\n\tgame: \"{}\" (protocol: {})\n\tstate: {}\n\tchallenge: \"{}\" (timeout: {})",
                        e.address,
                        mapped,
                        e.timeout,
                        e.gamename,
                        e.protocol,
                        e.state.name(),
                        e.challenge,
                        e.challenge_timeout
                    ),
                );
            }
            ind = i + 1;
        }
    }

    // ============================================================
    // Test support
    // ============================================================

    #[cfg(test)]
    fn bucket_indices(&self, address: &SocketAddr) -> Vec<usize> {
        let hash = self.address_hash(address);
        let mut out = Vec::new();
        let mut crt = self.bucket_head(address.is_ipv6(), hash);
        while let Some(ind) = crt {
            out.push(ind);
            crt = self.servers[ind].as_ref().and_then(|e| e.next);
        }
        out
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerState;

    fn empty_maps() -> AddrmapList {
        let mut maps = AddrmapList::new();
        maps.resolve();
        maps
    }

    fn v4(ip: [u8; 4], port: u16) -> SocketAddr {
        SocketAddr::from((ip, port))
    }

    fn v6(last: u8, port: u16) -> SocketAddr {
        let mut octets = [0u8; 16];
        octets[0] = 0x20;
        octets[1] = 0x01;
        octets[2] = 0x0d;
        octets[3] = 0xb8;
        octets[15] = last;
        SocketAddr::from((octets, port))
    }

    fn admit(list: &mut ServerList, addr: SocketAddr, now: u64) -> usize {
        list.get_or_create(addr, now, &empty_maps(), false)
            .expect("admission failed")
    }

    // -------------------------------------------------------
    // Admission and lookup
    // -------------------------------------------------------

    #[test]
    fn create_then_get() {
        let mut list = ServerList::new(16, 6, 0);
        let addr = v4([192, 0, 2, 7], 26000);

        let ind = admit(&mut list, addr, 100);
        assert_eq!(list.nb_servers(), 1);
        assert_eq!(list.get(addr, 100), Some(ind));
        assert_eq!(list.entry(ind).unwrap().address, addr);
        assert_eq!(list.entry(ind).unwrap().state, ServerState::Uninitialized);
    }

    #[test]
    fn get_unknown_is_none() {
        let mut list = ServerList::new(16, 6, 0);
        assert_eq!(list.get(v4([192, 0, 2, 7], 26000), 100), None);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut list = ServerList::new(16, 6, 0);
        let addr = v4([192, 0, 2, 7], 26000);

        let a = admit(&mut list, addr, 100);
        let b = admit(&mut list, addr, 100);
        assert_eq!(a, b);
        assert_eq!(list.nb_servers(), 1);
    }

    #[test]
    fn same_ip_different_ports_are_distinct() {
        let mut list = ServerList::new(16, 6, 0);
        let a = admit(&mut list, v4([192, 0, 2, 7], 26000), 100);
        let b = admit(&mut list, v4([192, 0, 2, 7], 26001), 100);
        assert_ne!(a, b);
        assert_eq!(list.nb_servers(), 2);
    }

    #[test]
    fn ipv4_and_ipv6_tables_are_separate() {
        let mut list = ServerList::new(16, 6, 0);
        admit(&mut list, v4([192, 0, 2, 7], 26000), 100);
        admit(&mut list, v6(1, 26000), 100);
        assert_eq!(list.nb_servers(), 2);
        assert!(list.get(v4([192, 0, 2, 7], 26000), 100).is_some());
        assert!(list.get(v6(1, 26000), 100).is_some());
    }

    // -------------------------------------------------------
    // Per-address quota
    // -------------------------------------------------------

    #[test]
    fn per_address_quota_enforced() {
        let mut list = ServerList::new(16, 6, 2);
        let maps = empty_maps();
        assert!(list.get_or_create(v4([192, 0, 2, 7], 1), 100, &maps, false).is_ok());
        assert!(list.get_or_create(v4([192, 0, 2, 7], 2), 100, &maps, false).is_ok());
        assert_eq!(
            list.get_or_create(v4([192, 0, 2, 7], 3), 100, &maps, false),
            Err(AdmissionError::QuotaExceeded)
        );

        // A different IP is still welcome
        assert!(list.get_or_create(v4([192, 0, 2, 8], 1), 100, &maps, false).is_ok());
    }

    #[test]
    fn per_address_quota_zero_is_unlimited() {
        let mut list = ServerList::new(64, 6, 0);
        let maps = empty_maps();
        for port in 1..=40u16 {
            assert!(list
                .get_or_create(v4([192, 0, 2, 7], port), 100, &maps, false)
                .is_ok());
        }
        assert_eq!(list.nb_servers(), 40);
    }

    #[test]
    fn quota_frees_up_after_timeout() {
        let mut list = ServerList::new(16, 6, 1);
        let maps = empty_maps();
        assert!(list.get_or_create(v4([192, 0, 2, 7], 1), 100, &maps, false).is_ok());
        assert_eq!(
            list.get_or_create(v4([192, 0, 2, 7], 2), 100, &maps, false),
            Err(AdmissionError::QuotaExceeded)
        );

        // The first entry times out (heartbeat grace is 2 s)
        assert!(list.get_or_create(v4([192, 0, 2, 7], 2), 200, &maps, false).is_ok());
        assert_eq!(list.nb_servers(), 1);
    }

    // -------------------------------------------------------
    // Loopback policy
    // -------------------------------------------------------

    #[test]
    fn ipv4_loopback_refused_without_mapping() {
        let mut list = ServerList::new(16, 6, 0);
        assert_eq!(
            list.get_or_create(v4([127, 0, 0, 1], 26000), 100, &empty_maps(), false),
            Err(AdmissionError::LoopbackRefused)
        );
    }

    #[test]
    fn ipv4_loopback_accepted_with_mapping() {
        let mut maps = AddrmapList::new();
        assert!(maps.add("127.0.0.1=192.0.2.99"));
        assert!(maps.resolve());

        let mut list = ServerList::new(16, 6, 0);
        let ind = list
            .get_or_create(v4([127, 0, 0, 1], 26000), 100, &maps, false)
            .unwrap();
        assert_eq!(list.entry(ind).unwrap().addrmap, Some(0));
    }

    #[test]
    fn ipv6_loopback_always_refused() {
        let mut list = ServerList::new(16, 6, 0);
        let addr: SocketAddr = "[::1]:26000".parse().unwrap();
        assert_eq!(
            list.get_or_create(addr, 100, &empty_maps(), false),
            Err(AdmissionError::LoopbackRefused)
        );
    }

    #[test]
    fn allow_loopback_bypasses_the_rule() {
        let mut list = ServerList::new(16, 6, 0);
        let maps = empty_maps();
        assert!(list
            .get_or_create(v4([127, 0, 0, 1], 26000), 100, &maps, true)
            .is_ok());
        let addr: SocketAddr = "[::1]:26001".parse().unwrap();
        assert!(list.get_or_create(addr, 100, &maps, true).is_ok());
    }

    // -------------------------------------------------------
    // Capacity
    // -------------------------------------------------------

    #[test]
    fn table_full_refuses() {
        let mut list = ServerList::new(2, 6, 0);
        let maps = empty_maps();
        assert!(list.get_or_create(v4([192, 0, 2, 1], 1), 100, &maps, false).is_ok());
        assert!(list.get_or_create(v4([192, 0, 2, 2], 1), 100, &maps, false).is_ok());
        assert_eq!(
            list.get_or_create(v4([192, 0, 2, 3], 1), 100, &maps, false),
            Err(AdmissionError::TableFull)
        );
    }

    #[test]
    fn full_table_sweeps_before_refusing() {
        let mut list = ServerList::new(1, 6, 0);
        let maps = empty_maps();
        assert!(list.get_or_create(v4([192, 0, 2, 1], 1), 100, &maps, false).is_ok());

        // Same time: the first entry is still live, so the second is refused
        assert_eq!(
            list.get_or_create(v4([192, 0, 2, 2], 1), 100, &maps, false),
            Err(AdmissionError::TableFull)
        );

        // Once the first entry expires, the admission sweep reclaims its slot
        assert!(list.get_or_create(v4([192, 0, 2, 2], 1), 200, &maps, false).is_ok());
        assert_eq!(list.nb_servers(), 1);
        assert!(list.get(v4([192, 0, 2, 1], 1), 200).is_none());
    }

    // -------------------------------------------------------
    // Timeouts
    // -------------------------------------------------------

    #[test]
    fn lookup_reaps_timed_out_entries() {
        let mut list = ServerList::new(16, 6, 0);
        let addr = v4([192, 0, 2, 7], 26000);
        admit(&mut list, addr, 100);

        // Unrefreshed entries live for 2 seconds
        assert_eq!(list.get(addr, 101), Some(0));
        assert_eq!(list.get(addr, 103), None);
        assert_eq!(list.nb_servers(), 0);
    }

    #[test]
    fn entry_survives_until_its_deadline() {
        let mut list = ServerList::new(16, 6, 0);
        let addr = v4([192, 0, 2, 7], 26000);
        let ind = admit(&mut list, addr, 100);
        list.entry_mut(ind).unwrap().timeout = 1000;

        assert!(list.get(addr, 500).is_some());
        assert!(list.get(addr, 1000).is_some());
        assert!(list.get(addr, 1001).is_none());
    }

    #[test]
    fn check_timeouts_sweeps_everything() {
        let mut list = ServerList::new(16, 6, 0);
        for i in 1..=5u8 {
            admit(&mut list, v4([192, 0, 2, i], 26000), 100);
        }
        assert_eq!(list.nb_servers(), 5);

        list.check_timeouts(500);
        assert_eq!(list.nb_servers(), 0);
        assert_eq!(list.last_used_slot(), None);
        assert_eq!(list.first_free_slot(), Some(0));
    }

    #[test]
    fn slot_bookkeeping_after_removal() {
        let mut list = ServerList::new(16, 6, 0);
        let a = admit(&mut list, v4([192, 0, 2, 1], 1), 100);
        let b = admit(&mut list, v4([192, 0, 2, 2], 1), 100);
        let c = admit(&mut list, v4([192, 0, 2, 3], 1), 100);
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(list.first_free_slot(), Some(3));
        assert_eq!(list.last_used_slot(), Some(2));

        // Keep b and c alive, expire a
        list.entry_mut(b).unwrap().timeout = 1000;
        list.entry_mut(c).unwrap().timeout = 1000;
        list.check_timeouts(200);

        assert_eq!(list.nb_servers(), 2);
        assert_eq!(list.first_free_slot(), Some(0));
        assert_eq!(list.last_used_slot(), Some(2));

        // The freed low slot is reused first
        let d = admit(&mut list, v4([192, 0, 2, 4], 1), 200);
        assert_eq!(d, 0);
        assert_eq!(list.first_free_slot(), Some(3));
    }

    // -------------------------------------------------------
    // Hash behavior
    // -------------------------------------------------------

    #[test]
    fn single_bucket_with_zero_hash_bits() {
        let mut list = ServerList::new(16, 0, 0);
        let a = v4([192, 0, 2, 1], 1);
        let b = v4([10, 1, 2, 3], 1);
        admit(&mut list, a, 100);
        admit(&mut list, b, 100);

        assert_eq!(list.bucket_indices(&a).len(), 2);
        assert_eq!(list.get(a, 100), Some(0));
        assert_eq!(list.get(b, 100), Some(1));
    }

    #[test]
    fn hash_ignores_port() {
        let list = ServerList::new(16, 6, 0);
        let h1 = list.address_hash(&v4([192, 0, 2, 7], 26000));
        let h2 = list.address_hash(&v4([192, 0, 2, 7], 27960));
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_stays_in_range() {
        for bits in 0..=8u32 {
            let list = ServerList::new(4, bits, 0);
            for i in 0..=255u8 {
                let h = list.address_hash(&v4([i, i.wrapping_mul(3), 7, 1], 1));
                assert!(h < (1 << bits));
            }
        }
    }

    #[test]
    fn lookup_moves_entry_to_bucket_head() {
        let mut list = ServerList::new(16, 6, 0);
        let a = v4([192, 0, 2, 7], 1);
        let b = v4([192, 0, 2, 7], 2);
        let ia = admit(&mut list, a, 100);
        let ib = admit(&mut list, b, 100);

        // Most recent admission sits at the head
        assert_eq!(list.bucket_indices(&a), vec![ib, ia]);

        // A hit on `a` moves it up front
        assert_eq!(list.get(a, 100), Some(ia));
        assert_eq!(list.bucket_indices(&a), vec![ia, ib]);

        // Looking it up again is idempotent
        assert_eq!(list.get(a, 100), Some(ia));
        assert_eq!(list.bucket_indices(&a), vec![ia, ib]);
    }

    #[test]
    fn removal_relinks_the_chain() {
        let mut list = ServerList::new(16, 0, 0);
        let a = v4([192, 0, 2, 1], 1);
        let b = v4([192, 0, 2, 2], 1);
        let c = v4([192, 0, 2, 3], 1);
        admit(&mut list, a, 100);
        let ib = admit(&mut list, b, 100);
        admit(&mut list, c, 100);

        // Expire the middle of the chain
        list.entry_mut(0).unwrap().timeout = 1000;
        list.entry_mut(2).unwrap().timeout = 1000;
        assert!(!list.is_active(ib, 500));

        let bucket = list.bucket_indices(&a);
        assert_eq!(bucket.len(), 2);
        assert!(!bucket.contains(&ib));
    }

    // -------------------------------------------------------
    // Invariants
    // -------------------------------------------------------

    #[test]
    fn nb_servers_matches_active_slots() {
        let mut list = ServerList::new(32, 4, 0);
        for i in 1..=10u8 {
            admit(&mut list, v4([192, 0, 2, i], 26000), 100);
        }
        list.entry_mut(3).unwrap().timeout = 1000;
        list.entry_mut(7).unwrap().timeout = 1000;
        list.check_timeouts(500);

        let mut count = 0;
        for ind in 0..list.capacity() {
            if list.entry(ind).is_some() {
                count += 1;
            }
        }
        assert_eq!(count, list.nb_servers());
        assert_eq!(count, 2);
    }

    #[test]
    fn last_used_is_none_iff_empty() {
        let mut list = ServerList::new(8, 4, 0);
        assert_eq!(list.last_used_slot(), None);

        admit(&mut list, v4([192, 0, 2, 1], 1), 100);
        assert!(list.last_used_slot().is_some());

        list.check_timeouts(500);
        assert_eq!(list.nb_servers(), 0);
        assert_eq!(list.last_used_slot(), None);
    }
}
