//! Bounded IP→device cache with LRU eviction.
//!
//! Amortized O(1) lookup and insert via a hash map into an intrusive
//! doubly-linked list of slots. Updates are serialized through the
//! correlation actor, so the cache itself needs no locking.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use uuid::Uuid;

const NONE: usize = usize::MAX;

/// Minimum capacity the pipeline configures.
pub const MIN_CAPACITY: usize = 100_000;

struct Slot {
    ip: Ipv4Addr,
    device_id: Uuid,
    prev: usize,
    next: usize,
}

pub struct IpDeviceCache {
    capacity: usize,
    map: HashMap<Ipv4Addr, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl IpDeviceCache {
    pub fn new(capacity: usize) -> Self {
        IpDeviceCache {
            capacity: capacity.max(1),
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NONE,
            tail: NONE,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up the device owning `ip`, refreshing its recency.
    pub fn get(&mut self, ip: Ipv4Addr) -> Option<Uuid> {
        let idx = *self.map.get(&ip)?;
        self.unlink(idx);
        self.push_front(idx);
        Some(self.slots[idx].device_id)
    }

    /// Peek without touching recency.
    pub fn peek(&self, ip: Ipv4Addr) -> Option<Uuid> {
        self.map.get(&ip).map(|&idx| self.slots[idx].device_id)
    }

    /// Bind `ip` to `device_id`, evicting the least-recently-used entry
    /// when at capacity.
    pub fn insert(&mut self, ip: Ipv4Addr, device_id: Uuid) {
        if let Some(&idx) = self.map.get(&ip) {
            self.slots[idx].device_id = device_id;
            self.unlink(idx);
            self.push_front(idx);
            return;
        }
        if self.map.len() >= self.capacity {
            self.evict_lru();
        }
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Slot {
                    ip,
                    device_id,
                    prev: NONE,
                    next: NONE,
                };
                idx
            }
            None => {
                self.slots.push(Slot {
                    ip,
                    device_id,
                    prev: NONE,
                    next: NONE,
                });
                self.slots.len() - 1
            }
        };
        self.map.insert(ip, idx);
        self.push_front(idx);
    }

    /// Atomically repoint every entry referencing `old` to `new`.
    /// Used when devices merge.
    pub fn repoint(&mut self, old: Uuid, new: Uuid) -> usize {
        let mut repointed = 0;
        for slot in &mut self.slots {
            if slot.device_id == old {
                slot.device_id = new;
                repointed += 1;
            }
        }
        repointed
    }

    /// Drop all entries for a removed device.
    pub fn remove_device(&mut self, device_id: Uuid) {
        let ips: Vec<Ipv4Addr> = self
            .map
            .iter()
            .filter(|(_, &idx)| self.slots[idx].device_id == device_id)
            .map(|(&ip, _)| ip)
            .collect();
        for ip in ips {
            if let Some(idx) = self.map.remove(&ip) {
                self.unlink(idx);
                self.free.push(idx);
            }
        }
    }

    fn evict_lru(&mut self) {
        let tail = self.tail;
        if tail == NONE {
            return;
        }
        let ip = self.slots[tail].ip;
        self.unlink(tail);
        self.map.remove(&ip);
        self.free.push(tail);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev != NONE {
            self.slots[prev].next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NONE {
            self.slots[next].prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
        self.slots[idx].prev = NONE;
        self.slots[idx].next = NONE;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NONE;
        self.slots[idx].next = self.head;
        if self.head != NONE {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NONE {
            self.tail = idx;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = IpDeviceCache::new(10);
        let id = Uuid::new_v4();
        cache.insert(ip(1), id);
        assert_eq!(cache.get(ip(1)), Some(id));
        assert_eq!(cache.get(ip(2)), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = IpDeviceCache::new(3);
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        cache.insert(ip(1), ids[0]);
        cache.insert(ip(2), ids[1]);
        cache.insert(ip(3), ids[2]);

        // Touch ip(1) so ip(2) becomes the LRU.
        assert!(cache.get(ip(1)).is_some());
        cache.insert(ip(4), ids[3]);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.peek(ip(2)), None, "LRU entry should be evicted");
        assert!(cache.peek(ip(1)).is_some());
        assert!(cache.peek(ip(3)).is_some());
        assert!(cache.peek(ip(4)).is_some());
    }

    #[test]
    fn test_reinsert_updates_binding() {
        let mut cache = IpDeviceCache::new(10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.insert(ip(1), a);
        cache.insert(ip(1), b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(ip(1)), Some(b));
    }

    #[test]
    fn test_repoint_on_merge() {
        let mut cache = IpDeviceCache::new(10);
        let loser = Uuid::new_v4();
        let winner = Uuid::new_v4();
        cache.insert(ip(1), loser);
        cache.insert(ip(2), loser);
        cache.insert(ip(3), winner);

        assert_eq!(cache.repoint(loser, winner), 2);
        assert_eq!(cache.get(ip(1)), Some(winner));
        assert_eq!(cache.get(ip(2)), Some(winner));
    }

    #[test]
    fn test_remove_device() {
        let mut cache = IpDeviceCache::new(10);
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        cache.insert(ip(1), id);
        cache.insert(ip(2), id);
        cache.insert(ip(3), other);

        cache.remove_device(id);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(ip(3)), Some(other));
    }

    #[test]
    fn test_heavy_churn_stays_bounded() {
        let mut cache = IpDeviceCache::new(100);
        let id = Uuid::new_v4();
        for i in 0..100_000u32 {
            let octets = i.to_be_bytes();
            cache.insert(
                Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                id,
            );
        }
        assert_eq!(cache.len(), 100);
    }
}
