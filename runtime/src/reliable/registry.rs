use fnv::FnvHashMap;
use message::CommsDatagram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("packet registry full ({window} in flight)")]
pub struct RegistryFull {
    pub window: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    datagram: CommsDatagram,
    ttl:      u32,
    retries:  u32,
    due:      bool,
}

/// Datagrams sent but not yet acknowledged, keyed by sequence number.
#[derive(Debug)]
pub struct PacketRegistry {
    entries:     FnvHashMap<u16, Entry>,
    window_size: usize,
    max_ttl:     u32,
    max_retries: u32,
}

impl PacketRegistry {
    pub fn new(window_size: usize, ttl_ticks: u32, max_retries: u32) -> Self {
        Self {
            entries: FnvHashMap::default(),
            window_size,
            max_ttl: ttl_ticks.max(1),
            max_retries,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.window_size
    }

    pub fn contains(&self, seq_num: u16) -> bool {
        self.entries.contains_key(&seq_num)
    }

    /// Track a freshly sent datagram. Leaves the registry untouched when the window is full or
    /// the sequence number is already in flight.
    pub fn add_packet(&mut self, datagram: CommsDatagram) -> Result<(), RegistryFull> {
        if self.is_full() || self.entries.contains_key(&datagram.seq_num) {
            return Err(RegistryFull {
                window: self.window_size,
            });
        }

        self.entries.insert(datagram.seq_num, Entry {
            datagram,
            ttl: self.max_ttl,
            retries: 0,
            due: false,
        });

        Ok(())
    }

    /// Acknowledge a sequence number, returning the datagram it confirms.
    pub fn remove(&mut self, seq_num: u16) -> Option<CommsDatagram> {
        self.entries.remove(&seq_num).map(|entry| entry.datagram)
    }

    /// Age every entry by one tick, returning those that ran out of retries. Entries already
    /// waiting to be resent don't age.
    pub fn tick(&mut self) -> Vec<CommsDatagram> {
        let mut expired = vec![];
        let max_retries = self.max_retries;

        self.entries.retain(|_, entry| {
            if entry.due {
                return true;
            }

            entry.ttl = entry.ttl.saturating_sub(1);
            if entry.ttl > 0 {
                return true;
            }

            if entry.retries >= max_retries {
                expired.push(entry.datagram.clone());
                return false;
            }

            entry.retries += 1;
            entry.due = true;
            true
        });

        expired
    }

    /// Datagrams due for retransmission. Their timers restart.
    pub fn take_due(&mut self) -> Vec<CommsDatagram> {
        let max_ttl = self.max_ttl;

        self.entries
            .values_mut()
            .filter(|entry| entry.due)
            .map(|entry| {
                entry.due = false;
                entry.ttl = max_ttl;
                entry.datagram.clone()
            })
            .collect()
    }

    pub fn has_due(&self) -> bool {
        self.entries.values().any(|entry| entry.due)
    }
}
