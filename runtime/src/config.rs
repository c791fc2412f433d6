use std::time::Duration;

use message::{
    LogId,
    OBC_HWID,
};

/// Hardware ids on the radio-relay path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Our own id, used as the source of everything we send.
    pub ground_hwid: u16,
    pub obc_hwid:    u16,
    pub comms_hwid:  u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ground_hwid: 0x0100,
            obc_hwid:    OBC_HWID,
            comms_hwid:  0x0200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Maximum unacknowledged COMMS datagrams per destination.
    pub window_size:     usize,
    pub max_retries:     u32,
    /// Ticks between retransmissions of an unacknowledged datagram.
    pub ttl_ticks:       u32,
    pub tick_interval:   Duration,
    /// Capacity of the queues between pipeline stages.
    pub bridge_capacity: usize,
    pub log_queue_size:  usize,
    /// Bound on handing a packet to the next stage before it is dropped.
    pub write_timeout:   Duration,
    /// Size of the reads a command response is collected in.
    pub chunk_size:      usize,
    /// Log carrying deferred responses to scheduled commands.
    pub sched_resp_log:  LogId,
    /// `None` for a direct serial connection to the OBC.
    pub relay:           Option<RelayConfig>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            window_size:     8,
            max_retries:     3,
            ttl_ticks:       10,
            tick_interval:   Duration::from_millis(100),
            bridge_capacity: 64,
            log_queue_size:  256,
            write_timeout:   Duration::from_secs(1),
            chunk_size:      message::datagram::MAX_PAYLOAD,
            sched_resp_log:  LogId::new(0, 1),
            relay:           None,
        }
    }
}
