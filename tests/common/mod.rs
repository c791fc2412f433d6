#![allow(dead_code)]

use std::{
    str::FromStr,
    sync::{
        Arc,
        Once,
    },
    time::Duration,
};

use message::{
    Catalogue,
    LogId,
    Specification,
};
use runtime::{
    Link,
    LinkConfig,
    RelayConfig,
};
use tracing_subscriber::{
    fmt::format::FmtSpan,
    EnvFilter,
};

pub use harness::{
    response,
    SimObc,
};

mod harness;

pub const SCHED_RESP: LogId = LogId::new(0, 1);
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const CATALOGUE: &str = r#"{
    "commands": [
        { "id": 1, "name": "ping" },
        { "id": 2, "name": "set_mode",
          "args": [{ "name": "mode", "type": "u8" }],
          "response": [{ "name": "mode", "type": "u8" }] },
        { "id": 3, "name": "read_temp",
          "args": [{ "name": "sensor", "type": "u16" }],
          "response": [{ "name": "sensor", "type": "u16" }, { "name": "temp", "type": "i16" }] },
        { "id": 4, "name": "set_gain",
          "args": [{ "name": "gain", "type": "f32" }, { "name": "enabled", "type": "bool" }],
          "response": [{ "name": "gain", "type": "f32" }] },
        { "id": 5, "name": "dump",
          "args": [{ "name": "len", "type": "u16" }],
          "response": [{ "name": "data", "type": "string" }] }
    ],
    "logs": [
        { "id": 2, "name": "power", "signals": [
            { "id": 7, "name": "bus_voltage", "description": "main bus",
              "fields": [{ "name": "mv", "type": "u16" }] }
        ] }
    ]
}"#;

static TRACE_INIT: Once = Once::new();

pub fn trace_init() {
    TRACE_INIT.call_once(|| {
        let level_filter = EnvFilter::from_str("debug").unwrap();

        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(level_filter)
            .try_init();
    });
}

pub fn spec() -> Arc<dyn Specification> {
    Arc::new(Catalogue::from_json(CATALOGUE).unwrap())
}

pub fn direct_config() -> LinkConfig {
    LinkConfig {
        sched_resp_log: SCHED_RESP,
        ..LinkConfig::default()
    }
}

pub fn relay_config() -> LinkConfig {
    LinkConfig {
        tick_interval: Duration::from_millis(10),
        ttl_ticks: 3,
        max_retries: 3,
        sched_resp_log: SCHED_RESP,
        relay: Some(RelayConfig::default()),
        ..LinkConfig::default()
    }
}

/// A link talking to a simulated OBC over an in-memory pipe. Must run inside an actix system.
pub fn connect(config: LinkConfig) -> (Link, SimObc) {
    let (local, remote) = tokio::io::duplex(16 * 1024);
    let (reader, writer) = tokio::io::split(local);

    let sim = SimObc::new(remote, config.relay);
    let link = Link::start_with_io(reader, writer, spec(), config);

    (link, sim)
}
