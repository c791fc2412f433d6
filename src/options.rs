use std::{
    num::ParseIntError,
    path::PathBuf,
    time::Duration,
};

use message::LogId;
use runtime::{
    LinkConfig,
    RelayConfig,
};

#[derive(Debug, Clone, PartialEq, Eq, structopt::StructOpt)]
#[structopt(name = "groundlink", about = "Ground station link to the OBC")]
pub struct Options {
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, structopt::StructOpt)]
pub enum Command {
    /// Send one command and print its response.
    Send {
        #[structopt(flatten)]
        link: LinkOptions,

        name: String,

        args: Vec<String>,

        /// Execute at this Unix timestamp instead of immediately.
        #[structopt(long)]
        at: Option<u32>,

        /// Seconds to wait for the response.
        #[structopt(long, default_value = "5")]
        timeout: u64,

        /// For scheduled commands, also wait for the deferred response.
        #[structopt(long)]
        wait: bool,
    },

    /// Print every log record until interrupted.
    Listen {
        #[structopt(flatten)]
        link: LinkOptions,
    },

    /// Peel a hex-encoded frame layer by layer.
    Decode {
        hex: String,

        /// Treat COMMS datagrams as radio-relay traffic.
        #[structopt(long)]
        relay: bool,

        /// Hardware ID of the OBC on the relay path.
        #[structopt(long, default_value = "0x0001", parse(try_from_str = parse_hwid))]
        obc_hwid: u16,

        #[structopt(short, long)]
        catalogue: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, structopt::StructOpt)]
pub struct LinkOptions {
    #[structopt(short, long)]
    pub serial_port: String,

    #[structopt(short, long, default_value = "115200")]
    pub baud: u32,

    /// JSON command and log catalogue.
    #[structopt(short, long)]
    pub catalogue: PathBuf,

    /// Reach the OBC through the COMMS radio relay.
    #[structopt(long)]
    pub relay: bool,

    #[structopt(long, default_value = "0x0100", parse(try_from_str = parse_hwid))]
    pub ground_hwid: u16,

    #[structopt(long, default_value = "0x0001", parse(try_from_str = parse_hwid))]
    pub obc_hwid: u16,

    #[structopt(long, default_value = "0x0200", parse(try_from_str = parse_hwid))]
    pub comms_hwid: u16,

    #[structopt(long, default_value = "8")]
    pub window_size: usize,

    #[structopt(long, default_value = "3")]
    pub max_retries: u32,

    /// Milliseconds between registry ticks.
    #[structopt(long, default_value = "100")]
    pub tick_ms: u64,

    #[structopt(long, default_value = "10")]
    pub ttl_ticks: u32,

    #[structopt(long, default_value = "256")]
    pub log_queue_size: usize,

    /// Group and signal of the scheduled-response log.
    #[structopt(long, default_value = "0")]
    pub sched_group: u8,

    #[structopt(long, default_value = "1")]
    pub sched_signal: u8,
}

impl LinkOptions {
    pub fn config(&self) -> LinkConfig {
        let relay = self.relay.then(|| RelayConfig {
            ground_hwid: self.ground_hwid,
            obc_hwid:    self.obc_hwid,
            comms_hwid:  self.comms_hwid,
        });

        LinkConfig {
            window_size: self.window_size,
            max_retries: self.max_retries,
            ttl_ticks: self.ttl_ticks,
            tick_interval: Duration::from_millis(self.tick_ms),
            log_queue_size: self.log_queue_size,
            sched_resp_log: LogId::new(self.sched_group, self.sched_signal),
            relay,
            ..LinkConfig::default()
        }
    }
}

fn parse_hwid(s: &str) -> Result<u16, ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[cfg(test)]
mod test {
    use message::OBC_HWID;
    use structopt::StructOpt;

    use super::*;

    #[test]
    fn relay_options_build_config() {
        let opts = Options::from_iter([
            "groundlink",
            "listen",
            "-s",
            "/dev/ttyUSB0",
            "-c",
            "cat.json",
            "--relay",
            "--comms-hwid",
            "0x0300",
            "--window-size",
            "4",
        ]);

        let Command::Listen { link } = opts.cmd else {
            panic!("expected listen");
        };

        let config = link.config();
        assert_eq!(config.window_size, 4);
        assert_eq!(
            config.relay,
            Some(RelayConfig {
                ground_hwid: 0x0100,
                obc_hwid:    OBC_HWID,
                comms_hwid:  0x0300,
            })
        );
    }

    #[test]
    fn decode_takes_obc_hwid() {
        let opts = Options::from_iter(["groundlink", "decode", "abcd", "--relay", "--obc-hwid", "0x0005"]);

        assert_eq!(
            opts.cmd,
            Command::Decode {
                hex:       "abcd".to_owned(),
                relay:     true,
                obc_hwid:  5,
                catalogue: None,
            }
        );
    }

    #[test]
    fn hwids_accept_hex_and_decimal() {
        assert_eq!(parse_hwid("0x01ff"), Ok(0x01ff));
        assert_eq!(parse_hwid("12"), Ok(12));
        assert!(parse_hwid("0xzz").is_err());
    }
}
