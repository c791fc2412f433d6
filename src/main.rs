use std::{
    path::Path,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use eyre::{
    Result,
    WrapErr,
};
use message::{
    AnyPacket,
    Catalogue,
    ExecTime,
    Specification,
};
use net::PacketSource;
use runtime::{
    app::CmdOutcome,
    Link,
};
use structopt::StructOpt as _;

use crate::options::{
    Command,
    LinkOptions,
    Options,
};

mod options;
mod signals;
mod trace;

#[actix::main]
async fn main() -> Result<()> {
    util::bootstrap!("starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let options = Options::from_args();
    trace::init();

    match options.cmd {
        Command::Send {
            link,
            name,
            args,
            at,
            timeout,
            wait,
        } => {
            let at = at.map_or(ExecTime::Immediate, ExecTime::from_timestamp);
            send(&link, &name, &args, at, Duration::from_secs(timeout), wait).await
        },
        Command::Listen {
            link,
        } => listen(&link).await,
        Command::Decode {
            hex,
            relay,
            obc_hwid,
            catalogue,
        } => decode(&hex, relay.then_some(obc_hwid), catalogue.as_deref()),
    }
}

fn load_catalogue(path: &Path) -> Result<Arc<dyn Specification>> {
    let json = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let catalogue = Catalogue::from_json(&json).wrap_err("loading catalogue")?;

    Ok(Arc::new(catalogue))
}

fn start(opts: &LinkOptions) -> Result<Link> {
    let spec = load_catalogue(&opts.catalogue)?;
    let link = Link::start(&opts.serial_port, opts.baud, spec, opts.config())?;

    Ok(link)
}

#[tracing::instrument(skip(opts, args), fields(port = %opts.serial_port), err(Display))]
async fn send(opts: &LinkOptions, name: &str, args: &[String], at: ExecTime, timeout: Duration, wait: bool) -> Result<()> {
    let mut link = start(opts)?;
    let client = link.client();

    let cmd = client.spec().command(name.into())?;
    let values = cmd.parse_args(args)?;

    let outcome = client
        .send_cmd_with_progress(name.into(), &values, at, Some(timeout), |got, total| {
            tracing::debug!(got, total, "receiving response");
        })
        .await;

    let result = match outcome {
        Ok(CmdOutcome::Sent(header)) => {
            println!("sent {}", header.summary());
            Ok(())
        },
        Ok(CmdOutcome::Response(resp)) => {
            println!("{resp}");
            Ok(())
        },
        Ok(CmdOutcome::Scheduled(mut pending)) => {
            println!("{} (id {})", pending.sched_resp, pending.correlation_id());

            if wait {
                tokio::select! {
                    resp = pending.wait(None) => match resp {
                        Ok(Some(resp)) => println!("{resp}"),
                        Ok(None) => {},
                        Err(e) => tracing::error!(error = %e, "scheduled command did not complete"),
                    },
                    result = signals::shutdown() => {
                        util::catch!(ERROR, result, "installing signal handlers");
                    },
                }
            }

            Ok(())
        },
        Err(e) => Err(e.into()),
    };

    link.stop().await;
    result
}

#[tracing::instrument(skip(opts), fields(port = %opts.serial_port), err(Display))]
async fn listen(opts: &LinkOptions) -> Result<()> {
    let mut link = start(opts)?;
    let mut logs = link.add_log_listener(opts.log_queue_size);

    let shutdown = signals::shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                util::catch!(ERROR, result, "installing signal handlers");
                break;
            },
            record = logs.read(None) => match record {
                Ok(Some(record)) => println!("{record}"),
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!(error = %e, "log stream ended");
                    break;
                },
            },
        }
    }

    link.stop().await;

    Ok(())
}

fn decode(input: &str, relay_obc: Option<u16>, catalogue: Option<&Path>) -> Result<()> {
    let bytes = hex::decode(input.trim().trim_start_matches("0x")).wrap_err("input is not hex")?;
    let spec = catalogue.map(load_catalogue).transpose()?;

    let mut packet = AnyPacket::Raw(Bytes::from(bytes));
    println!("{:>8}: {packet}", packet.kind());

    while let Some(inner) = packet.peel(relay_obc)? {
        packet = inner;
        println!("{:>8}: {packet}", packet.kind());
    }

    if let (Some(spec), AnyPacket::Cmd(msg)) = (spec, &packet) {
        match spec.command(msg.header.cmd_id.into()) {
            Ok(cmd) => println!("{:>8}: {}", "command", cmd.name()),
            Err(e) => println!("{:>8}: {e}", "command"),
        }
    }

    Ok(())
}
