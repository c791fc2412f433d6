use std::{
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};

use actix::{
    Actor,
    Addr,
    AsyncContext,
};
use bytes::Bytes;
use codec::{
    tokio_codec::{
        FramedRead,
        FramedWrite,
    },
    DatalinkRx,
    DatalinkTx,
    DecoderLayer,
    FrameCodec,
    FrameStats,
    LogDecoder,
    MapLayer,
    ProtocolLayer,
    ProtocolLayerExt,
};
use futures::{
    SinkExt,
    StreamExt,
};
use message::{
    CommsDatagram,
    MessageType,
    PacketError,
    SerialDatagram,
    SerialFrame,
    Specification,
};
use net::{
    Demux,
    ListenerId,
    PacketDest,
    PacketSource,
    ProtocolDest,
    ProtocolSource,
    Subscription,
};
use tokio::{
    io::{
        AsyncRead,
        AsyncWrite,
    },
    sync::mpsc,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    app::{
        ObcClient,
        ScheduledResponses,
        Stop,
    },
    config::{
        LinkConfig,
        RelayConfig,
    },
    logs::LogHub,
    reliable::{
        Outbound,
        ReliableDest,
        ReliableSource,
        ReliableTransport,
    },
    Error,
};

struct Relay {
    config:    RelayConfig,
    transport: ReliableTransport,
    outbound:  mpsc::Sender<Outbound>,
    radio:     Mutex<Option<mpsc::Receiver<CommsDatagram>>>,
}

/// A running protocol stack over one serial connection.
///
/// Owns every background task of the pipeline: serial RX and TX, the log pump, the
/// scheduled-response actor and, on the relay path, the retransmission ticker. All of them
/// stop on [`Link::stop`] or when the link is dropped.
pub struct Link {
    client:      Arc<ObcClient>,
    logs:        LogHub,
    scheduled:   Addr<ScheduledResponses>,
    frame_stats: Arc<FrameStats>,
    relay:       Option<Relay>,
    config:      LinkConfig,
    cancel:      CancellationToken,
    tasks:       Vec<JoinHandle<()>>,
}

impl Link {
    /// Open `port` and start the stack on it. Must be called from within an actix system.
    #[tracing::instrument(skip(spec, config), err(Display))]
    pub fn start(port: &str, baud: u32, spec: Arc<dyn Specification>, config: LinkConfig) -> Result<Self, Error> {
        let serial = tokio_serial::new(port, baud).open_native_async()?;
        let (reader, writer) = tokio::io::split(serial);

        tracing::info!("serial port open");

        Ok(Self::start_with_io(reader, writer, spec, config))
    }

    /// Start the stack over an arbitrary byte stream. Must be called from within an actix
    /// system.
    pub fn start_with_io<R, W>(reader: R, writer: W, spec: Arc<dyn Specification>, config: LinkConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let cancel = CancellationToken::new();
        let mut tasks = vec![];

        let (log_tx, log_rx) = mpsc::channel::<Bytes>(config.bridge_capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel::<Bytes>(config.bridge_capacity);

        let frame_codec = FrameCodec::new();
        let frame_stats = frame_codec.stats();

        let (client_tx, relay): (Box<dyn PacketDest<Bytes>>, _) = match config.relay {
            None => {
                let (wire_tx, wire_rx) = mpsc::channel::<Bytes>(config.bridge_capacity);

                tasks.push(spawn_reader(
                    reader,
                    frame_codec,
                    Demux::new(log_tx, cmd_tx),
                    config.write_timeout,
                    cancel.clone(),
                ));
                tasks.push(spawn_writer(writer, wire_rx, cancel.clone()));

                let client_tx = ProtocolDest::new(wire_tx, DatalinkTx::direct(MessageType::Comms));

                (Box::new(client_tx) as Box<dyn PacketDest<Bytes>>, None)
            },

            Some(relay) => {
                let transport = ReliableTransport::new(
                    relay.ground_hwid,
                    config.window_size,
                    config.ttl_ticks,
                    config.max_retries,
                );

                let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(config.bridge_capacity);
                let (radio_tx, radio_rx) = mpsc::channel::<CommsDatagram>(config.bridge_capacity);

                let (pump, acks) = ReliableSource::new(transport.clone(), outbound_rx, config.tick_interval);
                let wire = ProtocolSource::new(pump, MapLayer::new(wrap_relay));

                let from_obc = ProtocolDest::new(Demux::new(log_tx.clone(), cmd_tx), MapLayer::new(unwrap_relay));
                let reliable = ReliableDest::new(transport.clone(), acks)
                    .route(relay.obc_hwid, from_obc)
                    .route(relay.comms_hwid, radio_tx);

                tasks.push(spawn_reader(
                    reader,
                    frame_codec,
                    RelayDemux {
                        log: log_tx,
                        reliable,
                        obc_hwid: relay.obc_hwid,
                    },
                    config.write_timeout,
                    cancel.clone(),
                ));
                tasks.push(spawn_writer(writer, wire, cancel.clone()));
                tasks.push(transport.spawn_ticker(config.tick_interval, cancel.clone()));

                let obc_hwid = relay.obc_hwid;
                let to_obc = DatalinkTx::relayed(MessageType::Comms).then(MapLayer::new(move |payload: Bytes| {
                    Ok::<_, codec::Error>(Some(Outbound {
                        dest_hwid: obc_hwid,
                        cmd_num: None,
                        payload,
                    }))
                }));
                let client_tx = ProtocolDest::new(outbound_tx.clone(), to_obc);

                let relay = Relay {
                    config: relay,
                    transport,
                    outbound: outbound_tx,
                    radio: Mutex::new(Some(radio_rx)),
                };

                (Box::new(client_tx) as Box<dyn PacketDest<Bytes>>, Some(relay))
            },
        };

        let logs = LogHub::new();
        let records = ProtocolSource::new(log_rx, DecoderLayer::new(LogDecoder::new(spec.clone())));
        tasks.push(logs.spawn_pump(records, cancel.clone()));

        let sched_logs = logs.add_log_listener(config.log_queue_size);
        let sched_resp_log = config.sched_resp_log;
        let scheduled = ScheduledResponses::create(move |ctx| {
            ctx.add_stream(ReceiverStream::new(sched_logs.into_receiver()));
            ScheduledResponses::new(sched_resp_log)
        });

        let client = ObcClient::new(
            spec,
            client_tx,
            Box::new(cmd_rx),
            scheduled.clone(),
            config.write_timeout,
            config.chunk_size,
        );

        tracing::info!(relay = config.relay.is_some(), "link started");

        Self {
            client: Arc::new(client),
            logs,
            scheduled,
            frame_stats,
            relay,
            config,
            cancel,
            tasks,
        }
    }

    #[inline]
    pub fn client(&self) -> Arc<ObcClient> {
        self.client.clone()
    }

    #[inline]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn add_log_listener(&self, queue_size: usize) -> Subscription<message::LogRecord> {
        self.logs.add_log_listener(queue_size)
    }

    pub fn remove_log_listener(&self, id: ListenerId) -> bool {
        self.logs.remove_log_listener(id)
    }

    /// Counters for frames the PHY layer dropped.
    #[inline]
    pub fn frame_stats(&self) -> &FrameStats {
        &self.frame_stats
    }

    /// Datagrams that exhausted their retries. Relay path only; can be taken once.
    pub fn delivery_failures(&self) -> Option<mpsc::UnboundedReceiver<CommsDatagram>> {
        self.relay.as_ref()?.transport.failures()
    }

    /// Datagrams the COMMS radio sent us. Relay path only; can be taken once.
    pub fn radio_messages(&self) -> Option<mpsc::Receiver<CommsDatagram>> {
        self.relay.as_ref()?.radio.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Queue a command for the COMMS radio itself.
    pub async fn send_radio(&self, cmd_num: u8, payload: Bytes) -> Result<(), Error> {
        let relay = self.relay.as_ref().ok_or(Error::NotRelayed)?;
        let outbound = Outbound {
            dest_hwid: relay.config.comms_hwid,
            cmd_num: Some(cmd_num),
            payload,
        };

        relay.outbound.clone().write(outbound, Some(self.config.write_timeout)).await?;

        Ok(())
    }

    /// Datagrams sent to `dest_hwid` and not yet acknowledged. Always 0 on the direct path.
    pub fn in_flight(&self, dest_hwid: u16) -> usize {
        self.relay.as_ref().map_or(0, |relay| relay.transport.in_flight(dest_hwid))
    }

    /// Cancel every background task and wait for them to finish.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.scheduled.do_send(Stop);

        for task in std::mem::take(&mut self.tasks) {
            util::catch!(WARN, task.await, "link task failed");
        }

        tracing::info!(dropped_frames = self.frame_stats.dropped(), "link stopped");
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Inbound side of the relay path: log datagrams go straight to the log channel, COMMS
/// datagrams through the reliable transport.
struct RelayDemux {
    log:      mpsc::Sender<Bytes>,
    reliable: ReliableDest,
    obc_hwid: u16,
}

#[async_trait::async_trait]
impl PacketDest<SerialDatagram> for RelayDemux {
    async fn write(&mut self, packet: SerialDatagram, timeout: Option<Duration>) -> Result<(), net::Error> {
        match codec::route(&packet) {
            MessageType::Log => self.log.write(packet.payload, timeout).await,
            MessageType::Comms => match CommsDatagram::from_slice(&packet.payload, self.obc_hwid) {
                Ok(datagram) => self.reliable.write(datagram, timeout).await,
                Err(e) => {
                    tracing::warn!(error = %e, payload = %hex::encode(&packet.payload), "malformed comms datagram");
                    Ok(())
                },
            },
        }
    }
}

fn wrap_relay(datagram: CommsDatagram) -> Result<Option<Bytes>, PacketError> {
    let outer = SerialDatagram::new(MessageType::Comms, datagram.to_bytes()?)?;
    Ok(Some(outer.to_bytes()))
}

fn unwrap_relay(datagram: CommsDatagram) -> Result<Option<SerialDatagram>, PacketError> {
    match SerialDatagram::from_slice(&datagram.payload) {
        Ok(inner) => Ok(Some(inner)),
        Err(e) => {
            tracing::debug!(error = %e, %datagram, "dropping relayed datagram");
            Ok(None)
        },
    }
}

fn spawn_reader<R, D>(
    reader: R,
    frame_codec: FrameCodec,
    mut dest: D,
    write_timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    D: PacketDest<SerialDatagram> + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, frame_codec);
        let mut datalink = DatalinkRx;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.next() => frame,
            };

            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "serial read failed");
                    break;
                },
                None => {
                    tracing::info!("serial stream ended");
                    break;
                },
            };

            let datagrams = match datalink.transform(frame) {
                Ok(datagrams) => datagrams,
                Err(e) => {
                    tracing::warn!(error = %e, "datalink rejected frame");
                    continue;
                },
            };

            for datagram in datagrams {
                match dest.write(datagram, Some(write_timeout)).await {
                    Ok(()) => {},
                    Err(net::Error::Timeout) => tracing::warn!("downstream stalled, dropping datagram"),
                    Err(net::Error::Closed) => {
                        tracing::debug!("downstream closed");
                        return;
                    },
                    Err(e) => tracing::warn!(error = %e, "failed to route datagram"),
                }
            }
        }

        tracing::debug!("serial reader stopped");
    })
}

fn spawn_writer<W, S>(writer: W, mut wire: S, cancel: CancellationToken) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
    S: PacketSource<Bytes> + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedWrite::new(writer, FrameCodec::new());

        loop {
            let datagram = tokio::select! {
                _ = cancel.cancelled() => break,
                datagram = wire.read(None) => datagram,
            };

            let datagram = match datagram {
                Ok(Some(datagram)) => datagram,
                Ok(None) => continue,
                Err(net::Error::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping outbound datagram");
                    continue;
                },
            };

            let frame = match SerialFrame::new(datagram) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "outbound datagram does not fit a frame");
                    continue;
                },
            };

            if let Err(e) = frames.send(frame).await {
                tracing::error!(error = %e, "serial write failed");
                break;
            }
        }

        tracing::debug!("serial writer stopped");
    })
}
