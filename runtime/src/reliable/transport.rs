use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use fnv::FnvHashMap;
use message::{
    comms::SEQ_MASK,
    CommsDatagram,
};
use net::{
    PacketDest,
    PacketSource,
};
use tokio::sync::{
    mpsc,
    oneshot,
    Notify,
};
use tokio_util::sync::CancellationToken;

use crate::reliable::{
    Error,
    PacketRegistry,
    RegistryFull,
};

/// A payload waiting to be sent reliably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub dest_hwid: u16,
    /// Only for datagrams addressed to the radio itself.
    pub cmd_num:   Option<u8>,
    pub payload:   Bytes,
}

#[derive(Debug)]
struct Lane {
    registry: PacketRegistry,
    next_seq: u16,
}

#[derive(Debug, Default)]
struct State {
    lanes: FnvHashMap<u16, Lane>,
}

#[derive(Debug)]
struct Inner {
    hwid:        u16,
    window_size: usize,
    ttl_ticks:   u32,
    max_retries: u32,
    state:       Mutex<State>,
    due:         Notify,
    failures:    mpsc::UnboundedSender<CommsDatagram>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<CommsDatagram>>>,
}

/// What the receive side should do with an incoming datagram.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inbound {
    /// Acknowledgement to send back.
    pub ack:     Option<CommsDatagram>,
    /// Datagram to hand to the destination bound to its source.
    pub forward: Option<CommsDatagram>,
}

/// Sequence numbering, acknowledgement and retransmission for COMMS datagrams. Each
/// destination gets its own registry and sequence counter.
#[derive(Debug, Clone)]
pub struct ReliableTransport {
    inner: Arc<Inner>,
}

impl ReliableTransport {
    pub fn new(hwid: u16, window_size: usize, ttl_ticks: u32, max_retries: u32) -> Self {
        let (failures, failures_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                hwid,
                window_size,
                ttl_ticks,
                max_retries,
                state: Mutex::new(State::default()),
                due: Notify::new(),
                failures,
                failures_rx: Mutex::new(Some(failures_rx)),
            }),
        }
    }

    #[inline]
    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn hwid(&self) -> u16 {
        self.inner.hwid
    }

    /// Datagrams that exhausted their retries. Can be taken once.
    pub fn failures(&self) -> Option<mpsc::UnboundedReceiver<CommsDatagram>> {
        self.inner.failures_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Number and register a datagram for `outbound`. The sequence number only advances if
    /// the datagram fits in the window.
    #[tracing::instrument(level = "debug", skip_all, fields(dest = outbound.dest_hwid))]
    pub fn transmit(&self, outbound: &Outbound) -> Result<CommsDatagram, RegistryFull> {
        let mut state = self.state();
        let lane = self.lane(&mut state, outbound.dest_hwid);

        let seq = lane.next_seq;
        let payload = outbound.payload.clone();
        let datagram = match outbound.cmd_num {
            Some(cmd_num) => CommsDatagram::command(seq, outbound.dest_hwid, self.inner.hwid, cmd_num, payload),
            None => CommsDatagram::relay(seq, outbound.dest_hwid, self.inner.hwid, payload),
        };

        lane.registry.add_packet(datagram.clone())?;
        lane.next_seq = (seq + 1) & SEQ_MASK;

        tracing::trace!(seq, "registered");

        Ok(datagram)
    }

    fn lane<'a>(&self, state: &'a mut State, dest_hwid: u16) -> &'a mut Lane {
        state.lanes.entry(dest_hwid).or_insert_with(|| Lane {
            registry: PacketRegistry::new(self.inner.window_size, self.inner.ttl_ticks, self.inner.max_retries),
            next_seq: 0,
        })
    }

    /// Classify an incoming datagram. Responses clear their registry entry and are forwarded
    /// only if they carry a payload; a response whose entry is already gone is ignored.
    /// Everything else is acknowledged and forwarded.
    pub fn receive(&self, datagram: CommsDatagram) -> Inbound {
        if !datagram.response {
            return Inbound {
                ack:     Some(datagram.ack()),
                forward: Some(datagram),
            };
        }

        let confirmed = self
            .state()
            .lanes
            .get_mut(&datagram.src_hwid)
            .and_then(|lane| lane.registry.remove(datagram.seq_num));

        if confirmed.is_none() {
            tracing::debug!(%datagram, "ignoring stale response");
            return Inbound::default();
        }

        tracing::trace!(seq = datagram.seq_num, "delivery confirmed");

        Inbound {
            ack:     None,
            forward: (!datagram.payload.is_empty()).then_some(datagram),
        }
    }

    /// Age every in-flight datagram by one tick. Datagrams out of retries are reported on the
    /// failure channel.
    pub fn tick(&self) {
        let (expired, due) = {
            let mut state = self.state();
            let mut expired = vec![];
            let mut due = false;

            for lane in state.lanes.values_mut() {
                expired.extend(lane.registry.tick());
                due |= lane.registry.has_due();
            }

            (expired, due)
        };

        for datagram in expired {
            tracing::error!(%datagram, "delivery failed: retries exhausted");

            if self.inner.failures.send(datagram).is_err() {
                tracing::debug!("failure listener gone");
            }
        }

        if due {
            self.inner.due.notify_one();
        }
    }

    pub fn take_due(&self) -> Vec<CommsDatagram> {
        let mut state = self.state();
        state.lanes.values_mut().flat_map(|lane| lane.registry.take_due()).collect()
    }

    pub fn in_flight(&self, dest_hwid: u16) -> usize {
        self.state().lanes.get(&dest_hwid).map_or(0, |lane| lane.registry.len())
    }

    /// Tick every `interval` until cancelled.
    pub fn spawn_ticker(&self, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let transport = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => transport.tick(),
                }
            }

            tracing::debug!("registry ticker stopped");
        })
    }
}

type AckHandoff = (CommsDatagram, oneshot::Sender<()>);

/// Receive side handle for passing acknowledgements to the transmit pump. Sending waits until
/// the pump has actually taken the ack.
#[derive(Debug, Clone)]
pub struct AckSender {
    tx: mpsc::Sender<AckHandoff>,
}

impl AckSender {
    pub async fn send(&self, ack: CommsDatagram) -> Result<(), Error> {
        let (done_tx, done_rx) = oneshot::channel();

        self.tx.send((ack, done_tx)).await.map_err(|_| Error::Closed)?;
        done_rx.await.map_err(|_| Error::Closed)
    }
}

/// Transmit pump: the next datagram to put on the wire. Pending acks go first, then due
/// retransmissions, then new payloads from upstream.
pub struct ReliableSource<S> {
    transport: ReliableTransport,
    upstream:  S,
    acks:      mpsc::Receiver<AckHandoff>,
    resends:   VecDeque<CommsDatagram>,
    /// Payload held back by a full window.
    stalled:   Option<Outbound>,
    retry:     Duration,
}

impl<S> ReliableSource<S>
where
    S: PacketSource<Outbound>,
{
    pub fn new(transport: ReliableTransport, upstream: S, retry: Duration) -> (Self, AckSender) {
        let (tx, acks) = mpsc::channel(1);

        let source = Self {
            transport,
            upstream,
            acks,
            resends: VecDeque::new(),
            stalled: None,
            retry,
        };

        (source, AckSender {
            tx,
        })
    }

    fn next_ready(&mut self) -> Option<CommsDatagram> {
        if let Ok((ack, done)) = self.acks.try_recv() {
            let _ = done.send(());
            return Some(ack);
        }

        if self.resends.is_empty() {
            self.resends.extend(self.transport.take_due());
        }

        if let Some(resend) = self.resends.pop_front() {
            tracing::debug!(seq = resend.seq_num, "retransmitting");
            return Some(resend);
        }

        let outbound = self.stalled.take()?;
        match self.transport.transmit(&outbound) {
            Ok(datagram) => Some(datagram),
            Err(_full) => {
                self.stalled = Some(outbound);
                None
            },
        }
    }
}

#[async_trait::async_trait]
impl<S> PacketSource<CommsDatagram> for ReliableSource<S>
where
    S: PacketSource<Outbound>,
{
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<CommsDatagram>, net::Error> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let sleep_until = |retry: Duration| {
            let wake = tokio::time::Instant::now() + retry;
            deadline.map_or(wake, |d| d.min(wake))
        };

        loop {
            if let Some(datagram) = self.next_ready() {
                return Ok(Some(datagram));
            }

            if deadline.map_or(false, |d| d <= tokio::time::Instant::now()) {
                return Ok(None);
            }

            if self.stalled.is_some() {
                tokio::select! {
                    Some((ack, done)) = self.acks.recv() => {
                        let _ = done.send(());
                        return Ok(Some(ack));
                    },
                    _ = self.transport.inner.due.notified() => {},
                    _ = tokio::time::sleep_until(sleep_until(self.retry)) => {},
                }

                continue;
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(tokio::time::Instant::now()));

            tokio::select! {
                Some((ack, done)) = self.acks.recv() => {
                    let _ = done.send(());
                    return Ok(Some(ack));
                },
                _ = self.transport.inner.due.notified() => {},
                outbound = self.upstream.read(remaining) => match outbound? {
                    Some(outbound) => match self.transport.transmit(&outbound) {
                        Ok(datagram) => return Ok(Some(datagram)),
                        Err(full) => {
                            tracing::warn!(error = %full, dest = outbound.dest_hwid, "window full, holding payload");
                            self.stalled = Some(outbound);
                        },
                    },
                    None => return Ok(None),
                },
            }
        }
    }
}

/// Receive side: acknowledges incoming datagrams and routes each to the destination bound to
/// its source hardware id.
pub struct ReliableDest {
    transport: ReliableTransport,
    acks:      AckSender,
    routes:    FnvHashMap<u16, Box<dyn PacketDest<CommsDatagram>>>,
}

impl ReliableDest {
    pub fn new(transport: ReliableTransport, acks: AckSender) -> Self {
        Self {
            transport,
            acks,
            routes: FnvHashMap::default(),
        }
    }

    pub fn route(mut self, src_hwid: u16, dest: impl PacketDest<CommsDatagram> + 'static) -> Self {
        self.routes.insert(src_hwid, Box::new(dest));
        self
    }
}

#[async_trait::async_trait]
impl PacketDest<CommsDatagram> for ReliableDest {
    #[tracing::instrument(level = "trace", skip_all, fields(seq = packet.seq_num, src = packet.src_hwid, resp = packet.response))]
    async fn write(&mut self, packet: CommsDatagram, timeout: Option<Duration>) -> Result<(), net::Error> {
        let inbound = self.transport.receive(packet);

        if let Some(ack) = inbound.ack {
            self.acks.send(ack).await.map_err(|_| net::Error::Closed)?;
        }

        let Some(datagram) = inbound.forward else {
            return Ok(());
        };

        match self.routes.get_mut(&datagram.src_hwid) {
            Some(dest) => dest.write(datagram, timeout).await,
            None => {
                tracing::warn!(
                    error = %Error::UnknownSource(datagram.src_hwid),
                    %datagram,
                    "dropping datagram",
                );

                Ok(())
            },
        }
    }
}
