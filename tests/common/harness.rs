use std::{
    collections::HashSet,
    time::Duration,
};

use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};
use codec::{
    tokio_codec::{
        FramedRead,
        FramedWrite,
    },
    DatalinkTx,
    FrameCodec,
    ProtocolLayer,
};
use futures::{
    SinkExt,
    StreamExt,
};
use message::{
    CmdHeader,
    CmdMessage,
    CommsDatagram,
    LogRecord,
    MessageType,
    ResponseCode,
    SerialDatagram,
    SerialFrame,
};
use runtime::RelayConfig;
use tokio::io::{
    AsyncWriteExt,
    DuplexStream,
    ReadHalf,
    WriteHalf,
};

use crate::common::TIMEOUT;

/// The far end of the serial line: an OBC, and on the relay path also the COMMS radio in
/// front of it.
pub struct SimObc {
    frames_in:  FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
    frames_out: FramedWrite<WriteHalf<DuplexStream>, FrameCodec>,
    relay:      Option<RelayConfig>,
    cmd_buf:    BytesMut,
    seq:        u16,
    seen:       HashSet<(u16, u16)>,

    /// Datagrams addressed to the radio itself.
    pub radio_cmds: Vec<CommsDatagram>,
    /// Acknowledgements the ground sent for our datagrams.
    pub acks_seen:  Vec<CommsDatagram>,
    /// Relay datagrams received from the ground, including retransmissions.
    pub received:   usize,
    /// Swallow this many incoming relay datagrams without acknowledging them.
    pub drop_next:  usize,
}

impl SimObc {
    pub fn new(io: DuplexStream, relay: Option<RelayConfig>) -> Self {
        let (r, w) = tokio::io::split(io);

        Self {
            frames_in: FramedRead::new(r, FrameCodec::new()),
            frames_out: FramedWrite::new(w, FrameCodec::new()),
            relay,
            cmd_buf: BytesMut::new(),
            seq: 0,
            seen: HashSet::new(),
            radio_cmds: vec![],
            acks_seen: vec![],
            received: 0,
            drop_next: 0,
        }
    }

    /// Next complete command the ground sent.
    pub async fn next_command(&mut self) -> eyre::Result<CmdMessage> {
        loop {
            if self.cmd_buf.len() >= CmdHeader::SIZE {
                let header = CmdHeader::from_slice(&self.cmd_buf)?;
                let total = CmdHeader::SIZE + header.data_len() as usize;

                if self.cmd_buf.len() >= total {
                    let raw = self.cmd_buf.split_to(total);
                    return Ok(CmdMessage::from_slice(&raw)?);
                }
            }

            let frame = tokio::time::timeout(TIMEOUT, self.frames_in.next())
                .await?
                .ok_or_else(|| eyre::eyre!("serial closed"))??;

            self.handle(frame).await?;
        }
    }

    /// Process whatever the ground sends for `dur`.
    pub async fn pump_for(&mut self, dur: Duration) -> eyre::Result<()> {
        let deadline = tokio::time::Instant::now() + dur;

        while let Ok(frame) = tokio::time::timeout_at(deadline, self.frames_in.next()).await {
            let frame = frame.ok_or_else(|| eyre::eyre!("serial closed"))??;
            self.handle(frame).await?;
        }

        Ok(())
    }

    async fn handle(&mut self, frame: SerialFrame) -> eyre::Result<()> {
        let datagram = SerialDatagram::from_slice(frame.payload())?;

        let Some(relay) = self.relay else {
            if datagram.ty == MessageType::Comms {
                self.cmd_buf.extend_from_slice(&datagram.payload);
            }

            return Ok(());
        };

        let comms = CommsDatagram::from_slice(&datagram.payload, relay.obc_hwid)?;
        if comms.response {
            self.acks_seen.push(comms);
            return Ok(());
        }

        self.received += 1;
        if self.drop_next > 0 {
            self.drop_next -= 1;
            return Ok(());
        }

        self.send_outer(&comms.ack()).await?;

        if !self.seen.insert((comms.src_hwid, comms.seq_num)) {
            return Ok(());
        }

        if comms.dest_hwid == relay.comms_hwid {
            self.radio_cmds.push(comms);
            return Ok(());
        }

        let inner = SerialDatagram::from_slice(&comms.payload)?;
        if inner.ty == MessageType::Comms {
            self.cmd_buf.extend_from_slice(&inner.payload);
        }

        Ok(())
    }

    /// Answer `cmd` with `code` followed by `body`.
    pub async fn respond(&mut self, cmd: &CmdHeader, code: ResponseCode, body: &[u8]) -> eyre::Result<()> {
        let msg = response(cmd, code, body);
        self.send_app(msg.to_bytes()?, MessageType::Comms).await
    }

    pub async fn log(&mut self, record: &LogRecord) -> eyre::Result<()> {
        self.send_app(record.to_bytes()?, MessageType::Log).await
    }

    /// A datagram from the radio itself, as if answering a radio command.
    pub async fn radio_reply(&mut self, cmd_num: u8, payload: &'static [u8]) -> eyre::Result<()> {
        let relay = self.relay.ok_or_else(|| eyre::eyre!("not a relay link"))?;

        let seq = self.next_seq();
        let dg = CommsDatagram::command(seq, relay.ground_hwid, relay.comms_hwid, cmd_num, payload);
        self.send_outer(&dg).await
    }

    /// Raw bytes straight onto the line, bypassing framing.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> eyre::Result<()> {
        let w = self.frames_out.get_mut();
        w.write_all(bytes).await?;
        w.flush().await?;

        Ok(())
    }

    async fn send_app(&mut self, bytes: Bytes, ty: MessageType) -> eyre::Result<()> {
        let Some(relay) = self.relay else {
            for dg in DatalinkTx::direct(ty).transform(bytes)? {
                self.frames_out.send(SerialFrame::new(dg)?).await?;
            }

            return Ok(());
        };

        for inner in DatalinkTx::relayed(ty).transform(bytes)? {
            let seq = self.next_seq();
            let dg = CommsDatagram::relay(seq, relay.ground_hwid, relay.obc_hwid, inner);
            self.send_outer(&dg).await?;
        }

        Ok(())
    }

    async fn send_outer(&mut self, dg: &CommsDatagram) -> eyre::Result<()> {
        let outer = SerialDatagram::new(MessageType::Comms, dg.to_bytes()?)?;
        self.frames_out.send(SerialFrame::new(outer.to_bytes())?).await?;

        Ok(())
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = (self.seq + 1) & message::comms::SEQ_MASK;
        seq
    }
}

pub fn response(cmd: &CmdHeader, code: ResponseCode, body: &[u8]) -> CmdMessage {
    let mut payload = BytesMut::with_capacity(body.len() + 1);
    payload.put_u8(code as u8);
    payload.put_slice(body);

    CmdMessage {
        header:  cmd.response(payload.len()).unwrap(),
        payload: payload.freeze(),
    }
}
