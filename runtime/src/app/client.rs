use std::{
    sync::Arc,
    time::Duration,
};

use actix::Addr;
use bytes::{
    Bytes,
    BytesMut,
};
use message::{
    CmdHeader,
    CmdKey,
    CmdMessage,
    CommandSpec,
    ExecTime,
    ResponseCode,
    Specification,
    Value,
};
use net::{
    ByteStream,
    PacketDest,
    PacketSource,
};
use tokio::{
    sync::{
        oneshot,
        Mutex,
    },
    time::Instant,
};

use crate::app::{
    Error,
    ObcResponse,
    PendingResponse,
    ProtocolError,
    Register,
    ScheduledResponses,
};

/// Result of [`ObcClient::send_cmd_recv_resp`].
#[derive(Debug)]
pub enum CmdOutcome {
    /// The command expects no response; this is the header that was sent.
    Sent(CmdHeader),
    Response(ObcResponse),
    /// Accepted for later execution; the real response arrives through the log channel.
    Scheduled(PendingResponse),
}

impl CmdOutcome {
    pub fn response(&self) -> Option<&ObcResponse> {
        match self {
            CmdOutcome::Sent(_) => None,
            CmdOutcome::Response(resp) => Some(resp),
            CmdOutcome::Scheduled(pending) => Some(&pending.sched_resp),
        }
    }
}

struct Channel {
    seq_num: u8,
    tx:      Box<dyn PacketDest<Bytes>>,
    rx:      ByteStream<Box<dyn PacketSource<Bytes>>>,
}

/// Sends commands to the OBC and collects their responses.
///
/// One command is in flight at a time: the response channel carries no framing beyond the
/// response header, so a send and its receive happen under the same lock.
pub struct ObcClient {
    spec:          Arc<dyn Specification>,
    channel:       Mutex<Channel>,
    scheduled:     Addr<ScheduledResponses>,
    write_timeout: Duration,
    chunk_size:    usize,
}

impl ObcClient {
    pub fn new(
        spec: Arc<dyn Specification>,
        tx: Box<dyn PacketDest<Bytes>>,
        rx: Box<dyn PacketSource<Bytes>>,
        scheduled: Addr<ScheduledResponses>,
        write_timeout: Duration,
        chunk_size: usize,
    ) -> Self {
        Self {
            spec,
            channel: Mutex::new(Channel {
                seq_num: 0,
                tx,
                rx: ByteStream::new(rx),
            }),
            scheduled,
            write_timeout,
            chunk_size: chunk_size.max(1),
        }
    }

    #[inline]
    pub fn spec(&self) -> &Arc<dyn Specification> {
        &self.spec
    }

    /// Encode and send a command without waiting for anything back.
    pub async fn send_cmd(&self, key: CmdKey<'_>, args: &[Value], at: ExecTime) -> Result<CmdHeader, Error> {
        let spec = self.spec.command(key)?;
        let mut channel = self.channel.lock().await;

        self.send_locked(&mut channel, &*spec, args, at).await
    }

    #[tracing::instrument(skip_all, fields(cmd = spec.name(), seq = channel.seq_num, %at), err(Display))]
    async fn send_locked(
        &self,
        channel: &mut Channel,
        spec: &dyn CommandSpec,
        args: &[Value],
        at: ExecTime,
    ) -> Result<CmdHeader, Error> {
        let payload = spec.encode_args(args)?;
        let header = CmdHeader::command(channel.seq_num, spec.id(), at, 0, payload.len())?;
        let msg = CmdMessage {
            header,
            payload,
        };

        // anything still queued belongs to an earlier, abandoned exchange
        channel.rx.reset();

        channel.tx.write(msg.to_bytes()?, Some(self.write_timeout)).await?;
        channel.seq_num = channel.seq_num.wrapping_add(1);

        tracing::debug!(header = %header.summary(), "sent command");

        Ok(header)
    }

    pub async fn send_cmd_recv_resp(
        &self,
        key: CmdKey<'_>,
        args: &[Value],
        at: ExecTime,
        timeout: Option<Duration>,
    ) -> Result<CmdOutcome, Error> {
        self.send_cmd_with_progress(key, args, at, timeout, |_, _| {}).await
    }

    /// Like [`Self::send_cmd_recv_resp`], calling `progress(received, total)` after each chunk
    /// of the response payload.
    pub async fn send_cmd_with_progress<P>(
        &self,
        key: CmdKey<'_>,
        args: &[Value],
        at: ExecTime,
        timeout: Option<Duration>,
        mut progress: P,
    ) -> Result<CmdOutcome, Error>
    where
        P: FnMut(usize, usize) + Send,
    {
        let spec = self.spec.command(key)?;
        let mut channel = self.channel.lock().await;

        let sent = self.send_locked(&mut channel, &*spec, args, at).await?;

        if !spec.has_response() && at.is_immediate() {
            return Ok(CmdOutcome::Sent(sent));
        }

        let result = self.recv_locked(&mut channel, &sent, &*spec, timeout, &mut progress).await;
        if result.is_err() {
            channel.rx.reset();
        }
        drop(channel);

        let resp = result?;

        if resp.code != ResponseCode::SuccessScheduled || sent.exec_time().is_immediate() {
            return Ok(CmdOutcome::Response(resp));
        }

        let id = sent.uuid();
        let (tx, rx) = oneshot::channel();

        self.scheduled
            .send(Register {
                id,
                spec,
                tx,
            })
            .await?;

        tracing::info!(%id, "command scheduled");

        Ok(CmdOutcome::Scheduled(PendingResponse::new(resp, id, rx)))
    }

    #[tracing::instrument(skip_all, fields(seq = sent.seq_num, cmd_id = sent.cmd_id), err(Display))]
    async fn recv_locked(
        &self,
        channel: &mut Channel,
        sent: &CmdHeader,
        spec: &dyn CommandSpec,
        timeout: Option<Duration>,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<ObcResponse, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let remaining = || deadline.map(|d| d.saturating_duration_since(Instant::now()));

        let header_bytes = channel
            .rx
            .read_exact(CmdHeader::SIZE, remaining())
            .await?
            .ok_or(Error::Timeout)?;
        let header = CmdHeader::from_slice(&header_bytes)?;

        if !header.is_response() {
            return Err(ProtocolError::NotResponse.into());
        }

        if header.cmd_id != sent.cmd_id {
            return Err(ProtocolError::CmdId {
                expected: sent.cmd_id,
                got:      header.cmd_id,
            }
            .into());
        }

        if header.timestamp != sent.timestamp {
            return Err(ProtocolError::Timestamp {
                expected: sent.timestamp,
                got:      header.timestamp,
            }
            .into());
        }

        let total = header.data_len() as usize;
        let mut payload = BytesMut::with_capacity(total);

        while payload.len() < total {
            let n = self.chunk_size.min(total - payload.len());
            let chunk = channel.rx.read_exact(n, remaining()).await?.ok_or(Error::Timeout)?;

            payload.extend_from_slice(&chunk);
            progress(payload.len(), total);
        }

        let resp = ObcResponse::parse(header, payload.freeze(), spec)?;
        tracing::debug!(%resp, "received response");

        Ok(resp)
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;
    use message::Catalogue;
    use tokio::sync::mpsc;

    use super::*;

    const CATALOGUE: &str = r#"{ "commands": [
        { "id": 1, "name": "noop" },
        { "id": 2, "name": "get_mode", "args": [{ "name": "sub", "type": "u8" }],
          "response": [{ "name": "mode", "type": "u8" }] }
    ] }"#;

    struct Harness {
        client: ObcClient,
        sent:   mpsc::Receiver<Bytes>,
        inject: mpsc::Sender<Bytes>,
    }

    fn harness(chunk_size: usize) -> Harness {
        let spec: Arc<dyn Specification> = Arc::new(Catalogue::from_json(CATALOGUE).unwrap());
        let (tx, sent) = mpsc::channel(8);
        let (inject, rx) = mpsc::channel(8);

        let scheduled = actix::Actor::start(ScheduledResponses::new(message::LogId::new(0, 1)));
        let client = ObcClient::new(spec, Box::new(tx), Box::new(rx), scheduled, Duration::from_secs(1), chunk_size);

        Harness {
            client,
            sent,
            inject,
        }
    }

    fn reply(cmd: &Bytes, code: ResponseCode, body: &[u8]) -> Bytes {
        let header = CmdHeader::from_slice(cmd).unwrap();

        let mut payload = BytesMut::new();
        payload.put_u8(code as u8);
        payload.put_slice(body);

        CmdMessage {
            header:  header.response(payload.len()).unwrap(),
            payload: payload.freeze(),
        }
        .to_bytes()
        .unwrap()
    }

    #[actix::test]
    async fn no_response_expected() -> eyre::Result<()> {
        let mut h = harness(16);

        let outcome = h.client.send_cmd_recv_resp("noop".into(), &[], ExecTime::Immediate, None).await?;
        assert!(matches!(outcome, CmdOutcome::Sent(hdr) if hdr.cmd_id == 1 && hdr.seq_num == 0));

        let sent = h.sent.recv().await.unwrap();
        assert_eq!(sent.len(), CmdHeader::SIZE);

        let hdr = h.client.send_cmd("noop".into(), &[], ExecTime::Immediate).await?;
        assert_eq!(hdr.seq_num, 1);

        Ok(())
    }

    #[actix::test]
    async fn response_in_chunks_with_progress() -> eyre::Result<()> {
        let mut h = harness(1);

        let client = h.client;
        let task = tokio::spawn(async move {
            let mut seen = vec![];
            let outcome = client
                .send_cmd_with_progress(
                    "get_mode".into(),
                    &[Value::from(3u8)],
                    ExecTime::Immediate,
                    Some(Duration::from_secs(1)),
                    |got, total| seen.push((got, total)),
                )
                .await;

            (outcome, seen)
        });

        let cmd = h.sent.recv().await.unwrap();
        assert_eq!(&cmd[CmdHeader::SIZE..], &[3]);

        let resp = reply(&cmd, ResponseCode::Success, &[7]);
        h.inject.send(resp.slice(..5)).await?;
        h.inject.send(resp.slice(5..)).await?;

        let (outcome, seen) = task.await?;
        let resp = outcome?.response().cloned().unwrap();

        assert_eq!(resp.cmd_id(), 2);
        assert_eq!(resp.fields.unwrap()["mode"], Value::U64(7));
        assert_eq!(seen, vec![(1, 2), (2, 2)]);

        Ok(())
    }

    #[actix::test]
    async fn mismatched_or_missing_response() -> eyre::Result<()> {
        let mut h = harness(16);

        let short = Some(Duration::from_millis(50));
        let result = h.client.send_cmd_recv_resp("get_mode".into(), &[Value::from(1u8)], ExecTime::Immediate, short).await;
        assert!(matches!(result, Err(Error::Timeout)));
        h.sent.recv().await.unwrap();

        let bogus = CmdMessage {
            header:  CmdHeader::command(0, 9, ExecTime::Immediate, 0, 1)?.response(1)?,
            payload: Bytes::from_static(&[0]),
        };
        h.inject.send(bogus.to_bytes()?).await?;

        // stale bytes queued before the command are discarded, so this times out too
        let result = h.client.send_cmd_recv_resp("get_mode".into(), &[Value::from(1u8)], ExecTime::Immediate, short).await;
        assert!(matches!(result, Err(Error::Timeout)));

        let client = h.client;
        let task = tokio::spawn(async move {
            client
                .send_cmd_recv_resp("get_mode".into(), &[Value::from(1u8)], ExecTime::Immediate, Some(Duration::from_secs(1)))
                .await
        });

        h.sent.recv().await.unwrap();
        let cmd = h.sent.recv().await.unwrap();
        let mut wrong = CmdHeader::from_slice(&cmd)?;
        wrong.cmd_id = 9;
        let wrong = CmdMessage {
            header:  wrong.response(1)?,
            payload: Bytes::from_static(&[0]),
        };
        h.inject.send(wrong.to_bytes()?).await?;

        assert!(matches!(
            task.await?,
            Err(Error::Protocol(ProtocolError::CmdId {
                expected: 2,
                got:      9,
            }))
        ));

        Ok(())
    }

    #[actix::test]
    async fn undecodable_response_keeps_error() -> eyre::Result<()> {
        let mut h = harness(16);

        let client = h.client;
        let task = tokio::spawn(async move {
            client
                .send_cmd_recv_resp("get_mode".into(), &[Value::from(1u8)], ExecTime::Immediate, Some(Duration::from_secs(1)))
                .await
        });

        let cmd = h.sent.recv().await.unwrap();
        h.inject.send(reply(&cmd, ResponseCode::Success, &[1, 2, 3])).await?;

        let outcome = task.await??;
        let resp = outcome.response().unwrap();
        assert_eq!(resp.fields, None);
        assert!(matches!(resp.error, Some(message::DecodeError::Length { .. })));

        Ok(())
    }

    #[actix::test]
    async fn encode_errors_send_nothing() -> eyre::Result<()> {
        let mut h = harness(16);

        let result = h.client.send_cmd("get_mode".into(), &[], ExecTime::Immediate).await;
        assert!(matches!(result, Err(Error::Encode(_))));

        let result = h.client.send_cmd("nope".into(), &[], ExecTime::Immediate).await;
        assert!(matches!(result, Err(Error::Lookup(_))));

        assert!(h.sent.try_recv().is_err());

        Ok(())
    }
}
