use std::{
    fmt::{
        Display,
        Formatter,
    },
    time::Duration,
};

use bytes::Bytes;
use message::{
    CmdHeader,
    CommandSpec,
    CorrelationId,
    DecodeError,
    ExecTime,
    Fields,
    ResponseCode,
};
use packed_struct::PrimitiveEnum;
use tokio::sync::oneshot;

use crate::app::{
    Error,
    ProtocolError,
    Unresolved,
};

/// A completed command. `fields` is `None` when the payload was not decoded, either because
/// the command did not succeed or because decoding failed (then `error` is set).
#[derive(Debug, Clone, PartialEq)]
pub struct ObcResponse {
    pub header:    CmdHeader,
    pub code:      ResponseCode,
    pub exec_time: ExecTime,
    /// Payload after the response code.
    pub payload:   Bytes,
    pub fields:    Option<Fields>,
    pub error:     Option<DecodeError>,
}

impl ObcResponse {
    /// Interpret a response payload: a response code, then the command's response fields.
    pub fn parse(header: CmdHeader, payload: Bytes, spec: &dyn CommandSpec) -> Result<Self, ProtocolError> {
        let (&code, _) = payload.split_first().ok_or(ProtocolError::MissingCode)?;
        let code = ResponseCode::from_primitive(code).ok_or(ProtocolError::UnknownCode(code))?;
        let payload = payload.slice(1..);

        let (fields, error) = match code {
            ResponseCode::Success if spec.has_response() => match spec.decode_resp(&payload) {
                Ok(fields) => (Some(fields), None),
                Err(e) => {
                    tracing::warn!(error = %e, cmd = spec.name(), "failed to decode response");
                    (None, Some(e))
                },
            },
            _ => (None, None),
        };

        Ok(Self {
            header,
            code,
            exec_time: header.exec_time(),
            payload,
            fields,
            error,
        })
    }

    #[inline]
    pub fn cmd_id(&self) -> u8 {
        self.header.cmd_id
    }

    #[inline]
    pub fn correlation_id(&self) -> CorrelationId {
        self.header.uuid()
    }
}

impl Display for ObcResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (cmd {:#04x}, {})", self.code, self.header.cmd_id, self.exec_time)?;

        match (&self.fields, &self.error) {
            (_, Some(e)) => write!(f, " undecoded ({e}): 0x{}", hex::encode(&self.payload)),
            (Some(fields), None) => {
                for (k, v) in fields {
                    write!(f, " {k}={v}")?;
                }

                Ok(())
            },
            (None, None) if self.payload.is_empty() => Ok(()),
            (None, None) => write!(f, " 0x{}", hex::encode(&self.payload)),
        }
    }
}

type Resolution = Result<ObcResponse, Unresolved>;

enum Slot {
    Waiting(oneshot::Receiver<Resolution>),
    Resolved(ObcResponse),
    Failed(Unresolved),
}

/// A scheduled command the OBC accepted. The deferred response arrives whenever the OBC logs
/// its execution; nothing bounds that wait except the caller's timeout.
pub struct PendingResponse {
    pub sched_resp: ObcResponse,
    id:             CorrelationId,
    slot:           Slot,
}

impl PendingResponse {
    pub(crate) fn new(sched_resp: ObcResponse, id: CorrelationId, rx: oneshot::Receiver<Resolution>) -> Self {
        Self {
            sched_resp,
            id,
            slot: Slot::Waiting(rx),
        }
    }

    #[inline]
    pub fn correlation_id(&self) -> CorrelationId {
        self.id
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.slot, Slot::Resolved(_))
    }

    /// Wait for the deferred response. `Ok(None)` if the timeout elapses first, in which case
    /// waiting again is fine. Once resolved, every later call returns the same outcome.
    #[tracing::instrument(skip(self), fields(id = %self.id), err(Display))]
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<ObcResponse>, Error> {
        let rx = match &mut self.slot {
            Slot::Resolved(resp) => return Ok(Some(resp.clone())),
            Slot::Failed(e) => return Err(e.clone().into()),
            Slot::Waiting(rx) => rx,
        };

        let resolution = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(resolution) => resolution,
                Err(_elapsed) => return Ok(None),
            },
            None => rx.await,
        };

        match resolution.unwrap_or(Err(Unresolved::Dropped)) {
            Ok(resp) => {
                self.slot = Slot::Resolved(resp.clone());
                Ok(Some(resp))
            },
            Err(e) => {
                self.slot = Slot::Failed(e.clone());
                Err(e.into())
            },
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("sched_resp", &self.sched_resp)
            .field("id", &self.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
