use std::sync::Arc;

use bytes::BytesMut;
use message::{
    LogHeader,
    LogRecord,
    LogSpec,
    Specification,
};
use packed_struct::prelude::*;
use tokio_util::codec::Decoder;

enum State {
    Header,
    Payload {
        header: LogHeader,
        spec:   Option<Arc<dyn LogSpec>>,
    },
}

/// Turns the log channel's byte stream into records decorated from the [`Specification`].
///
/// Unknown log ids still produce a record, just without names; payloads that don't match
/// their log definition carry the decode error instead of fields.
pub struct LogDecoder {
    spec:  Arc<dyn Specification>,
    state: State,
}

impl LogDecoder {
    pub fn new(spec: Arc<dyn Specification>) -> Self {
        Self {
            spec,
            state: State::Header,
        }
    }

    fn complete(
        header: &LogHeader,
        spec: Option<&Arc<dyn LogSpec>>,
        payload: BytesMut,
    ) -> LogRecord {
        let mut record = LogRecord::raw(header, payload.freeze());

        let Some(spec) = spec else {
            return record;
        };

        record.group_name = Some(spec.group_name().to_owned());
        record.name = Some(spec.name().to_owned());
        record.description = Some(spec.description().to_owned());

        match spec.decode(&record.payload) {
            Ok(fields) => record.fields = Some(fields),
            Err(e) => {
                tracing::warn!(error = %e, id = %record.id, "failed to decode log payload");
                record.error = Some(e);
            },
        }

        record
    }
}

impl Decoder for LogDecoder {
    type Error = crate::Error;
    type Item = LogRecord;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogRecord>, crate::Error> {
        if let State::Header = self.state {
            if src.len() < LogHeader::SIZE {
                return Ok(None);
            }

            let header_bytes = src.split_to(LogHeader::SIZE);
            let header = LogHeader::unpack_from_slice(&header_bytes)
                .map_err(message::log::Error::from)?;

            let spec = match self.spec.log(header.id()) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    tracing::warn!(error = %e, "log lookup failed");
                    None
                },
            };

            if header.len == 0 {
                return Ok(Some(Self::complete(&header, spec.as_ref(), BytesMut::new())));
            }

            self.state = State::Payload {
                header,
                spec,
            };
        }

        let State::Payload {
            header,
            ..
        } = &self.state
        else {
            return Ok(None);
        };

        let len = header.len as usize;
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(len);

        match std::mem::replace(&mut self.state, State::Header) {
            State::Payload {
                header,
                spec,
            } => Ok(Some(Self::complete(&header, spec.as_ref(), payload))),
            State::Header => Ok(None),
        }
    }
}
