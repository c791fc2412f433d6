use std::{
    sync::Arc,
    time::Duration,
};

use actix::{
    Actor,
    ActorContext,
    AsyncContext,
    Context,
    Handler,
    Message,
    StreamHandler,
};
use message::{
    CmdMessage,
    CommandSpec,
    CorrelationId,
    LogId,
    LogRecord,
};
use tokio::sync::oneshot;

use crate::app::{
    ObcResponse,
    Unresolved,
};

const GC_INTERVAL: Duration = Duration::from_secs(5);

/// Wait for the deferred response to the scheduled command identified by `id`.
#[derive(Debug, Message)]
#[rtype(result = "()")]
pub struct Register {
    pub id:   CorrelationId,
    pub spec: Arc<dyn CommandSpec>,
    pub tx:   oneshot::Sender<Result<ObcResponse, Unresolved>>,
}

#[derive(Debug, Clone, Copy, Message)]
#[rtype(result = "()")]
pub struct Stop;

struct Waiter {
    spec: Arc<dyn CommandSpec>,
    tx:   oneshot::Sender<Result<ObcResponse, Unresolved>>,
}

/// Matches scheduled-response log records against registered commands.
///
/// Each record is resolved against at most one waiter; the entry is removed in the same step
/// it is looked up. Waiters whose receiver went away are collected periodically.
pub struct ScheduledResponses {
    log_id:  LogId,
    pending: fnv::FnvHashMap<CorrelationId, Waiter>,
}

impl ScheduledResponses {
    pub fn new(log_id: LogId) -> Self {
        Self {
            log_id,
            pending: Default::default(),
        }
    }

    fn collect_garbage(&mut self) {
        let before = self.pending.len();
        self.pending.retain(|_, waiter| !waiter.tx.is_closed());

        let collected = before - self.pending.len();
        if collected > 0 {
            tracing::debug!(collected, "dropped abandoned scheduled responses");
        }
    }

    fn resolve(&mut self, record: &LogRecord) {
        let msg = match CmdMessage::from_slice(&record.payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, payload = %hex::encode(&record.payload), "malformed scheduled response log");
                return;
            },
        };

        let id = msg.header.uuid();

        let Some(waiter) = self.pending.remove(&id) else {
            tracing::debug!(%id, "scheduled response for unregistered command");
            return;
        };

        let result = ObcResponse::parse(msg.header, msg.payload, &*waiter.spec).map_err(Unresolved::from);
        if let Err(ref e) = result {
            tracing::warn!(error = %e, %id, "scheduled response did not parse");
        }

        if waiter.tx.send(result).is_err() {
            tracing::warn!(%id, "resolved scheduled command whose listener was dropped");
        }
    }
}

impl Actor for ScheduledResponses {
    type Context = Context<Self>;

    #[tracing::instrument(skip_all, fields(log_id = %self.log_id))]
    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("listening for scheduled responses");

        ctx.run_interval(GC_INTERVAL, |a, _ctx| {
            a.collect_garbage();
        });
    }
}

impl Handler<Register> for ScheduledResponses {
    type Result = ();

    #[tracing::instrument(skip_all, fields(id = %msg.id, cmd = msg.spec.name()))]
    fn handle(&mut self, msg: Register, _ctx: &mut Self::Context) -> Self::Result {
        let waiter = Waiter {
            spec: msg.spec,
            tx:   msg.tx,
        };

        if let Some(old) = self.pending.insert(msg.id, waiter) {
            tracing::warn!("correlation id already pending, superseding older command");
            if old.tx.send(Err(Unresolved::Superseded)).is_err() {
                tracing::debug!("superseded listener already gone");
            }
        }
    }
}

impl Handler<Stop> for ScheduledResponses {
    type Result = ();

    fn handle(&mut self, _msg: Stop, ctx: &mut Self::Context) -> Self::Result {
        ctx.stop();
    }
}

impl StreamHandler<LogRecord> for ScheduledResponses {
    fn handle(&mut self, record: LogRecord, _ctx: &mut Self::Context) {
        if record.id == self.log_id {
            self.resolve(&record);
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("log stream ended");
        ctx.stop();
    }
}
