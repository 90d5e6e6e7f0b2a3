//! Client side of the external scheduler service.
//!
//! The scheduler owns fire times and replays due events back over the bus
//! under the name they were scheduled with; this client installs the
//! matching listeners and tracks just enough local state to keep
//! repeating registrations idempotent.

use crate::context::SkillContext;
use crate::events::{EventHandler, EventRegistry};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use skylark_core::{Error, Message, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Ceiling on the wait for a status-query reply.
const STATUS_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// When a scheduled event should first fire.
#[derive(Debug, Clone, Copy)]
pub enum When {
    At(DateTime<Utc>),
    In(Duration),
}

impl When {
    /// Normalize to an absolute time before transmission.
    fn resolve(self) -> DateTime<Utc> {
        match self {
            When::At(t) => t,
            When::In(d) => Utc::now() + chrono::Duration::from_std(d).unwrap_or_default(),
        }
    }
}

impl From<DateTime<Utc>> for When {
    fn from(t: DateTime<Utc>) -> Self {
        When::At(t)
    }
}

impl From<Duration> for When {
    fn from(d: Duration) -> Self {
        When::In(d)
    }
}

pub struct SchedulerClient {
    ctx: Arc<SkillContext>,
    events: Arc<EventRegistry>,
    // Friendly names of active repeating events; the sole local source of
    // truth for idempotency.
    repeating: Mutex<Vec<String>>,
}

impl SchedulerClient {
    pub fn new(ctx: Arc<SkillContext>, events: Arc<EventRegistry>) -> Self {
        Self {
            ctx,
            events,
            repeating: Mutex::new(Vec::new()),
        }
    }

    /// Schedule a single-shot event. When the scheduler replays it the
    /// handler fires exactly once; the listener does not re-arm.
    ///
    /// Returns the reference name used, generated when none is given.
    pub fn schedule_event(
        &self,
        handler: EventHandler,
        when: When,
        data: Option<Value>,
        name: Option<&str>,
    ) -> Result<String> {
        self.schedule(handler, when, data, name, None)
    }

    /// Schedule a repeating event. Idempotent on `name`: scheduling an
    /// already-active repeating name is a no-op, guarding against
    /// duplicate timers from re-entrant setup.
    pub fn schedule_repeating_event(
        &self,
        handler: EventHandler,
        when: Option<When>,
        frequency: Duration,
        data: Option<Value>,
        name: Option<&str>,
    ) -> Result<String> {
        if let Some(name) = name {
            if self.repeating.lock().unwrap().iter().any(|n| n == name) {
                debug!(event = %name, "repeating event already scheduled");
                return Ok(name.to_string());
            }
        }
        let when = when.unwrap_or(When::In(frequency));
        self.schedule(handler, when, data, name, Some(frequency))
    }

    fn schedule(
        &self,
        handler: EventHandler,
        when: When,
        data: Option<Value>,
        name: Option<&str>,
        repeat: Option<Duration>,
    ) -> Result<String> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let unique = self.ctx.unique_name(&name);

        self.events
            .register(&unique, handler, None, repeat.is_none())?;
        if repeat.is_some() {
            self.repeating.lock().unwrap().push(name.clone());
        }

        self.ctx.bus()?.emit(Message::new(
            "skylark.scheduler.schedule_event",
            json!({
                "time": when.resolve().timestamp(),
                "event": unique,
                "repeat": repeat.map(|d| d.as_secs_f64()),
                "data": data.unwrap_or_else(|| json!({})),
            }),
        ));
        debug!(event = %name, repeating = repeat.is_some(), "scheduled event");
        Ok(name)
    }

    /// Replace the data attached to a scheduled event.
    pub fn update_scheduled_event(&self, name: &str, data: Value) -> Result<()> {
        self.ctx.bus()?.emit(Message::new(
            "skylark.scheduler.update_event",
            json!({
                "event": self.ctx.unique_name(name),
                "data": data,
            }),
        ));
        Ok(())
    }

    /// Cancel a pending event: forget the repeating name, drop the local
    /// listener, and ask the scheduler to remove its record. Returns
    /// whether anything was registered locally.
    pub fn cancel_scheduled_event(&self, name: &str) -> Result<bool> {
        let unique = self.ctx.unique_name(name);
        self.repeating.lock().unwrap().retain(|n| n != name);
        let removed = self.events.unregister(&unique)?;
        if removed {
            self.ctx.bus()?.emit(Message::new(
                "skylark.scheduler.remove_event",
                json!({"event": unique}),
            ));
        }
        Ok(removed)
    }

    /// Query the scheduler for an event's fire time and return the number
    /// of seconds until it fires. Fails with [`Error::Timeout`] when no
    /// reply arrives within the wait ceiling.
    pub async fn get_scheduled_event_status(&self, name: &str) -> Result<i64> {
        let unique = self.ctx.unique_name(name);
        let bus = self.ctx.bus()?.clone();

        let (tx, rx) = oneshot::channel::<Message>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let reply_type = format!("skylark.scheduler.event_status.{unique}");
        bus.once(
            &reply_type,
            Arc::new(move |msg| {
                if let Some(tx) = slot.lock().unwrap().take() {
                    let _ = tx.send(msg);
                }
            }),
        );

        bus.emit(Message::new(
            "skylark.scheduler.get_event",
            json!({"name": unique}),
        ));

        let reply = match tokio::time::timeout(STATUS_QUERY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            _ => {
                bus.remove_all_listeners(&reply_type);
                return Err(Error::Timeout(format!(
                    "no status reply for scheduled event '{name}'"
                )));
            }
        };

        let fire_time = reply
            .data
            .get("time")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::Validation(format!("malformed status reply for '{name}'"))
            })?;
        Ok(fire_time - Utc::now().timestamp())
    }

    /// Cancel every repeating event started by the skill. Operates on a
    /// snapshot copy of the repeating set, never the live one.
    pub fn cancel_all_repeating_events(&self) -> Result<()> {
        let names: Vec<String> = self.repeating.lock().unwrap().clone();
        for name in names {
            self.cancel_scheduled_event(&name)?;
        }
        Ok(())
    }

    pub fn active_repeating(&self) -> Vec<String> {
        self.repeating.lock().unwrap().clone()
    }
}
