//! Event handler lifecycle management.
//!
//! Every listener a skill installs on the shared bus goes through the
//! registry so it can be wrapped with status reporting, error containment
//! and timing, and so teardown can find it again by name.

use crate::context::SkillContext;
use crate::munge::{camel_case_split, unmunge_message};
use serde_json::json;
use skylark_core::{BusHandler, ListenerId, Message, Result};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Uniform handler signature. Handlers that do not need the triggering
/// message simply ignore the parameter.
pub type EventHandler = Arc<dyn Fn(&Message) -> Result<()> + Send + Sync>;

struct RegisteredEvent {
    name: String,
    id: ListenerId,
    once: bool,
}

pub struct EventRegistry {
    ctx: Arc<SkillContext>,
    // Ordered; duplicate names are permitted and removed together.
    events: Arc<Mutex<Vec<RegisteredEvent>>>,
}

impl EventRegistry {
    pub fn new(ctx: Arc<SkillContext>) -> Self {
        Self {
            ctx,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Install a wrapped listener for an intent or other bus event.
    ///
    /// With a `status_prefix`, `<prefix>.start` and `<prefix>.complete`
    /// are emitted around the handler so the rest of the system can track
    /// handler activity. `once` listeners deregister themselves before
    /// invocation, so a self-scheduling handler may safely re-register.
    pub fn register(
        &self,
        name: &str,
        handler: EventHandler,
        status_prefix: Option<&str>,
        once: bool,
    ) -> Result<()> {
        let bus = self.ctx.bus()?.clone();

        let wrapper: BusHandler = {
            let ctx = self.ctx.clone();
            let events = self.events.clone();
            let name = name.to_string();
            let prefix = status_prefix.map(str::to_string);
            Arc::new(move |message: Message| {
                let message = unmunge_message(message, &ctx.skill_id);
                let mut status = json!({"name": name});

                if let Some(prefix) = &prefix {
                    if let Ok(bus) = ctx.bus() {
                        bus.emit(message.reply(&format!("{prefix}.start"), status.clone()));
                    }
                }

                if once {
                    // The bus has already dropped the listener; forget one
                    // one-shot record before invoking so the handler can
                    // re-register under the same name. Non-once siblings
                    // sharing the name keep their records.
                    let mut events = events.lock().unwrap();
                    if let Some(pos) = events.iter().position(|e| e.once && e.name == name) {
                        events.remove(pos);
                    }
                }

                let started = Instant::now();
                match handler(&message) {
                    Ok(()) => ctx.settings.store(),
                    Err(e) => {
                        let spoken_name = camel_case_split(&ctx.name);
                        let apology = ctx
                            .dialog
                            .render("skill.error", &json!({"skill": spoken_name}))
                            .unwrap_or_else(|| {
                                format!("An error occurred while processing a request in {spoken_name}")
                            });
                        if let Err(speak_err) = ctx.speak(&apology, false, Some(&message)) {
                            warn!(error = %speak_err, "failed to speak handler error");
                        }
                        error!(
                            skill_id = %ctx.skill_id,
                            event = %name,
                            error = %e,
                            "handler failed"
                        );
                        status["exception"] = json!(e.to_string());
                    }
                }

                if let Some(prefix) = &prefix {
                    if let Ok(bus) = ctx.bus() {
                        bus.emit(message.reply(&format!("{prefix}.complete"), status));
                    }
                }

                if let Some(ident) = message.ident() {
                    ctx.metrics.report_timing(
                        ident,
                        "skill_handler",
                        started.elapsed(),
                        json!({"handler": name, "skill_id": ctx.skill_id}),
                    );
                }
            })
        };

        let id = if once {
            bus.once(name, wrapper)
        } else {
            bus.on(name, wrapper)
        };
        self.events.lock().unwrap().push(RegisteredEvent {
            name: name.to_string(),
            id,
            once,
        });
        debug!(event = %name, once, "registered event handler");
        Ok(())
    }

    /// Install a listener without status reporting, settings persistence
    /// or spoken error feedback. Used for internal system triggers that
    /// must still be torn down with the skill.
    pub fn register_light(&self, name: &str, handler: EventHandler) -> Result<()> {
        let bus = self.ctx.bus()?.clone();
        let wrapper: BusHandler = {
            let name = name.to_string();
            Arc::new(move |message: Message| {
                if let Err(e) = handler(&message) {
                    warn!(event = %name, error = %e, "light handler failed");
                }
            })
        };
        let id = bus.on(name, wrapper);
        self.events.lock().unwrap().push(RegisteredEvent {
            name: name.to_string(),
            id,
            once: false,
        });
        Ok(())
    }

    /// Remove every local record for `name` and every bus listener under
    /// that literal name. Returns whether anything was found locally.
    pub fn unregister(&self, name: &str) -> Result<bool> {
        let bus = self.ctx.bus()?.clone();
        let removed = {
            let mut events = self.events.lock().unwrap();
            let before = events.len();
            events.retain(|e| e.name != name);
            events.len() < before
        };
        if removed {
            bus.remove_all_listeners(name);
        }
        Ok(removed)
    }

    /// Tear down every registration this skill owns. Removal is by
    /// listener id so other skills sharing a message type are unaffected.
    pub fn clear(&self) -> Result<()> {
        let bus = self.ctx.bus()?.clone();
        let drained: Vec<RegisteredEvent> =
            self.events.lock().unwrap().drain(..).collect();
        for event in drained {
            bus.remove(&event.name, event.id);
        }
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e.name == name)
    }
}
