//! Intent and entity registration.
//!
//! Registrations are published to the external matching service over the
//! bus; the registry keeps a cached copy of each spec so intents can be
//! detached and later re-enabled without re-deriving them.

use crate::context::SkillContext;
use crate::events::{EventHandler, EventRegistry};
use crate::munge::{munge_regex, to_alnum};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use skylark_core::{Error, Message, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Status prefix for intent handler start/complete reporting.
pub const HANDLER_STATUS: &str = "skylark.skill.handler";

/// A finalized keyword-parser description for one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentSpec {
    pub name: String,
    pub requires: Vec<String>,
    pub optional: Vec<String>,
    pub at_least_one: Vec<String>,
}

impl IntentSpec {
    pub fn builder(name: &str) -> IntentSpecBuilder {
        IntentSpecBuilder {
            spec: IntentSpec {
                name: name.to_string(),
                requires: Vec::new(),
                optional: Vec::new(),
                at_least_one: Vec::new(),
            },
        }
    }

    /// A spec is usable as a parser only when it constrains at least one
    /// keyword.
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidSpec("intent name is empty".to_string()));
        }
        if self.requires.is_empty() && self.at_least_one.is_empty() {
            return Err(Error::InvalidSpec(format!(
                "intent '{}' has no required keywords",
                self.name
            )));
        }
        Ok(())
    }

    /// Copy of the spec with every keyword and the name namespaced by the
    /// skill id, preventing cross-skill collisions at the matcher.
    fn munged(&self, skill_id: &str) -> IntentSpec {
        let prefix = to_alnum(skill_id);
        let munge = |kws: &[String]| kws.iter().map(|k| format!("{prefix}{k}")).collect();
        IntentSpec {
            name: format!("{skill_id}:{}", self.name),
            requires: munge(&self.requires),
            optional: munge(&self.optional),
            at_least_one: munge(&self.at_least_one),
        }
    }
}

pub struct IntentSpecBuilder {
    spec: IntentSpec,
}

impl IntentSpecBuilder {
    pub fn require(mut self, keyword: &str) -> Self {
        self.spec.requires.push(keyword.to_string());
        self
    }

    pub fn optionally(mut self, keyword: &str) -> Self {
        self.spec.optional.push(keyword.to_string());
        self
    }

    pub fn one_of(mut self, keyword: &str) -> Self {
        self.spec.at_least_one.push(keyword.to_string());
        self
    }

    pub fn build(self) -> IntentSpec {
        self.spec
    }
}

/// Cached registration, retained across disable so enable can republish.
#[derive(Debug, Clone)]
enum IntentKind {
    Built(IntentSpec),
    File { file: String },
}

pub struct IntentRegistry {
    ctx: Arc<SkillContext>,
    events: Arc<EventRegistry>,
    intents: Mutex<Vec<(String, IntentKind)>>,
}

impl IntentRegistry {
    pub fn new(ctx: Arc<SkillContext>, events: Arc<EventRegistry>) -> Self {
        Self {
            ctx,
            events,
            intents: Mutex::new(Vec::new()),
        }
    }

    /// Register a keyword intent with the matching service and install the
    /// handler under the munged intent name.
    pub fn register_intent(&self, spec: IntentSpec, handler: EventHandler) -> Result<()> {
        spec.validate()?;
        let munged = spec.munged(&self.ctx.skill_id);
        self.publish_built(&munged)?;
        self.intents
            .lock()
            .unwrap()
            .push((spec.name.clone(), IntentKind::Built(spec)));
        self.events
            .register(&munged.name, handler, Some(HANDLER_STATUS), false)
    }

    /// Register a declarative grammar file with the matching service.
    pub fn register_intent_file(&self, intent_file: &str, handler: EventHandler) -> Result<()> {
        let name = self.ctx.unique_name(intent_file);
        self.publish_file(intent_file, &name)?;
        self.intents.lock().unwrap().push((
            intent_file.to_string(),
            IntentKind::File {
                file: intent_file.to_string(),
            },
        ));
        self.events.register(&name, handler, Some(HANDLER_STATUS), false)
    }

    /// Register an entity example file with the matching service.
    pub fn register_entity_file(&self, entity_file: &str) -> Result<()> {
        let base = entity_file.trim_end_matches(".entity");
        let path = self
            .ctx
            .locator
            .find_resource(&format!("{base}.entity"), Some("vocab"))
            .ok_or_else(|| Error::ResourceNotFound(format!("{base}.entity")))?;
        self.ctx.bus()?.emit(Message::new(
            "intent_service.register_entity",
            json!({
                "file_name": path,
                "name": self.ctx.unique_name(base),
            }),
        ));
        Ok(())
    }

    /// Register a single keyword value for an intent entity.
    pub fn register_vocabulary(&self, entity: &str, entity_type: &str) -> Result<()> {
        self.ctx.bus()?.emit(Message::new(
            "register_vocab",
            json!({
                "start": entity,
                "end": format!("{}{}", self.ctx.alnum_id(), entity_type),
            }),
        ));
        Ok(())
    }

    /// Register a regex whose named groups become intent entities.
    pub fn register_regex(&self, regex_str: &str) -> Result<()> {
        let munged = munge_regex(regex_str, &self.ctx.skill_id);
        Regex::new(&munged).map_err(|e| Error::Validation(format!("invalid regex: {e}")))?;
        self.ctx
            .bus()?
            .emit(Message::new("register_vocab", json!({"regex": munged})));
        Ok(())
    }

    /// Detach an intent at the matching service while keeping the cached
    /// spec. Unknown names return false and publish nothing.
    pub fn disable_intent(&self, intent_name: &str) -> Result<bool> {
        let known = self
            .intents
            .lock()
            .unwrap()
            .iter()
            .any(|(name, _)| name == intent_name);
        if !known {
            warn!(intent = %intent_name, "cannot disable unregistered intent");
            return Ok(false);
        }
        debug!(intent = %intent_name, "disabling intent");
        self.ctx.bus()?.emit(Message::new(
            "detach_intent",
            json!({"intent_name": self.ctx.unique_name(intent_name)}),
        ));
        Ok(true)
    }

    /// Republish a fresh registration from the cached spec. The bus
    /// listener installed at registration time was never removed, so only
    /// the matcher-side registration needs to be restored.
    pub fn enable_intent(&self, intent_name: &str) -> Result<bool> {
        let kind = self
            .intents
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == intent_name)
            .map(|(_, kind)| kind.clone());
        match kind {
            Some(IntentKind::Built(spec)) => {
                self.publish_built(&spec.munged(&self.ctx.skill_id))?;
                debug!(intent = %intent_name, "enabled intent");
                Ok(true)
            }
            Some(IntentKind::File { file }) => {
                self.publish_file(&file, &self.ctx.unique_name(&file))?;
                debug!(intent = %intent_name, "enabled intent file");
                Ok(true)
            }
            None => {
                warn!(intent = %intent_name, "cannot enable unregistered intent");
                Ok(false)
            }
        }
    }

    /// Whether this skill registered the given intent name.
    pub fn owns(&self, intent_name: &str) -> bool {
        self.intents
            .lock()
            .unwrap()
            .iter()
            .any(|(name, _)| name == intent_name)
    }

    /// Detach every registered intent from the matching service.
    pub fn detach(&self) -> Result<()> {
        let names: Vec<String> = self
            .intents
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| self.ctx.unique_name(name))
            .collect();
        let bus = self.ctx.bus()?;
        for name in names {
            bus.emit(Message::new("detach_intent", json!({"intent_name": name})));
        }
        Ok(())
    }

    fn publish_built(&self, munged: &IntentSpec) -> Result<()> {
        self.ctx.bus()?.emit(Message::new(
            "register_intent",
            serde_json::to_value(munged)?,
        ));
        Ok(())
    }

    fn publish_file(&self, intent_file: &str, name: &str) -> Result<()> {
        let path = self
            .ctx
            .locator
            .find_resource(intent_file, Some("vocab"))
            .ok_or_else(|| Error::ResourceNotFound(intent_file.to_string()))?;
        self.ctx.bus()?.emit(Message::new(
            "intent_service.register_file",
            json!({"file_name": path, "name": name}),
        ));
        Ok(())
    }
}
