use crate::munge::to_alnum;
use once_cell::sync::OnceCell;
use serde_json::json;
use skylark_core::{
    DialogRenderer, Error, Message, MessageBus, MetricsSink, ResourceLocator, Result,
    SettingsStore, SpeechGate,
};
use std::sync::Arc;

/// Shared per-skill state and collaborator handles.
///
/// The context is created unbound; every operation that needs the bus
/// fails with [`Error::NotBound`] until the bus has been attached.
pub struct SkillContext {
    /// Human-readable skill name, e.g. "WeatherSkill".
    pub name: String,
    /// Unique skill id, used to namespace everything the skill registers.
    pub skill_id: String,
    /// Default language code for resource lookup.
    pub lang: String,
    bus: OnceCell<MessageBus>,
    pub locator: Arc<dyn ResourceLocator>,
    pub dialog: Arc<dyn DialogRenderer>,
    pub settings: Arc<dyn SettingsStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub speech: Arc<dyn SpeechGate>,
}

impl SkillContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        skill_id: String,
        lang: String,
        locator: Arc<dyn ResourceLocator>,
        dialog: Arc<dyn DialogRenderer>,
        settings: Arc<dyn SettingsStore>,
        metrics: Arc<dyn MetricsSink>,
        speech: Arc<dyn SpeechGate>,
    ) -> Self {
        Self {
            name,
            skill_id,
            lang,
            bus: OnceCell::new(),
            locator,
            dialog,
            settings,
            metrics,
            speech,
        }
    }

    pub(crate) fn bind_bus(&self, bus: MessageBus) -> Result<()> {
        self.bus
            .set(bus)
            .map_err(|_| Error::Validation(format!("skill {} is already bound", self.skill_id)))
    }

    pub fn bus(&self) -> Result<&MessageBus> {
        self.bus
            .get()
            .ok_or_else(|| Error::NotBound(self.skill_id.clone()))
    }

    pub fn is_bound(&self) -> bool {
        self.bus.get().is_some()
    }

    /// Alphanumeric form of the skill id used in munged keyword names.
    pub fn alnum_id(&self) -> String {
        to_alnum(&self.skill_id)
    }

    /// Name unique to this skill, in the form `<skill_id>:<name>`.
    pub fn unique_name(&self, name: &str) -> String {
        format!("{}:{}", self.skill_id, name)
    }

    /// Emit a speak request. When `origin` is given the request is sent as
    /// a reply so the correlation id survives into the audio pipeline.
    pub fn speak(
        &self,
        utterance: &str,
        expect_response: bool,
        origin: Option<&Message>,
    ) -> Result<()> {
        let data = json!({
            "utterance": utterance,
            "expect_response": expect_response,
        });
        let msg = match origin {
            Some(m) => m.reply("speak", data),
            None => Message::new("speak", data),
        };
        self.bus()?.emit(msg);
        Ok(())
    }

    /// Bump this skill on the intent service's active-skill list so its
    /// conversation hook receives upcoming utterances.
    pub fn make_active(&self) -> Result<()> {
        self.bus()?.emit(Message::new(
            "active_skill_request",
            json!({"skill_id": self.skill_id}),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;

    #[test]
    fn unbound_operations_fail_with_not_bound() {
        let ctx = test_context("TestSkill", "test.skill");
        assert!(matches!(ctx.bus(), Err(Error::NotBound(_))));
        assert!(matches!(
            ctx.speak("hello", false, None),
            Err(Error::NotBound(_))
        ));
    }

    #[test]
    fn bind_is_one_shot() {
        let ctx = test_context("TestSkill", "test.skill");
        ctx.bind_bus(MessageBus::new()).unwrap();
        assert!(ctx.is_bound());
        assert!(ctx.bind_bus(MessageBus::new()).is_err());
    }

    #[test]
    fn unique_name_namespaces_with_skill_id() {
        let ctx = test_context("TestSkill", "test.skill");
        assert_eq!(ctx.unique_name("alarm"), "test.skill:alarm");
        assert_eq!(ctx.alnum_id(), "test_skill");
    }

    #[test]
    fn speak_replies_when_origin_given() {
        let ctx = test_context("TestSkill", "test.skill");
        let bus = MessageBus::new();
        ctx.bind_bus(bus.clone()).unwrap();
        let spoken = crate::testutil::probe(&bus, "speak");

        let origin = Message::with_context(
            "trigger",
            json!({}),
            json!({"ident": "corr-1"}),
        );
        ctx.speak("hello there", true, Some(&origin)).unwrap();

        let messages = spoken.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data["utterance"], json!("hello there"));
        assert_eq!(messages[0].data["expect_response"], json!(true));
        assert_eq!(messages[0].ident(), Some("corr-1"));
    }
}
