//! The skill itself: construction, bus binding and lifecycle.
//!
//! A skill is built unbound with an explicit registration table of
//! intents and handlers, then attached to the shared bus with
//! [`Skill::bind`], which installs the system listeners and publishes
//! the declared registrations.

use crate::context::SkillContext;
use crate::conversation::{ConversationController, ConverseGate, ConverseHook};
use crate::events::{EventHandler, EventRegistry};
use crate::intent::{IntentRegistry, IntentSpec};
use crate::munge::to_alnum;
use crate::scheduler::SchedulerClient;
use crate::vocab::VocabularyMatcher;
use serde_json::json;
use skylark_core::{
    DialogRenderer, Error, Message, MessageBus, MetricsSink, NullLocator, NullMetrics,
    NullRenderer, NullSettings, NullSpeechGate, ResourceLocator, Result, SettingsStore,
    SpeechGate,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long the stop watchdog waits before assuming the stop callback
/// handled the request itself.
const STOP_WATCHDOG: Duration = Duration::from_millis(100);

/// Stop callback; returns true when the skill acted on the request.
pub type StopHandler = Arc<dyn Fn() -> Result<bool> + Send + Sync>;

struct Declarations {
    intents: Vec<(IntentSpec, EventHandler)>,
    intent_files: Vec<(String, EventHandler)>,
    entity_files: Vec<String>,
    resting_screen: Option<(String, EventHandler)>,
}

pub struct SkillBuilder {
    name: String,
    skill_id: String,
    lang: String,
    locator: Arc<dyn ResourceLocator>,
    dialog: Arc<dyn DialogRenderer>,
    settings: Arc<dyn SettingsStore>,
    metrics: Arc<dyn MetricsSink>,
    speech: Arc<dyn SpeechGate>,
    converse: Option<ConverseHook>,
    stop: Option<StopHandler>,
    declarations: Declarations,
}

impl SkillBuilder {
    pub fn new(name: &str, skill_id: &str) -> Self {
        Self {
            name: name.to_string(),
            skill_id: skill_id.to_string(),
            lang: "en-us".to_string(),
            locator: Arc::new(NullLocator),
            dialog: Arc::new(NullRenderer),
            settings: Arc::new(NullSettings),
            metrics: Arc::new(NullMetrics),
            speech: Arc::new(NullSpeechGate),
            converse: None,
            stop: None,
            declarations: Declarations {
                intents: Vec::new(),
                intent_files: Vec::new(),
                entity_files: Vec::new(),
                resting_screen: None,
            },
        }
    }

    pub fn lang(mut self, lang: &str) -> Self {
        self.lang = lang.to_string();
        self
    }

    pub fn locator(mut self, locator: Arc<dyn ResourceLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn dialog(mut self, dialog: Arc<dyn DialogRenderer>) -> Self {
        self.dialog = dialog;
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn speech(mut self, speech: Arc<dyn SpeechGate>) -> Self {
        self.speech = speech;
        self
    }

    /// The skill's normal multi-turn conversation handler.
    pub fn converse(mut self, hook: ConverseHook) -> Self {
        self.converse = Some(hook);
        self
    }

    pub fn stop_handler(mut self, stop: StopHandler) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Declare an intent and its handler, registered at bind time.
    pub fn intent(mut self, spec: IntentSpec, handler: EventHandler) -> Self {
        self.declarations.intents.push((spec, handler));
        self
    }

    /// Declare an intent file and its handler, registered at bind time.
    pub fn intent_file(mut self, file: &str, handler: EventHandler) -> Self {
        self.declarations
            .intent_files
            .push((file.to_string(), handler));
        self
    }

    pub fn entity_file(mut self, file: &str) -> Self {
        self.declarations.entity_files.push(file.to_string());
        self
    }

    /// Declare the page shown when the device enters idle mode. Only one
    /// is kept; a later declaration replaces an earlier one.
    pub fn resting_screen(mut self, name: &str, handler: EventHandler) -> Self {
        self.declarations.resting_screen = Some((name.to_string(), handler));
        self
    }

    pub fn build(self) -> Skill {
        let ctx = Arc::new(SkillContext::new(
            self.name,
            self.skill_id,
            self.lang,
            self.locator,
            self.dialog,
            self.settings,
            self.metrics,
            self.speech,
        ));
        let events = Arc::new(EventRegistry::new(ctx.clone()));
        let intents = Arc::new(IntentRegistry::new(ctx.clone(), events.clone()));
        let scheduler = Arc::new(SchedulerClient::new(ctx.clone(), events.clone()));
        let vocab = Arc::new(VocabularyMatcher::new(ctx.clone()));
        let gate = Arc::new(ConverseGate::new(self.converse));
        let conversation = Arc::new(ConversationController::new(
            ctx.clone(),
            vocab.clone(),
            gate.clone(),
        ));
        Skill {
            ctx,
            events,
            intents,
            scheduler,
            vocab,
            gate,
            conversation,
            stop: self.stop.unwrap_or_else(|| Arc::new(|| Ok(false))),
            declarations: Mutex::new(Some(self.declarations)),
        }
    }
}

pub struct Skill {
    ctx: Arc<SkillContext>,
    events: Arc<EventRegistry>,
    intents: Arc<IntentRegistry>,
    scheduler: Arc<SchedulerClient>,
    vocab: Arc<VocabularyMatcher>,
    gate: Arc<ConverseGate>,
    conversation: Arc<ConversationController>,
    stop: StopHandler,
    // Consumed by bind().
    declarations: Mutex<Option<Declarations>>,
}

impl Skill {
    pub fn builder(name: &str, skill_id: &str) -> SkillBuilder {
        SkillBuilder::new(name, skill_id)
    }

    pub fn context(&self) -> &Arc<SkillContext> {
        &self.ctx
    }

    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    pub fn intents(&self) -> &Arc<IntentRegistry> {
        &self.intents
    }

    pub fn scheduler(&self) -> &Arc<SchedulerClient> {
        &self.scheduler
    }

    pub fn conversation(&self) -> &Arc<ConversationController> {
        &self.conversation
    }

    pub fn vocab(&self) -> &Arc<VocabularyMatcher> {
        &self.vocab
    }

    /// Attach the skill to the bus, install system listeners and publish
    /// every declared registration.
    pub fn bind(&self, bus: MessageBus) -> Result<()> {
        self.ctx.bind_bus(bus)?;

        self.install_system_listeners()?;

        let declarations = self
            .declarations
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Validation("skill declarations already consumed".into()))?;
        for (spec, handler) in declarations.intents {
            self.intents.register_intent(spec, handler)?;
        }
        for (file, handler) in declarations.intent_files {
            self.intents.register_intent_file(&file, handler)?;
        }
        for file in declarations.entity_files {
            self.intents.register_entity_file(&file)?;
        }
        if let Some((name, handler)) = declarations.resting_screen {
            self.register_resting_screen(&name, handler)?;
        }

        info!(skill_id = %self.ctx.skill_id, "skill bound");
        Ok(())
    }

    fn install_system_listeners(&self) -> Result<()> {
        let stop = self.stop.clone();
        let ctx = self.ctx.clone();
        self.events.register(
            "skylark.stop",
            Arc::new(move |_msg| handle_stop(&ctx, &stop)),
            None,
            false,
        )?;

        let intents = self.intents.clone();
        self.events.register(
            "skylark.skill.enable_intent",
            Arc::new(move |msg| {
                if let Some(name) = msg.data_str("intent_name") {
                    if intents.owns(name) {
                        intents.enable_intent(name)?;
                    }
                }
                Ok(())
            }),
            None,
            false,
        )?;

        let intents = self.intents.clone();
        self.events.register(
            "skylark.skill.disable_intent",
            Arc::new(move |msg| {
                if let Some(name) = msg.data_str("intent_name") {
                    if intents.owns(name) {
                        intents.disable_intent(name)?;
                    }
                }
                Ok(())
            }),
            None,
            false,
        )?;

        let ctx = self.ctx.clone();
        self.events.register(
            "skylark.skill.set_cross_context",
            Arc::new(move |msg| {
                let context = msg.data_str("context").unwrap_or_default().to_string();
                let word = msg.data_str("word").unwrap_or_default().to_string();
                let origin = msg.data_str("origin").unwrap_or_default().to_string();
                set_context(&ctx, &context, &word, &origin)
            }),
            None,
            false,
        )?;

        let ctx = self.ctx.clone();
        self.events.register(
            "skylark.skill.remove_cross_context",
            Arc::new(move |msg| {
                let context = msg.data_str("context").unwrap_or_default().to_string();
                remove_context(&ctx, &context)
            }),
            None,
            false,
        )?;

        let settings = self.ctx.settings.clone();
        self.events.register_light(
            "skylark.skills.settings.update",
            Arc::new(move |_| {
                settings.run_poll();
                Ok(())
            }),
        )?;

        Ok(())
    }

    fn register_resting_screen(&self, name: &str, handler: EventHandler) -> Result<()> {
        let msg_type = format!("{}.idle", self.ctx.skill_id);
        self.events.register(&msg_type, handler, None, false)?;

        let ctx = self.ctx.clone();
        let screen_name = name.to_string();
        let announce: EventHandler = Arc::new(move |_| {
            ctx.bus()?.emit(Message::new(
                "skylark.register_resting",
                json!({"name": screen_name, "id": ctx.skill_id}),
            ));
            Ok(())
        });
        self.events
            .register("skylark.collect_resting", announce.clone(), None, false)?;
        // Announce at bind so a reloaded skill is re-registered.
        announce(&Message::new("skylark.collect_resting", json!({})))
    }

    pub fn speak(&self, utterance: &str, expect_response: bool) -> Result<()> {
        self.ctx.speak(utterance, expect_response, None)
    }

    /// Speak a rendered dialog line.
    pub fn speak_dialog(&self, key: &str, data: serde_json::Value) -> Result<()> {
        let line = self
            .ctx
            .dialog
            .render(key, &data)
            .ok_or_else(|| Error::Dialog(format!("cannot render dialog '{key}'")))?;
        self.ctx.speak(&line, false, None)
    }

    pub fn make_active(&self) -> Result<()> {
        self.ctx.make_active()
    }

    /// Add a keyword context to the intent service, namespaced to this
    /// skill.
    pub fn set_context(&self, context: &str, word: &str) -> Result<()> {
        set_context(&self.ctx, context, word, "")
    }

    pub fn remove_context(&self, context: &str) -> Result<()> {
        remove_context(&self.ctx, context)
    }

    /// Ask every skill to add a context keyword.
    pub fn set_cross_skill_context(&self, context: &str, word: &str) -> Result<()> {
        self.ctx.bus()?.emit(Message::new(
            "skylark.skill.set_cross_context",
            json!({"context": context, "word": word, "origin": self.ctx.skill_id}),
        ));
        Ok(())
    }

    /// Ask every skill to drop a context keyword.
    pub fn remove_cross_skill_context(&self, context: &str) -> Result<()> {
        if context.is_empty() {
            return Err(Error::Validation("context must not be empty".into()));
        }
        self.ctx.bus()?.emit(Message::new(
            "skylark.skill.remove_cross_context",
            json!({"context": context}),
        ));
        Ok(())
    }

    /// Entry point for the intent service's conversation dispatch.
    pub fn handle_converse(&self, utterances: &[String], lang: &str) -> bool {
        self.gate.converse(utterances, lang)
    }

    /// Tear down everything the skill attached to the bus and release its
    /// external registrations.
    pub fn shutdown(&self) -> Result<()> {
        self.scheduler.cancel_all_repeating_events()?;
        self.events.clear()?;
        self.ctx.bus()?.emit(Message::new(
            "detach_skill",
            json!({"skill_id": format!("{}:", self.ctx.skill_id)}),
        ));
        self.ctx.settings.store();
        self.ctx.settings.stop_polling();
        info!(skill_id = %self.ctx.skill_id, "skill shut down");
        Ok(())
    }
}

/// Run the stop callback while a watchdog timer races it.
///
/// If the callback takes longer than the watchdog deadline the stop is
/// assumed handled and acknowledged from the timer task; the fast path
/// acknowledges synchronously and cancels the timer. A duplicate
/// acknowledgment on an unlucky race is tolerated by the consumer.
fn handle_stop(ctx: &Arc<SkillContext>, stop: &StopHandler) -> Result<()> {
    let token = CancellationToken::new();
    // The watchdog needs a runtime to run on. Without one the callback's
    // own outcome decides the acknowledgment.
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        let watchdog = token.clone();
        let watchdog_ctx = ctx.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = watchdog.cancelled() => {}
                _ = tokio::time::sleep(STOP_WATCHDOG) => {
                    if let Ok(bus) = watchdog_ctx.bus() {
                        bus.emit(Message::new(
                            "skylark.stop.handled",
                            json!({"skill_id": format!("{}:", watchdog_ctx.skill_id)}),
                        ));
                    }
                }
            }
        });
    }

    let result = stop();
    token.cancel();
    match result {
        Ok(true) => {
            ctx.bus()?.emit(Message::new(
                "skylark.stop.handled",
                json!({"by": format!("skill:{}", ctx.skill_id)}),
            ));
            Ok(())
        }
        Ok(false) => Ok(()),
        Err(e) => {
            error!(skill_id = %ctx.skill_id, error = %e, "stop callback failed");
            Ok(())
        }
    }
}

fn set_context(ctx: &Arc<SkillContext>, context: &str, word: &str, origin: &str) -> Result<()> {
    if context.is_empty() {
        return Err(Error::Validation("context must not be empty".into()));
    }
    ctx.bus()?.emit(Message::new(
        "add_context",
        json!({
            "context": format!("{}{}", to_alnum(&ctx.skill_id), context),
            "word": word,
            "origin": origin,
        }),
    ));
    Ok(())
}

fn remove_context(ctx: &Arc<SkillContext>, context: &str) -> Result<()> {
    if context.is_empty() {
        return Err(Error::Validation("context must not be empty".into()));
    }
    ctx.bus()?.emit(Message::new(
        "remove_context",
        json!({"context": format!("{}{}", to_alnum(&ctx.skill_id), context)}),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::probe;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn noop() -> EventHandler {
        Arc::new(|_| Ok(()))
    }

    #[tokio::test(start_paused = true)]
    async fn bind_registers_declared_intents() {
        let bus = MessageBus::new();
        let registered = probe(&bus, "register_intent");

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let skill = Skill::builder("TimerSkill", "timer.skill")
            .intent(
                IntentSpec::builder("set.timer").require("TimerKeyword").build(),
                Arc::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .build();
        skill.bind(bus.clone()).unwrap();

        assert_eq!(registered.lock().unwrap().len(), 1);
        bus.emit(Message::new("timer.skill:set.timer", json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_before_bind_fail() {
        let skill = Skill::builder("TimerSkill", "timer.skill").build();
        assert!(matches!(
            skill.speak("hi", false),
            Err(Error::NotBound(_))
        ));
        assert!(matches!(skill.make_active(), Err(Error::NotBound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_stop_acknowledges_synchronously() {
        let bus = MessageBus::new();
        let handled = probe(&bus, "skylark.stop.handled");
        let skill = Skill::builder("TimerSkill", "timer.skill")
            .stop_handler(Arc::new(|| Ok(true)))
            .build();
        skill.bind(bus.clone()).unwrap();

        bus.emit(Message::new("skylark.stop", json!({})));
        {
            let handled = handled.lock().unwrap();
            assert_eq!(handled.len(), 1);
            assert_eq!(handled[0].data["by"], json!("skill:timer.skill"));
        }

        // The watchdog was cancelled: no late duplicate.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handled.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_dispatch_works_without_async_runtime() {
        let bus = MessageBus::new();
        let handled = probe(&bus, "skylark.stop.handled");
        let skill = Skill::builder("TimerSkill", "timer.skill")
            .stop_handler(Arc::new(|| Ok(true)))
            .build();
        skill.bind(bus.clone()).unwrap();

        // No runtime is running here: the watchdog is skipped and the
        // callback outcome alone drives the acknowledgment.
        bus.emit(Message::new("skylark.stop", json!({})));
        let handled = handled.lock().unwrap();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].data["by"], json!("skill:timer.skill"));
    }

    #[tokio::test(start_paused = true)]
    async fn unhandled_stop_stays_silent() {
        let bus = MessageBus::new();
        let handled = probe(&bus, "skylark.stop.handled");
        let skill = Skill::builder("TimerSkill", "timer.skill").build();
        skill.bind(bus.clone()).unwrap();

        bus.emit(Message::new("skylark.stop", json!({})));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handled.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn enable_intent_request_ignored_for_foreign_intent() {
        let bus = MessageBus::new();
        let registered = probe(&bus, "register_intent");
        let skill = Skill::builder("TimerSkill", "timer.skill")
            .intent(
                IntentSpec::builder("mine").require("Mine").build(),
                noop(),
            )
            .build();
        skill.bind(bus.clone()).unwrap();
        assert_eq!(registered.lock().unwrap().len(), 1);

        bus.emit(Message::new(
            "skylark.skill.enable_intent",
            json!({"intent_name": "somebody.elses"}),
        ));
        assert_eq!(registered.lock().unwrap().len(), 1);

        bus.emit(Message::new(
            "skylark.skill.enable_intent",
            json!({"intent_name": "mine"}),
        ));
        assert_eq!(registered.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cross_context_broadcast_is_applied_locally() {
        let bus = MessageBus::new();
        let contexts = probe(&bus, "add_context");
        let skill = Skill::builder("TimerSkill", "timer.skill").build();
        skill.bind(bus.clone()).unwrap();

        bus.emit(Message::new(
            "skylark.skill.set_cross_context",
            json!({"context": "Location", "word": "oslo", "origin": "other.skill"}),
        ));
        let contexts = contexts.lock().unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].data["context"], json!("timer_skillLocation"));
        assert_eq!(contexts[0].data["word"], json!("oslo"));
    }

    #[tokio::test(start_paused = true)]
    async fn resting_screen_announces_at_bind_and_on_collect() {
        let bus = MessageBus::new();
        let announced = probe(&bus, "skylark.register_resting");
        let skill = Skill::builder("ClockSkill", "clock.skill")
            .resting_screen("Clock Face", noop())
            .build();
        skill.bind(bus.clone()).unwrap();
        assert_eq!(announced.lock().unwrap().len(), 1);

        bus.emit(Message::new("skylark.collect_resting", json!({})));
        let announced = announced.lock().unwrap();
        assert_eq!(announced.len(), 2);
        assert_eq!(announced[1].data["name"], json!("Clock Face"));
        assert_eq!(announced[1].data["id"], json!("clock.skill"));
    }

    #[tokio::test(start_paused = true)]
    async fn settings_update_trigger_polls_settings() {
        let settings = Arc::new(crate::testutil::CountingSettings::default());
        let bus = MessageBus::new();
        let skill = Skill::builder("TimerSkill", "timer.skill")
            .settings(settings.clone())
            .build();
        skill.bind(bus.clone()).unwrap();
        bus.emit(Message::new("skylark.skills.settings.update", json!({})));
        assert_eq!(settings.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_detaches_and_cancels_everything() {
        let bus = MessageBus::new();
        let detached = probe(&bus, "detach_skill");
        let removals = probe(&bus, "skylark.scheduler.remove_event");
        let skill = Skill::builder("TimerSkill", "timer.skill").build();
        skill.bind(bus.clone()).unwrap();

        skill
            .scheduler()
            .schedule_repeating_event(noop(), None, Duration::from_secs(5), None, Some("beat"))
            .unwrap();
        skill.shutdown().unwrap();

        assert_eq!(removals.lock().unwrap().len(), 1);
        assert_eq!(detached.lock().unwrap().len(), 1);
        assert!(skill.scheduler().active_repeating().is_empty());
        assert_eq!(bus.listener_count("skylark.stop"), 0);
        assert_eq!(bus.listener_count("timer.skill:beat"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cross_skill_context_round_trip() {
        let bus = MessageBus::new();
        let contexts = probe(&bus, "add_context");
        let skill = Skill::builder("TimerSkill", "timer.skill").build();
        skill.bind(bus.clone()).unwrap();

        // The skill's own broadcast comes back to it via the bus.
        skill.set_cross_skill_context("Place", "home").unwrap();
        assert_eq!(contexts.lock().unwrap().len(), 1);

        assert!(matches!(
            skill.set_context("", "word"),
            Err(Error::Validation(_))
        ));
    }
}
