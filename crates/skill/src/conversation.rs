//! Blocking prompt/response protocol.
//!
//! A prompt is spoken, a temporary capture hook replaces the skill's
//! conversation handler, and the call blocks (bounded) until the hook
//! captures an utterance. Validation, cancel detection and the retry
//! budget are applied before the literal response text is returned.

use crate::context::SkillContext;
use crate::vocab::VocabularyMatcher;
use serde_json::Value;
use skylark_core::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Listener wait plus transcription margin.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(15);

/// Hook invoked with utterance transcription candidates; returns true
/// when the utterance was consumed.
pub type ConverseHook = Arc<dyn Fn(&[String], &str) -> bool + Send + Sync>;

/// The skill's conversation entry point.
///
/// Holds the currently active hook: normally the skill's own converse
/// behaviour, temporarily replaced by a capture hook while a prompt is
/// awaiting its reply.
pub struct ConverseGate {
    hook: Mutex<ConverseHook>,
}

impl ConverseGate {
    pub fn new(default: Option<ConverseHook>) -> Self {
        Self {
            hook: Mutex::new(default.unwrap_or_else(|| Arc::new(|_, _| false))),
        }
    }

    /// Feed utterances to the active hook.
    pub fn converse(&self, utterances: &[String], lang: &str) -> bool {
        let hook = self.hook.lock().unwrap().clone();
        hook(utterances, lang)
    }

    fn swap(&self, hook: ConverseHook) -> ConverseHook {
        std::mem::replace(&mut *self.hook.lock().unwrap(), hook)
    }
}

/// Restores the previous hook on every exit path.
struct HookGuard {
    gate: Arc<ConverseGate>,
    prev: Option<ConverseHook>,
}

impl HookGuard {
    fn install(gate: Arc<ConverseGate>, hook: ConverseHook) -> Self {
        let prev = gate.swap(hook);
        Self {
            gate,
            prev: Some(prev),
        }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            self.gate.swap(prev);
        }
    }
}

pub type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Re-prompt source for rejected input.
pub enum OnFail {
    /// Dialog key rendered with the rejected utterance added to the data.
    Dialog(String),
    /// Callback returning the literal line to speak.
    With(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

/// Outcome of a yes/no prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YesNo {
    Yes,
    No,
    /// The reply matched neither vocabulary; the literal text is returned.
    Other(String),
}

pub struct ConversationController {
    ctx: Arc<SkillContext>,
    vocab: Arc<VocabularyMatcher>,
    gate: Arc<ConverseGate>,
    capture_timeout: Duration,
}

impl ConversationController {
    pub fn new(
        ctx: Arc<SkillContext>,
        vocab: Arc<VocabularyMatcher>,
        gate: Arc<ConverseGate>,
    ) -> Self {
        Self {
            ctx,
            vocab,
            gate,
            capture_timeout: CAPTURE_TIMEOUT,
        }
    }

    /// Prompt the user and wait for a validated response.
    ///
    /// Returns the literal response text, or None on timeout or cancel.
    /// A retry budget of -1 is unbounded; budget N stops after N
    /// consecutive failures of either kind. Fails fast when the prompt
    /// template cannot be rendered.
    pub async fn get_response(
        &self,
        dialog: &str,
        data: Value,
        validator: Option<Validator>,
        on_fail: Option<OnFail>,
        num_retries: i32,
    ) -> Result<Option<String>> {
        let announcement = self
            .ctx
            .dialog
            .render(dialog, &data)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::Dialog(format!("cannot render prompt '{dialog}'")))?;

        let fail_line = |utterance: &str| -> String {
            match &on_fail {
                Some(OnFail::With(f)) => f(utterance),
                Some(OnFail::Dialog(key)) => {
                    let mut fail_data = data.clone();
                    if let Value::Object(ref mut map) = fail_data {
                        map.insert("utterance".to_string(), Value::from(utterance));
                    }
                    self.ctx
                        .dialog
                        .render(key, &fail_data)
                        .unwrap_or_else(|| announcement.clone())
                }
                None => announcement.clone(),
            }
        };

        self.ctx.speak(&announcement, true, None)?;
        self.ctx.speech.wait_while_speaking().await;

        let mut num_fails = 0;
        loop {
            let response = self.capture().await?;

            match &response {
                None => {
                    let none_budget = if num_retries < 0 { 1 } else { num_retries };
                    if num_fails >= none_budget {
                        debug!("no response within budget");
                        return Ok(None);
                    }
                }
                Some(reply) => {
                    let valid = match &validator {
                        Some(v) => v(reply),
                        None => !self.is_cancel(reply)?,
                    };
                    if valid {
                        return Ok(Some(reply.clone()));
                    }
                    if self.is_cancel(reply)? {
                        debug!("prompt canceled by user");
                        return Ok(None);
                    }
                }
            }

            num_fails += 1;
            if 0 < num_retries && num_retries < num_fails {
                return Ok(None);
            }

            let line = fail_line(response.as_deref().unwrap_or(""));
            self.ctx.speak(&line, true, None)?;
            self.ctx.speech.wait_while_speaking().await;
        }
    }

    /// Prompt for a yes/no answer, tolerating common variants via the
    /// "yes"/"no" vocabularies.
    pub async fn ask_yesno(&self, prompt: &str, data: Value) -> Result<Option<YesNo>> {
        let response = self.get_response(prompt, data, None, None, -1).await?;
        match response {
            None => Ok(None),
            Some(reply) => {
                if self.vocab.matches(&reply, "yes", None)? {
                    Ok(Some(YesNo::Yes))
                } else if self.vocab.matches(&reply, "no", None)? {
                    Ok(Some(YesNo::No))
                } else {
                    Ok(Some(YesNo::Other(reply)))
                }
            }
        }
    }

    /// Wait for one captured utterance.
    ///
    /// Installs a single-slot rendezvous: the dispatch side sends the
    /// captured utterance at most once; this side waits with a timeout.
    /// The previous conversation hook is restored on every exit path.
    async fn capture(&self) -> Result<Option<String>> {
        self.ctx.make_active()?;

        let (tx, rx) = oneshot::channel::<Option<String>>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let hook: ConverseHook = Arc::new(move |utterances, _lang| {
            if let Some(tx) = slot.lock().unwrap().take() {
                let _ = tx.send(utterances.first().cloned());
            }
            true
        });

        let _guard = HookGuard::install(self.gate.clone(), hook);
        match tokio::time::timeout(self.capture_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => Ok(None),
        }
    }

    fn is_cancel(&self, utterance: &str) -> Result<bool> {
        self.vocab.matches(utterance, "cancel", None)
    }
}
