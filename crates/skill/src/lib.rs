//! Skill plugin base for the skylark voice assistant.
//!
//! A skill declares intents, vocabulary and lifecycle callbacks, binds to
//! the shared message bus, and from then on reacts to dispatched intents,
//! scheduled events and conversation turns. The heavy lifting (speech
//! recognition, intent parsing, audio output, the scheduler daemon) lives
//! in other services; this crate is the client-side protocol for talking
//! to them.

pub mod context;
pub mod conversation;
pub mod events;
pub mod intent;
pub mod munge;
pub mod scheduler;
pub mod skill;
pub mod vocab;

#[cfg(test)]
mod testutil;

pub use context::SkillContext;
pub use conversation::{
    ConversationController, ConverseGate, ConverseHook, OnFail, Validator, YesNo,
};
pub use events::{EventHandler, EventRegistry};
pub use intent::{IntentRegistry, IntentSpec, IntentSpecBuilder};
pub use scheduler::{SchedulerClient, When};
pub use skill::{Skill, SkillBuilder, StopHandler};
pub use vocab::VocabularyMatcher;
