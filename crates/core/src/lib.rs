pub mod bus;
pub mod collaborators;
pub mod error;
pub mod message;

pub use bus::{BusHandler, ListenerId, MessageBus};
pub use collaborators::{
    DialogRenderer, MetricsSink, NullLocator, NullMetrics, NullRenderer, NullSettings,
    NullSpeechGate, ResourceLocator, SettingsStore, SpeechGate,
};
pub use error::{Error, Result};
pub use message::Message;
