pub mod engine;
pub mod states;
pub mod store;

pub use engine::ConversationEngine;
pub use states::{
    ConversationAction, ConversationEvent, ConversationStage, TransitionOutcome, UserId,
};
pub use store::{InMemoryPendingStore, PendingReportStore};
