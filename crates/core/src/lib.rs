pub mod classification;
pub mod config;
pub mod conversation;

pub use classification::{
    evaluate_concepts, ClassificationError, ClassificationResult, Concept, ImageClassifier,
    POTHOLE_CONFIDENCE_THRESHOLD, POTHOLE_LABEL,
};
pub use conversation::{
    ConversationAction, ConversationEngine, ConversationEvent, ConversationStage,
    InMemoryPendingStore, PendingReportStore, TransitionOutcome, UserId,
};
