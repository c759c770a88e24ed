use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationStage {
    #[default]
    Idle,
    AwaitingLocation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationEvent {
    TextReceived,
    PotholeConfirmed,
    NotAPothole,
    ClassificationFailed,
    LocationReceived,
    OtherAttachmentReceived,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// The reply owed for an event. Classification is not an action: a photo
/// restarts the flow through [`ConversationEngine::photo_received`] and its
/// verdict comes back in as an event.
///
/// [`ConversationEngine::photo_received`]: crate::conversation::ConversationEngine::photo_received
pub enum ConversationAction {
    SendUsage,
    RequestLocation,
    ReportNotAPothole,
    ApologizeForClassification,
    DispatchCrews,
    AcknowledgeAttachment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationStage,
    pub to: ConversationStage,
    pub event: ConversationEvent,
    pub action: ConversationAction,
}

impl TransitionOutcome {
    pub fn changed_stage(&self) -> bool {
        self.from != self.to
    }
}
