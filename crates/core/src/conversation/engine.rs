use crate::conversation::states::{
    ConversationAction, ConversationEvent, ConversationStage, TransitionOutcome,
};

/// Per-user pothole report flow.
///
/// Total over `(stage, event)`: every pair yields exactly one action. Events
/// that do not concern the pending report (text, unrelated attachments,
/// verdicts that do not confirm a pothole) leave the stage where it is.
#[derive(Clone, Debug, Default)]
pub struct ConversationEngine;

impl ConversationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_stage(&self) -> ConversationStage {
        ConversationStage::Idle
    }

    /// A new photo always restarts the flow, whatever was pending.
    pub fn photo_received(&self, _current: ConversationStage) -> ConversationStage {
        ConversationStage::Idle
    }

    pub fn apply(&self, current: ConversationStage, event: &ConversationEvent) -> TransitionOutcome {
        use ConversationAction::{
            AcknowledgeAttachment, ApologizeForClassification, DispatchCrews, ReportNotAPothole,
            RequestLocation, SendUsage,
        };
        use ConversationEvent::{
            ClassificationFailed, LocationReceived, NotAPothole, OtherAttachmentReceived,
            PotholeConfirmed, TextReceived,
        };
        use ConversationStage::{AwaitingLocation, Idle};

        let (to, action) = match (current, event) {
            (stage, TextReceived) => (stage, SendUsage),
            (_, PotholeConfirmed) => (AwaitingLocation, RequestLocation),
            (stage, NotAPothole) => (stage, ReportNotAPothole),
            (stage, ClassificationFailed) => (stage, ApologizeForClassification),
            (AwaitingLocation, LocationReceived) => (Idle, DispatchCrews),
            (Idle, LocationReceived) => (Idle, AcknowledgeAttachment),
            (stage, OtherAttachmentReceived) => (stage, AcknowledgeAttachment),
        };

        TransitionOutcome { from: current, to, event: event.clone(), action }
    }
}
