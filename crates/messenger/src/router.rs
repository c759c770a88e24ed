use std::sync::Arc;

use potholer_core::{
    evaluate_concepts, ConversationAction, ConversationEngine, ConversationEvent,
    ConversationStage, ImageClassifier, PendingReportStore, TransitionOutcome, UserId,
};
use tracing::{debug, info, warn};

use crate::delivery::MessengerApi;
use crate::events::{Attachment, AttachmentMessageEvent, EventContext, TextMessageEvent};
use crate::replies::{
    attachment_receipt_message, not_a_pothole_message, usage_message, OutboundReply,
    CLASSIFICATION_APOLOGY_TEXT, DISPATCH_TEXT, LOCATION_REQUEST_TEXT,
};

/// Decides the single reply for each message event and keeps the pending
/// report store in step with the conversation engine.
///
/// Store operations are awaited one at a time and never span the classifier
/// or profile round trips.
pub struct ConversationRouter {
    store: Arc<dyn PendingReportStore>,
    classifier: Arc<dyn ImageClassifier>,
    messenger: Arc<dyn MessengerApi>,
    engine: ConversationEngine,
}

impl ConversationRouter {
    pub fn new(
        store: Arc<dyn PendingReportStore>,
        classifier: Arc<dyn ImageClassifier>,
        messenger: Arc<dyn MessengerApi>,
    ) -> Self {
        Self { store, classifier, messenger, engine: ConversationEngine::new() }
    }

    pub async fn handle_text(&self, event: &TextMessageEvent, ctx: &EventContext) -> OutboundReply {
        let sender = &event.sender_id;
        let stage = self.store.stage(sender).await;
        let outcome = self.engine.apply(stage, &ConversationEvent::TextReceived);
        self.reply_for(sender, &outcome, "", ctx).await
    }

    pub async fn handle_attachment(
        &self,
        event: &AttachmentMessageEvent,
        ctx: &EventContext,
    ) -> OutboundReply {
        let sender = &event.sender_id;
        if !event.additional.is_empty() {
            debug!(
                correlation_id = %ctx.correlation_id,
                user_id = %sender,
                attachment_count = event.attachment_count(),
                "only the first attachment is considered"
            );
        }

        match &event.attachment {
            Attachment::Image { url } => self.handle_photo(sender, url, ctx).await,
            Attachment::Location { .. } => {
                // Clearing doubles as the pending check so two concurrent
                // locations cannot both dispatch crews.
                let stage = stage_from_cleared(self.store.clear_pending(sender).await);
                let outcome = self.engine.apply(stage, &ConversationEvent::LocationReceived);
                self.reply_for(sender, &outcome, event.attachment.kind(), ctx).await
            }
            Attachment::Other { kind, .. } => {
                let stage = self.store.stage(sender).await;
                let outcome =
                    self.engine.apply(stage, &ConversationEvent::OtherAttachmentReceived);
                self.reply_for(sender, &outcome, kind, ctx).await
            }
        }
    }

    async fn handle_photo(&self, sender: &UserId, url: &str, ctx: &EventContext) -> OutboundReply {
        let previous = stage_from_cleared(self.store.clear_pending(sender).await);
        let restarted = self.engine.photo_received(previous);
        debug!(
            event_name = "conversation.photo_received",
            correlation_id = %ctx.correlation_id,
            user_id = %sender,
            from = ?previous,
            to = ?restarted,
            "classifying photo"
        );

        let verdict = match self.classifier.classify(url).await {
            Ok(concepts) => {
                for concept in &concepts {
                    debug!(
                        correlation_id = %ctx.correlation_id,
                        label = %concept.label,
                        confidence = concept.confidence,
                        "classifier concept"
                    );
                }
                evaluate_concepts(&concepts)
            }
            Err(error) => Err(error),
        };

        let event = match verdict {
            Ok(result) if result.is_pothole => {
                info!(
                    event_name = "conversation.photo_classified",
                    correlation_id = %ctx.correlation_id,
                    user_id = %sender,
                    confidence = result.confidence,
                    "pothole confirmed"
                );
                ConversationEvent::PotholeConfirmed
            }
            Ok(result) => {
                info!(
                    event_name = "conversation.photo_classified",
                    correlation_id = %ctx.correlation_id,
                    user_id = %sender,
                    confidence = result.confidence,
                    "photo is not a pothole"
                );
                ConversationEvent::NotAPothole
            }
            Err(error) => {
                warn!(
                    event_name = "conversation.classification_failed",
                    correlation_id = %ctx.correlation_id,
                    user_id = %sender,
                    error = %error,
                    "could not classify photo"
                );
                ConversationEvent::ClassificationFailed
            }
        };

        let stage = self.store.stage(sender).await;
        let outcome = self.engine.apply(stage, &event);
        if outcome.to == ConversationStage::AwaitingLocation {
            self.store.mark_pending(sender).await;
        }
        self.reply_for(sender, &outcome, "image", ctx).await
    }

    async fn reply_for(
        &self,
        sender: &UserId,
        outcome: &TransitionOutcome,
        attachment_kind: &str,
        ctx: &EventContext,
    ) -> OutboundReply {
        log_transition(sender, outcome, ctx);

        let text = match outcome.action {
            ConversationAction::SendUsage => {
                let name = self.first_name(sender, ctx).await;
                usage_message(name.as_deref())
            }
            ConversationAction::ReportNotAPothole => {
                let name = self.first_name(sender, ctx).await;
                not_a_pothole_message(name.as_deref())
            }
            ConversationAction::RequestLocation => LOCATION_REQUEST_TEXT.to_owned(),
            ConversationAction::DispatchCrews => DISPATCH_TEXT.to_owned(),
            ConversationAction::ApologizeForClassification => {
                CLASSIFICATION_APOLOGY_TEXT.to_owned()
            }
            ConversationAction::AcknowledgeAttachment => {
                attachment_receipt_message(attachment_kind)
            }
        };

        OutboundReply::new(sender, text)
    }

    async fn first_name(&self, sender: &UserId, ctx: &EventContext) -> Option<String> {
        match self.messenger.get_profile(sender).await {
            Ok(profile) => {
                let name = profile.first_name.trim();
                (!name.is_empty()).then(|| name.to_owned())
            }
            Err(error) => {
                warn!(
                    event_name = "egress.messenger.profile_failed",
                    correlation_id = %ctx.correlation_id,
                    user_id = %sender,
                    error = %error,
                    "profile lookup failed; replying without a name"
                );
                None
            }
        }
    }
}

fn stage_from_cleared(was_pending: bool) -> ConversationStage {
    if was_pending {
        ConversationStage::AwaitingLocation
    } else {
        ConversationStage::Idle
    }
}

fn log_transition(sender: &UserId, outcome: &TransitionOutcome, ctx: &EventContext) {
    info!(
        event_name = "conversation.transition_applied",
        correlation_id = %ctx.correlation_id,
        user_id = %sender,
        from = ?outcome.from,
        to = ?outcome.to,
        event = ?outcome.event,
        action = ?outcome.action,
        "conversation transition applied"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use potholer_core::{
        ClassificationError, Concept, ImageClassifier, InMemoryPendingStore, PendingReportStore,
        UserId,
    };

    use super::ConversationRouter;
    use crate::events::{
        Attachment, AttachmentMessageEvent, Coordinates, EventContext, TextMessageEvent,
    };
    use crate::replies::{
        CLASSIFICATION_APOLOGY_TEXT, DISPATCH_TEXT, LOCATION_REQUEST_TEXT, NOT_A_POTHOLE_TEXT,
    };
    use crate::testing::{ScriptedClassifier, ScriptedMessenger};

    struct Harness {
        store: Arc<InMemoryPendingStore>,
        classifier: Arc<ScriptedClassifier>,
        messenger: Arc<ScriptedMessenger>,
        router: ConversationRouter,
    }

    fn harness(classifier: ScriptedClassifier, messenger: ScriptedMessenger) -> Harness {
        let store = Arc::new(InMemoryPendingStore::new());
        let classifier = Arc::new(classifier);
        let messenger = Arc::new(messenger);
        let router = ConversationRouter::new(store.clone(), classifier.clone(), messenger.clone());
        Harness { store, classifier, messenger, router }
    }

    fn text(sender: &str) -> TextMessageEvent {
        TextMessageEvent { sender_id: UserId::new(sender), text: "hello".to_owned() }
    }

    fn with_attachment(sender: &str, attachment: Attachment) -> AttachmentMessageEvent {
        AttachmentMessageEvent {
            sender_id: UserId::new(sender),
            text: None,
            attachment,
            additional: Vec::new(),
        }
    }

    fn image(sender: &str) -> AttachmentMessageEvent {
        with_attachment(
            sender,
            Attachment::Image { url: "https://cdn.example/photo.jpg".to_owned() },
        )
    }

    fn location(sender: &str) -> AttachmentMessageEvent {
        with_attachment(
            sender,
            Attachment::Location { coordinates: Some(Coordinates { lat: 47.6, long: -122.3 }) },
        )
    }

    #[tokio::test]
    async fn text_without_attachment_gets_unpersonalised_usage_when_profile_is_unavailable() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());

        let reply = h.router.handle_text(&text("U1"), &EventContext::default()).await;

        assert_eq!(reply.recipient, UserId::new("U1"));
        assert_eq!(reply.text, "Hi! Send me pictures of pot holes that you find!");
        assert!(!h.store.is_pending(&UserId::new("U1")).await);
    }

    #[tokio::test]
    async fn usage_is_personalised_with_the_profile_name() {
        let h =
            harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::with_first_name("Ada"));

        let reply = h.router.handle_text(&text("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, "Hi Ada! Send me pictures of pot holes that you find!");
    }

    #[tokio::test]
    async fn confident_pothole_photo_asks_for_location_and_marks_pending() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());

        let reply = h.router.handle_attachment(&image("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, LOCATION_REQUEST_TEXT);
        assert!(h.store.is_pending(&UserId::new("U1")).await);
        assert_eq!(h.classifier.requested().await, vec!["https://cdn.example/photo.jpg"]);
        assert_eq!(h.messenger.profile_lookups(), 0);
    }

    #[tokio::test]
    async fn location_after_confirmed_photo_dispatches_crews_and_clears_pending() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());
        let ctx = EventContext::default();

        h.router.handle_attachment(&image("U1"), &ctx).await;
        let reply = h.router.handle_attachment(&location("U1"), &ctx).await;

        assert_eq!(reply.text, DISPATCH_TEXT);
        assert!(!h.store.is_pending(&UserId::new("U1")).await);
    }

    #[tokio::test]
    async fn duplicate_location_delivery_only_dispatches_once() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());
        let ctx = EventContext::default();

        h.router.handle_attachment(&image("U1"), &ctx).await;
        let first = h.router.handle_attachment(&location("U1"), &ctx).await;
        let second = h.router.handle_attachment(&location("U1"), &ctx).await;

        assert_eq!(first.text, DISPATCH_TEXT);
        assert_eq!(second.text, "Thanks for sending me a location");
    }

    #[tokio::test]
    async fn photo_without_pothole_label_is_rejected_with_name() {
        let h = harness(
            ScriptedClassifier::concepts(vec![Concept::new("car", 0.95)]),
            ScriptedMessenger::with_first_name("Ada"),
        );

        let reply = h.router.handle_attachment(&image("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, format!("Ada - {NOT_A_POTHOLE_TEXT}"));
        assert!(!h.store.is_pending(&UserId::new("U1")).await);
    }

    #[tokio::test]
    async fn low_confidence_pothole_is_not_a_pothole() {
        let h = harness(ScriptedClassifier::pothole(0.8), ScriptedMessenger::default());

        let reply = h.router.handle_attachment(&image("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, NOT_A_POTHOLE_TEXT);
        assert!(!h.store.is_pending(&UserId::new("U1")).await);
    }

    #[tokio::test]
    async fn new_photo_clears_pending_even_when_classification_fails() {
        let h = harness(
            ScriptedClassifier::failing(ClassificationError::Request("timed out".to_owned())),
            ScriptedMessenger::default(),
        );
        let user = UserId::new("U1");
        h.store.mark_pending(&user).await;

        let reply = h.router.handle_attachment(&image("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, CLASSIFICATION_APOLOGY_TEXT);
        assert!(!h.store.is_pending(&user).await);
    }

    #[tokio::test]
    async fn new_non_pothole_photo_discards_previous_report() {
        let h = harness(
            ScriptedClassifier::concepts(vec![Concept::new("tree", 0.99)]),
            ScriptedMessenger::default(),
        );
        let user = UserId::new("U1");
        h.store.mark_pending(&user).await;

        h.router.handle_attachment(&image("U1"), &EventContext::default()).await;

        assert!(!h.store.is_pending(&user).await);
    }

    #[tokio::test]
    async fn empty_concept_list_is_treated_as_a_failure() {
        let h = harness(ScriptedClassifier::concepts(Vec::new()), ScriptedMessenger::default());

        let reply = h.router.handle_attachment(&image("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, CLASSIFICATION_APOLOGY_TEXT);
    }

    #[tokio::test]
    async fn video_while_idle_is_acknowledged_by_type() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());
        let video = with_attachment(
            "U1",
            Attachment::Other {
                kind: "video".to_owned(),
                url: Some("https://cdn.example/clip.mp4".to_owned()),
            },
        );

        let reply = h.router.handle_attachment(&video, &EventContext::default()).await;

        assert_eq!(reply.text, "Thanks for sending me a video");
        assert!(!h.store.is_pending(&UserId::new("U1")).await);
        assert!(h.classifier.requested().await.is_empty());
    }

    #[tokio::test]
    async fn other_attachment_while_pending_keeps_the_report() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());
        let user = UserId::new("U1");
        h.store.mark_pending(&user).await;
        let audio = with_attachment("U1", Attachment::Other { kind: "audio".to_owned(), url: None });

        let reply = h.router.handle_attachment(&audio, &EventContext::default()).await;

        assert_eq!(reply.text, "Thanks for sending me a audio");
        assert!(h.store.is_pending(&user).await);
    }

    #[tokio::test]
    async fn location_while_idle_is_acknowledged_generically() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());

        let reply = h.router.handle_attachment(&location("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, "Thanks for sending me a location");
    }

    #[tokio::test]
    async fn only_the_first_attachment_drives_the_flow() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());
        let mut event = location("U1");
        event.additional.push(Attachment::Image { url: "https://cdn.example/late.jpg".to_owned() });

        let reply = h.router.handle_attachment(&event, &EventContext::default()).await;

        assert_eq!(reply.text, "Thanks for sending me a location");
        assert!(h.classifier.requested().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_locations_from_one_user_dispatch_exactly_once() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());
        let router = Arc::new(h.router);
        router.handle_attachment(&image("U1"), &EventContext::default()).await;

        let mut tasks = Vec::new();
        for index in 0..16 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = EventContext { correlation_id: format!("loc-{index}") };
                router.handle_attachment(&location("U1"), &ctx).await
            }));
        }

        let mut dispatched = 0;
        for task in tasks {
            let reply = task.await.expect("router task should not panic");
            if reply.text == DISPATCH_TEXT {
                dispatched += 1;
            } else {
                assert_eq!(reply.text, "Thanks for sending me a location");
            }
        }

        assert_eq!(dispatched, 1);
        assert!(!h.store.is_pending(&UserId::new("U1")).await);
    }

    /// Writes to the store while a classification is in flight; this would
    /// hang if the router kept a store lock across the classifier call.
    struct StoreTouchingClassifier {
        store: Arc<InMemoryPendingStore>,
    }

    #[async_trait]
    impl ImageClassifier for StoreTouchingClassifier {
        async fn classify(&self, _image_url: &str) -> Result<Vec<Concept>, ClassificationError> {
            let bystander = UserId::new("U-bystander");
            tokio::time::timeout(Duration::from_secs(1), async {
                self.store.mark_pending(&bystander).await;
                self.store.clear_pending(&bystander).await;
            })
            .await
            .map_err(|_| ClassificationError::Request("store was locked".to_owned()))?;
            Ok(vec![Concept::new("pothole", 0.99)])
        }
    }

    #[tokio::test]
    async fn store_is_not_locked_while_classifying() {
        let store = Arc::new(InMemoryPendingStore::new());
        let router = ConversationRouter::new(
            store.clone(),
            Arc::new(StoreTouchingClassifier { store: store.clone() }),
            Arc::new(ScriptedMessenger::default()),
        );

        let reply = router.handle_attachment(&image("U1"), &EventContext::default()).await;

        assert_eq!(reply.text, LOCATION_REQUEST_TEXT);
        assert!(store.is_pending(&UserId::new("U1")).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_users_keep_independent_state() {
        let h = harness(ScriptedClassifier::pothole(0.92), ScriptedMessenger::default());
        let router = Arc::new(h.router);
        let mut tasks = Vec::new();

        for index in 0..32 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                let sender = format!("U-{index}");
                let ctx = EventContext { correlation_id: format!("mid-{index}") };
                router.handle_attachment(&image(&sender), &ctx).await;
                if index % 2 == 0 {
                    router.handle_attachment(&location(&sender), &ctx).await;
                }
            }));
        }

        for task in tasks {
            task.await.expect("router task should not panic");
        }

        assert_eq!(h.store.pending_count().await, 16);
        for index in 0..32 {
            let pending = h.store.is_pending(&UserId::new(format!("U-{index}"))).await;
            assert_eq!(pending, index % 2 == 1);
        }
    }
}
