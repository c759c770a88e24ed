use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use potholer_core::UserId;
use serde::Deserialize;

use crate::{replies::OutboundReply, router::ConversationRouter};

#[derive(Clone, Debug, PartialEq)]
pub struct WebhookEnvelope {
    pub delivery_id: String,
    pub event: InboundEvent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    TextMessage(TextMessageEvent),
    AttachmentMessage(AttachmentMessageEvent),
    DeliveryReceipt(DeliveryReceiptEvent),
    Postback(PostbackEvent),
    AuthenticationOptin(OptinEvent),
    Unsupported { event_type: String },
}

impl InboundEvent {
    pub fn event_type(&self) -> InboundEventType {
        match self {
            Self::TextMessage(_) => InboundEventType::TextMessage,
            Self::AttachmentMessage(_) => InboundEventType::AttachmentMessage,
            Self::DeliveryReceipt(_) => InboundEventType::DeliveryReceipt,
            Self::Postback(_) => InboundEventType::Postback,
            Self::AuthenticationOptin(_) => InboundEventType::AuthenticationOptin,
            Self::Unsupported { .. } => InboundEventType::Unsupported,
        }
    }

    pub fn sender_id(&self) -> Option<&UserId> {
        match self {
            Self::TextMessage(event) => Some(&event.sender_id),
            Self::AttachmentMessage(event) => Some(&event.sender_id),
            Self::DeliveryReceipt(event) => Some(&event.sender_id),
            Self::Postback(event) => Some(&event.sender_id),
            Self::AuthenticationOptin(event) => Some(&event.sender_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InboundEventType {
    TextMessage,
    AttachmentMessage,
    DeliveryReceipt,
    Postback,
    AuthenticationOptin,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessageEvent {
    pub sender_id: UserId,
    pub text: String,
}

/// A message with at least one attachment. Only the first one drives the
/// conversation; the rest are kept for logging.
#[derive(Clone, Debug, PartialEq)]
pub struct AttachmentMessageEvent {
    pub sender_id: UserId,
    pub text: Option<String>,
    pub attachment: Attachment,
    pub additional: Vec<Attachment>,
}

impl AttachmentMessageEvent {
    pub fn attachment_count(&self) -> usize {
        1 + self.additional.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Attachment {
    Image { url: String },
    Location { coordinates: Option<Coordinates> },
    Other { kind: String, url: Option<String> },
}

impl Attachment {
    pub fn kind(&self) -> &str {
        match self {
            Self::Image { .. } => "image",
            Self::Location { .. } => "location",
            Self::Other { kind, .. } => kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub long: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReceiptEvent {
    pub sender_id: UserId,
    pub message_ids: Vec<String>,
    pub watermark: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostbackEvent {
    pub sender_id: UserId,
    pub payload: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptinEvent {
    pub sender_id: UserId,
    pub reference: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundReply),
    Ignored,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> InboundEventType;
    async fn handle(&self, envelope: &WebhookEnvelope, ctx: &EventContext) -> HandlerResult;
}

/// Routes envelopes to the handler registered for their event type.
///
/// Delivery receipts, postbacks, authentication optins and unsupported events
/// have no handler in the default setup and come back as
/// [`HandlerResult::Ignored`].
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<InboundEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(&self, envelope: &WebhookEnvelope, ctx: &EventContext) -> HandlerResult {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return HandlerResult::Ignored;
        };

        handler.handle(envelope, ctx).await
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn default_dispatcher(router: Arc<ConversationRouter>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(TextMessageHandler::new(router.clone()));
    dispatcher.register(AttachmentMessageHandler::new(router));
    dispatcher
}

pub struct TextMessageHandler {
    router: Arc<ConversationRouter>,
}

impl TextMessageHandler {
    pub fn new(router: Arc<ConversationRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for TextMessageHandler {
    fn event_type(&self) -> InboundEventType {
        InboundEventType::TextMessage
    }

    async fn handle(&self, envelope: &WebhookEnvelope, ctx: &EventContext) -> HandlerResult {
        let InboundEvent::TextMessage(event) = &envelope.event else {
            return HandlerResult::Ignored;
        };

        HandlerResult::Responded(self.router.handle_text(event, ctx).await)
    }
}

pub struct AttachmentMessageHandler {
    router: Arc<ConversationRouter>,
}

impl AttachmentMessageHandler {
    pub fn new(router: Arc<ConversationRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for AttachmentMessageHandler {
    fn event_type(&self) -> InboundEventType {
        InboundEventType::AttachmentMessage
    }

    async fn handle(&self, envelope: &WebhookEnvelope, ctx: &EventContext) -> HandlerResult {
        let InboundEvent::AttachmentMessage(event) = &envelope.event else {
            return HandlerResult::Ignored;
        };

        HandlerResult::Responded(self.router.handle_attachment(event, ctx).await)
    }
}
