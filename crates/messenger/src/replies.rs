use potholer_core::UserId;

pub const USAGE_TEXT: &str = "Send me pictures of pot holes that you find!";
pub const NOT_A_POTHOLE_TEXT: &str = "I'm educated. That is no pothole!";
pub const LOCATION_REQUEST_TEXT: &str =
    "Thanks for letting us know about the pot hole - can you send your location?";
pub const DISPATCH_TEXT: &str = "We'll send our crews out there! Stay tuned!";
pub const CLASSIFICATION_APOLOGY_TEXT: &str =
    "Sorry. I lost my glasses and I'm having trouble looking at the picture.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub recipient: UserId,
    pub text: String,
}

impl OutboundReply {
    pub fn new(recipient: &UserId, text: impl Into<String>) -> Self {
        Self { recipient: recipient.clone(), text: text.into() }
    }
}

pub fn usage_message(first_name: Option<&str>) -> String {
    match first_name {
        Some(name) => format!("Hi {name}! {USAGE_TEXT}"),
        None => format!("Hi! {USAGE_TEXT}"),
    }
}

pub fn not_a_pothole_message(first_name: Option<&str>) -> String {
    match first_name {
        Some(name) => format!("{name} - {NOT_A_POTHOLE_TEXT}"),
        None => NOT_A_POTHOLE_TEXT.to_owned(),
    }
}

pub fn attachment_receipt_message(kind: &str) -> String {
    format!("Thanks for sending me a {kind}")
}
