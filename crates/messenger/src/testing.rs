//! Scripted collaborators shared by the crate's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use potholer_core::{ClassificationError, Concept, ImageClassifier, UserId};
use tokio::sync::Mutex;

use crate::delivery::{MessengerApi, MessengerError, UserProfile};

pub(crate) struct ScriptedClassifier {
    response: Result<Vec<Concept>, ClassificationError>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub(crate) fn concepts(concepts: Vec<Concept>) -> Self {
        Self { response: Ok(concepts), requested: Mutex::new(Vec::new()) }
    }

    pub(crate) fn pothole(confidence: f32) -> Self {
        Self::concepts(vec![Concept::new("pothole", confidence)])
    }

    pub(crate) fn failing(error: ClassificationError) -> Self {
        Self { response: Err(error), requested: Mutex::new(Vec::new()) }
    }

    pub(crate) async fn requested(&self) -> Vec<String> {
        self.requested.lock().await.clone()
    }
}

#[async_trait]
impl ImageClassifier for ScriptedClassifier {
    async fn classify(&self, image_url: &str) -> Result<Vec<Concept>, ClassificationError> {
        self.requested.lock().await.push(image_url.to_owned());
        self.response.clone()
    }
}

#[derive(Default)]
pub(crate) struct ScriptedMessenger {
    profile: Option<UserProfile>,
    fail_sends: bool,
    sent: Mutex<Vec<(String, String)>>,
    profile_lookups: AtomicUsize,
}

impl ScriptedMessenger {
    pub(crate) fn with_first_name(first_name: &str) -> Self {
        Self {
            profile: Some(UserProfile { first_name: first_name.to_owned(), last_name: None }),
            ..Self::default()
        }
    }

    pub(crate) fn failing_sends() -> Self {
        Self { fail_sends: true, ..Self::default() }
    }

    pub(crate) async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub(crate) fn profile_lookups(&self) -> usize {
        self.profile_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessengerApi for ScriptedMessenger {
    async fn send_text(&self, recipient: &UserId, text: &str) -> Result<(), MessengerError> {
        if self.fail_sends {
            return Err(MessengerError::Rejected { status: 500, detail: "send api down".to_owned() });
        }
        self.sent.lock().await.push((recipient.0.clone(), text.to_owned()));
        Ok(())
    }

    async fn get_profile(&self, _user: &UserId) -> Result<UserProfile, MessengerError> {
        self.profile_lookups.fetch_add(1, Ordering::SeqCst);
        self.profile
            .clone()
            .ok_or_else(|| MessengerError::Request("profile lookup unavailable".to_owned()))
    }
}
