//! Mock generative model for testing and local runs.

use super::{GeneratedImage, GenerativeModel, ProviderError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 1x1 transparent PNG.
pub const PLACEHOLDER_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// What the next `describe` or `generate` call should do.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed,
    RejectPolicy(String),
    Fail(String),
}

/// Mock model. Replays scripted behaviors in order, then succeeds.
/// `describe` and `generate` keep separate scripts.
#[derive(Default)]
pub struct MockModel {
    script: Mutex<VecDeque<MockBehavior>>,
    describe_script: Mutex<VecDeque<MockBehavior>>,
    latency: Option<Duration>,
    describe_calls: AtomicUsize,
    generate_calls: AtomicUsize,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(behaviors: impl IntoIterator<Item = MockBehavior>) -> Self {
        Self {
            script: Mutex::new(behaviors.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_describe_script(self, behaviors: impl IntoIterator<Item = MockBehavior>) -> Self {
        Self {
            describe_script: Mutex::new(behaviors.into_iter().collect()),
            ..self
        }
    }

    /// Make every `generate` call take at least `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..self
        }
    }

    pub fn push(&self, behavior: MockBehavior) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(behavior);
        }
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    fn next_behavior(script: &Mutex<VecDeque<MockBehavior>>) -> MockBehavior {
        script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(MockBehavior::Succeed)
    }
}

#[async_trait]
impl GenerativeModel for MockModel {
    async fn describe(&self, _image: &str) -> Result<String, ProviderError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        match Self::next_behavior(&self.describe_script) {
            MockBehavior::Succeed => Ok("A mock description of the supplied image.".to_string()),
            MockBehavior::RejectPolicy(reason) => Err(ProviderError::PolicyViolation(reason)),
            MockBehavior::Fail(message) => Err(ProviderError::ApiError(message)),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match Self::next_behavior(&self.script) {
            MockBehavior::Succeed => Ok(GeneratedImage {
                url: PLACEHOLDER_IMAGE.to_string(),
                revised_prompt: format!("Mock rendering of: {}", prompt),
            }),
            MockBehavior::RejectPolicy(reason) => Err(ProviderError::PolicyViolation(reason)),
            MockBehavior::Fail(message) => Err(ProviderError::ApiError(message)),
        }
    }
}
