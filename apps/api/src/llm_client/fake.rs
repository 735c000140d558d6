//! Deterministic stand-in for the completion API, used by pipeline and route tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm_client::{CompletionClient, GenerationError};

type Responder = Box<dyn Fn(&str) -> Result<String, GenerationError> + Send + Sync>;

pub struct FakeCompletion {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    max_tokens: Mutex<Vec<u32>>,
}

impl FakeCompletion {
    pub fn new(
        responder: impl Fn(&str) -> Result<String, GenerationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            max_tokens: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same text.
    pub fn canned(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Echoes the prompt back, so output can be traced to its row.
    pub fn echo() -> Self {
        Self::new(|prompt| Ok(format!("  Draft for: {prompt}\n")))
    }

    /// Sleeps before answering; pairs with paused tokio time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn max_tokens(&self) -> Vec<u32> {
        self.max_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.max_tokens.lock().unwrap().push(max_tokens);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(prompt)
    }
}
