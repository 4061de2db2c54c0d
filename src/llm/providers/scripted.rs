//! Scripted provider: replays canned replies in order.
//!
//! Once the script is exhausted the last reply repeats. Every prompt is
//! recorded so callers can assert on what the pipeline actually sent. An
//! optional delay stands in for a slow backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::llm::{LlmResponse, ProviderError};

#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    replies: Arc<Vec<String>>,
    state: Arc<Mutex<ScriptState>>,
    delay: Duration,
}

#[derive(Debug, Default)]
struct ScriptState {
    next: usize,
    prompts: Vec<String>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Arc::new(replies),
            state: Arc::new(Mutex::new(ScriptState::default())),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn complete(
        &self,
        content: &str,
        _system: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| ProviderError::Request("scripted provider state poisoned".into()))?;
        state.prompts.push(content.to_string());
        let idx = state.next.min(self.replies.len().saturating_sub(1));
        state.next += 1;
        let text = self
            .replies
            .get(idx)
            .cloned()
            .ok_or_else(|| ProviderError::Request("scripted provider has no replies".into()))?;
        Ok(LlmResponse { text, usage: None })
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.prompts.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_in_order_then_repeats_last() {
        let p = ScriptedProvider::new(vec!["one".into(), "two".into()]);
        assert_eq!(p.complete("a", None).await.unwrap().text, "one");
        assert_eq!(p.complete("b", None).await.unwrap().text, "two");
        assert_eq!(p.complete("c", None).await.unwrap().text, "two");
        assert_eq!(p.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn delay_holds_the_reply() {
        tokio::time::pause();
        let p = ScriptedProvider::new(vec!["late".into()]).with_delay(Duration::from_secs(30));
        let early = tokio::time::timeout(Duration::from_secs(10), p.complete("a", None)).await;
        assert!(early.is_err());
        let reply = p.complete("b", None).await.unwrap();
        assert_eq!(reply.text, "late");
    }

    #[tokio::test]
    async fn empty_script_errors() {
        let p = ScriptedProvider::new(Vec::new());
        assert!(p.complete("a", None).await.is_err());
    }

    #[tokio::test]
    async fn clones_share_the_script() {
        let p = ScriptedProvider::new(vec!["x".into(), "y".into()]);
        let q = p.clone();
        p.complete("1", None).await.unwrap();
        assert_eq!(q.complete("2", None).await.unwrap().text, "y");
    }
}
