//! Shared state for comms channels.
//!
//! Channels receive an `Arc<CommsState>` and only reach the rest of the
//! process through the methods below.
//!
//! [`CommsState::report_event`] lets a running channel signal the comms
//! manager (e.g. "I shut down") without sharing any other state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::assistant::{self, AssistantError, QueryResult};
use crate::services::Services;

// ── Events ──────────────────────────────────────────────────────────────────

/// Events a channel sends back to the comms manager.
#[derive(Debug)]
pub enum CommsEvent {
    /// Channel has stopped (clean exit or EOF).
    ChannelShutdown { channel_id: String },
    /// A query arrived on the channel.
    QueryReceived { channel_id: String },
}

// ── State ───────────────────────────────────────────────────────────────────

pub struct CommsState {
    services: Arc<Services>,
    event_tx: mpsc::Sender<CommsEvent>,
}

impl CommsState {
    pub fn new(services: Arc<Services>, event_tx: mpsc::Sender<CommsEvent>) -> Self {
        Self { services, event_tx }
    }

    /// Run `query` through the assistant on behalf of `channel_id`.
    pub async fn ask(&self, channel_id: &str, query: &str) -> Result<QueryResult, AssistantError> {
        debug!(channel_id, "query received");
        self.report_event(CommsEvent::QueryReceived {
            channel_id: channel_id.to_string(),
        });
        assistant::answer(&self.services, query).await
    }

    /// Project names the assistant can attribute queries to.
    pub async fn projects(&self) -> Vec<String> {
        assistant::projects(&self.services).await
    }

    /// Active LLM backend, for health output.
    pub fn llm_name(&self) -> &'static str {
        self.services.llm.name()
    }

    /// Names of the configured retrievers, in fusion order.
    pub fn retrievers(&self) -> Vec<String> {
        self.services
            .retriever
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn storage(&self) -> String {
        self.services.storage.describe()
    }

    /// Report an event to the comms manager. Drops the event with a warning
    /// if the manager is full or gone.
    pub fn report_event(&self, event: CommsEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("comms event dropped: {e}");
        }
    }
}
