//! The question-answering pipeline.
//!
//! ```text
//! query ─► detect project ─► (rewrite) ─► ensemble retrieval
//!                │                               │
//!                ▼                               ▼
//!     project report + ClickUp tasks ──► context + citations
//!                                                │
//!                                   answer ─► (reasoning pass) ─► QueryResult
//! ```

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::ProviderError;
use crate::prompts::{Template, bullet_list};
use crate::retrieval::RetrievalError;
use crate::services::Services;
use crate::trackers::{ReportTracker, load_clickup_map, load_clickup_projects};
use crate::vector::Document;

pub const UNKNOWN_PROJECT: &str = "unknown";

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("empty query")]
    EmptyQuery,
    #[error(transparent)]
    Llm(#[from] ProviderError),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub project_key: String,
    pub answer: String,
    pub citations: Vec<String>,
}

/// `[project]`, the answer, then a `Sources:` block when there are any.
impl std::fmt::Display for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]\n{}", self.project_key, self.answer)?;
        if !self.citations.is_empty() {
            write!(f, "\n\nSources:\n{}", self.citations.join("\n"))?;
        }
        Ok(())
    }
}

/// Map a classifier reply back onto a known project key, ignoring case and
/// stray quoting. Anything else is [`UNKNOWN_PROJECT`].
pub fn match_project(reply: &str, projects: &[String]) -> String {
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '-' | '*') || c.is_whitespace())
        .to_lowercase();
    projects
        .iter()
        .find(|p| p.to_lowercase() == cleaned)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_PROJECT.to_string())
}

pub fn today() -> String {
    Local::now().format("%B %d, %Y").to_string()
}

/// Ask the classifier which project `query` is about. With no known
/// projects the answer is always [`UNKNOWN_PROJECT`].
pub async fn detect_project(
    services: &Services,
    query: &str,
    projects: &[String],
) -> Result<String, ProviderError> {
    if projects.is_empty() {
        return Ok(UNKNOWN_PROJECT.to_string());
    }
    let prompt = services
        .prompts()
        .template(Template::DetectProject)
        .var("query", query)
        .var("projects", bullet_list(projects))
        .build();
    let reply = services.ask_llm(&prompt).await?;
    Ok(match_project(&reply, projects))
}

pub async fn rewrite_query(services: &Services, query: &str, today: &str) -> Result<String, ProviderError> {
    let prompt = services
        .prompts()
        .template(Template::RewriteQuery)
        .var("today", today)
        .var("query", query)
        .build();
    let rewritten = services.ask_llm(&prompt).await?;
    if rewritten.is_empty() {
        return Ok(query.to_string());
    }
    Ok(rewritten)
}

// ── Context assembly ────────────────────────────────────────────────────────

/// Pinecone hands numbers back as floats; show whole numbers without `.0`.
fn chunk_label(doc: &Document) -> String {
    match doc.metadata.get("chunk_index") {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Some(Value::String(s)) => s.clone(),
        _ => "N/A".to_string(),
    }
}

/// Citation line and context header for one retrieved document.
pub fn describe(doc: &Document) -> (String, String) {
    let field = |key: &str| doc.meta_display(key).unwrap_or_else(|| "unknown".into());
    let source = field("source");
    match source.to_lowercase().as_str() {
        "gmail" => {
            let (sender, subject) = (field("sender"), field("subject"));
            (
                format!("- Gmail: {sender} | subject: {subject}"),
                format!("Gmail | Sender: {sender} | Subject: {subject}"),
            )
        }
        "google_drive" => {
            let (file, chunk) = (field("file_name"), chunk_label(doc));
            (
                format!("- Drive: {file} (Chunk {chunk})"),
                format!("Drive | File: {file} | Chunk: {chunk}"),
            )
        }
        "grain" => {
            let project = field("project_name");
            (
                format!("- Grain: {project}"),
                format!("Grain | Project name: {project}"),
            )
        }
        _ => (format!("- {source}"), source),
    }
}

/// Render retrieved documents plus the project report and task overview.
pub fn build_context(
    docs: &[Document],
    report: &str,
    tasks_overview: &str,
) -> (String, Vec<String>) {
    let mut context = String::new();
    let mut citations: Vec<String> = Vec::new();
    for doc in docs {
        let (citation, header) = describe(doc);
        if !citations.contains(&citation) {
            citations.push(citation);
        }
        context.push_str(&header);
        context.push('\n');
        context.push_str(&doc.page_content);
        context.push_str("\n\n");
    }
    context.push_str(&format!("\n\n**Project Report:**\n{report}"));
    context.push_str(&format!("\n\n**ClickUp Tasks Overview:**\n{tasks_overview}"));
    (context, citations)
}

async fn project_report(services: &Services, tracker: &ReportTracker, project: &str) -> String {
    let Some(entry) = tracker.get(project) else {
        return String::new();
    };
    match services.storage.load_text(&entry.report_path).await {
        Ok(text) => text,
        Err(e) => {
            warn!(project, error = %e, "could not load project report");
            String::new()
        }
    }
}

async fn tasks_overview(services: &Services, project: &str) -> String {
    let map = load_clickup_map(&services.storage).await;
    let Some(clickup_key) = map.get(project) else {
        return String::new();
    };
    let projects = load_clickup_projects(&services.storage).await;
    projects
        .get(clickup_key)
        .map(|tasks| {
            tasks
                .iter()
                .map(|t| format!("- {} | Status: {}\n", t.name, t.status))
                .collect()
        })
        .unwrap_or_default()
}

// ── Pipeline ────────────────────────────────────────────────────────────────

/// Answer `query` from every configured source.
pub async fn answer(services: &Services, query: &str) -> Result<QueryResult, AssistantError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AssistantError::EmptyQuery);
    }
    let cfg = &services.config.assistant;
    let today = today();

    let tracker = ReportTracker::load(&services.storage).await;
    let project_key = detect_project(services, query, &tracker.project_names()).await?;
    debug!(project = %project_key, "project detected");

    let search = if cfg.rewrite_query {
        let rewritten = rewrite_query(services, query, &today).await?;
        debug!(rewritten = %rewritten, "query rewritten");
        rewritten
    } else {
        query.to_string()
    };

    let hits = services.retriever.retrieve(&services.embedder, &search).await?;
    let docs: Vec<Document> = hits.into_iter().map(|h| h.document).collect();

    let report = project_report(services, &tracker, &project_key).await;
    let tasks = tasks_overview(services, &project_key).await;
    let (context, citations) = build_context(&docs, &report, &tasks);

    let prompt = services
        .prompts()
        .template(Template::Answer)
        .var("today", today.as_str())
        .var("context", context.as_str())
        .var("question", query)
        .build();
    let mut answer = services.ask_llm(&prompt).await?;

    if cfg.reasoning {
        let prompt = services
            .prompts()
            .template(Template::Reasoning)
            .var("question", query)
            .var("context", context.as_str())
            .var("answer", answer.as_str())
            .var("today", today.as_str())
            .build();
        answer = services.ask_llm(&prompt).await?;
    }

    info!(
        project = %project_key,
        documents = docs.len(),
        citations = citations.len(),
        "query answered"
    );
    Ok(QueryResult {
        project_key,
        answer,
        citations,
    })
}

/// Project names known to the report tracker.
pub async fn projects(services: &Services) -> Vec<String> {
    ReportTracker::load(&services.storage).await.project_names()
}
