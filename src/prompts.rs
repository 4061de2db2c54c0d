//! Prompt templates and the builder that renders them.
//!
//! Every template ships compiled in (from `config/prompts/`). A file with the
//! same name in the configured prompts directory overrides the built-in copy
//! at runtime, so prompts can be tuned without a rebuild.
//!
//! Variable substitution uses `{{key}}` syntax and runs in a single pass at
//! [`build()`](PromptBuilder::build) time, so substituted values (Slack
//! messages, email bodies) are never re-scanned for placeholders.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

const SEPARATOR: &str = "\n\n";

/// Named prompt templates used across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// `{{query}}`, `{{projects}}`
    DetectProject,
    /// `{{text}}`, `{{projects}}`
    DetectMeetingProject,
    /// `{{today}}`, `{{query}}`
    RewriteQuery,
    /// `{{today}}`, `{{context}}`, `{{question}}`
    Answer,
    /// `{{question}}`, `{{context}}`, `{{answer}}`, `{{today}}`
    Reasoning,
    /// `{{previous_report}}`, `{{messages}}`
    ReportUpdate,
    /// `{{email_body}}`
    EmailExtract,
    /// `{{raw_text}}`
    MeetingClean,
}

impl Template {
    pub const ALL: [Template; 8] = [
        Template::DetectProject,
        Template::DetectMeetingProject,
        Template::RewriteQuery,
        Template::Answer,
        Template::Reasoning,
        Template::ReportUpdate,
        Template::EmailExtract,
        Template::MeetingClean,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Template::DetectProject => "detect_project.txt",
            Template::DetectMeetingProject => "detect_meeting_project.txt",
            Template::RewriteQuery => "rewrite_query.txt",
            Template::Answer => "answer.txt",
            Template::Reasoning => "reasoning.txt",
            Template::ReportUpdate => "report_update.txt",
            Template::EmailExtract => "email_extract.txt",
            Template::MeetingClean => "meeting_clean.txt",
        }
    }

    pub fn builtin(self) -> &'static str {
        match self {
            Template::DetectProject => include_str!("../config/prompts/detect_project.txt"),
            Template::DetectMeetingProject => {
                include_str!("../config/prompts/detect_meeting_project.txt")
            }
            Template::RewriteQuery => include_str!("../config/prompts/rewrite_query.txt"),
            Template::Answer => include_str!("../config/prompts/answer.txt"),
            Template::Reasoning => include_str!("../config/prompts/reasoning.txt"),
            Template::ReportUpdate => include_str!("../config/prompts/report_update.txt"),
            Template::EmailExtract => include_str!("../config/prompts/email_extract.txt"),
            Template::MeetingClean => include_str!("../config/prompts/meeting_clean.txt"),
        }
    }
}

/// Fluent builder that assembles a prompt from templates and fragments.
///
/// ```rust
/// use onequery::prompts::{PromptBuilder, Template};
///
/// let prompt = PromptBuilder::new("config/prompts")
///     .template(Template::DetectProject)
///     .var("query", "when does apollo launch?")
///     .var("projects", "- apollo\n- zephyr")
///     .build();
/// assert!(prompt.contains("- apollo"));
/// ```
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// Append a template, preferring an override file in the prompts
    /// directory over the built-in text.
    pub fn template(self, template: Template) -> Self {
        let path = self.prompts_dir.join(template.file_name());
        match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => self.append(text),
            _ => {
                tracing::trace!("prompt: using built-in {}", template.file_name());
                self.append(template.builtin())
            }
        }
    }

    /// Directly append a text fragment.
    pub fn append(mut self, text: impl Into<String>) -> Self {
        let s = text.into();
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    /// Register `{{key}}` → `value` substitution pairs applied at build time.
    pub fn with_vars<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in vars {
            self.vars.insert(k.to_string(), v.to_string());
        }
        self
    }

    /// Register a single variable.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Join all parts with blank lines and substitute variables.
    /// Unknown placeholders are left as-is.
    pub fn build(self) -> String {
        substitute(&self.parts.join(SEPARATOR), &self.vars)
    }
}

fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render `- name` lines, the list format every classifier prompt uses.
pub fn bullet_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|i| format!("- {}", i.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}
