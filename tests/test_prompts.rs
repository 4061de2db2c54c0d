//! Tests for the prompt templates shipped in config/prompts

use std::fs;

use onequery::prompts::{PromptBuilder, Template};

fn expected_vars(template: Template) -> &'static [&'static str] {
    match template {
        Template::DetectProject => &["query", "projects"],
        Template::DetectMeetingProject => &["text", "projects"],
        Template::RewriteQuery => &["today", "query"],
        Template::Answer => &["today", "context", "question"],
        Template::Reasoning => &["question", "context", "answer", "today"],
        Template::ReportUpdate => &["previous_report", "messages"],
        Template::EmailExtract => &["email_body"],
        Template::MeetingClean => &["raw_text"],
    }
}

#[test]
fn test_every_template_file_exists() {
    for template in Template::ALL {
        let path = format!("config/prompts/{}", template.file_name());
        assert!(fs::metadata(&path).is_ok(), "{path} prompt file missing");
    }
}

#[test]
fn test_template_vars_present() {
    for template in Template::ALL {
        let text = template.builtin();
        for var in expected_vars(template) {
            let placeholder = format!("{{{{{var}}}}}");
            assert!(
                text.contains(&placeholder),
                "{} should contain {placeholder}",
                template.file_name()
            );
        }
    }
}

#[test]
fn test_rendered_answer_prompt_has_no_placeholders() {
    let prompt = PromptBuilder::new("config/prompts")
        .template(Template::Answer)
        .var("today", "March 01, 2025")
        .var("context", "Grain | Project name: apollo\nLaunch moved.")
        .var("question", "When is launch?")
        .build();
    assert!(!prompt.contains("{{"), "unrendered placeholder in: {prompt}");
    assert!(prompt.contains("When is launch?"));
    assert!(prompt.contains("March 01, 2025"));
}

#[test]
fn test_override_dir_wins_over_builtin() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("meeting_clean.txt"), "CLEAN: {{raw_text}}").unwrap();
    let prompt = PromptBuilder::new(dir.path())
        .template(Template::MeetingClean)
        .var("raw_text", "um so yeah")
        .build();
    assert_eq!(prompt, "CLEAN: um so yeah");
}

#[test]
fn test_answer_prompt_guards_against_guessing() {
    let text = Template::Answer.builtin();
    assert!(text.contains("I don't know"));
    assert!(text.contains("Prefer Slack"));
    assert!(text.contains("citation list"));
    assert!(Template::Reasoning.builtin().contains("Return only the final answer"));
}
