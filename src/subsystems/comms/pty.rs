//! PTY (console) channel: reads questions from stdin, prints the answer and
//! its citations to stdout.
//!
//! Runs until the `shutdown` token is cancelled (Ctrl-C), `/quit` is typed
//! or stdin is closed.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{CommsEvent, CommsState};
use crate::core::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

const HELP: &str = "\
Type a question and press Enter.
  /projects  list known projects
  /history   list questions asked this session
  /help      show this help
  /quit      leave the console";

pub struct PtyChannel {
    channel_id: String,
    state: Arc<CommsState>,
}

impl PtyChannel {
    pub fn new(channel_id: impl Into<String>, state: Arc<CommsState>) -> Self {
        Self {
            channel_id: channel_id.into(),
            state,
        }
    }
}

impl Component for PtyChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_pty(self.channel_id, self.state, shutdown))
    }
}

/// Console commands; anything else is a question.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Help,
    Projects,
    History,
    Quit,
    Unknown(&'a str),
    Question(&'a str),
}

fn parse_input(line: &str) -> Option<Input<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line {
        "/help" | "/?" => Input::Help,
        "/projects" => Input::Projects,
        "/history" => Input::History,
        "/quit" | "/exit" => Input::Quit,
        cmd if cmd.starts_with('/') => Input::Unknown(cmd),
        q => Input::Question(q),
    })
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn run_pty(
    channel_id: String,
    state: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    info!(%channel_id, "pty channel started");
    println!("─────────────────────────────────");
    println!(" onequery console  (/help, Ctrl-C to quit)");
    println!("─────────────────────────────────");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<String> = Vec::new();

    loop {
        prompt();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!();
                info!("pty channel shutting down");
                break;
            }

            line = lines.next_line() => {
                let input = match line {
                    Err(e) => {
                        warn!("pty read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("pty stdin closed");
                        break;
                    }
                    Ok(Some(input)) => input,
                };
                let Some(parsed) = parse_input(&input) else { continue };
                debug!(?parsed, "pty input");

                match parsed {
                    Input::Help => println!("{HELP}"),
                    Input::Quit => break,
                    Input::Projects => {
                        let projects = state.projects().await;
                        if projects.is_empty() {
                            println!("(no projects tracked yet)");
                        } else {
                            println!("{}", crate::prompts::bullet_list(&projects));
                        }
                    }
                    Input::History => {
                        for (i, q) in history.iter().enumerate() {
                            println!("{:>3}. {q}", i + 1);
                        }
                    }
                    Input::Unknown(cmd) => println!("unknown command {cmd}, try /help"),
                    Input::Question(q) => {
                        history.push(q.to_string());
                        let answer = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            r = state.ask(&channel_id, q) => r,
                        };
                        match answer {
                            Ok(result) => println!("{result}\n"),
                            Err(e) => {
                                warn!(error = %e, "query failed");
                                println!("error: {e}\n");
                            }
                        }
                    }
                }
            }
        }
    }

    state.report_event(CommsEvent::ChannelShutdown { channel_id });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::QueryResult;

    #[test]
    fn input_parsing() {
        assert_eq!(parse_input("   "), None);
        assert_eq!(parse_input("/help"), Some(Input::Help));
        assert_eq!(parse_input(" /projects "), Some(Input::Projects));
        assert_eq!(parse_input("/exit"), Some(Input::Quit));
        assert_eq!(parse_input("/nope"), Some(Input::Unknown("/nope")));
        assert_eq!(
            parse_input("when is launch? "),
            Some(Input::Question("when is launch?"))
        );
    }

    #[test]
    fn result_rendering() {
        let r = QueryResult {
            project_key: "apollo".into(),
            answer: "March 3.".into(),
            citations: vec!["- Grain: apollo".into()],
        };
        assert_eq!(r.to_string(), "[apollo]\nMarch 3.\n\nSources:\n- Grain: apollo");
        let bare = QueryResult {
            citations: Vec::new(),
            ..r
        };
        assert_eq!(bare.to_string(), "[apollo]\nMarch 3.");
    }
}
