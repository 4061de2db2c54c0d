//! onequery entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args, load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build shared services (clients only, no network)
//!   6. Run the requested command; `serve` starts the scheduler and the
//!      comms channels and runs until Ctrl-C

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use onequery::assistant;
use onequery::bootstrap::logger;
use onequery::core::config::{self, Config};
use onequery::core::error::AppError;
use onequery::services::Services;
use onequery::subsystems::scheduler::{self, Job};
use onequery::subsystems::comms;
use onequery::trackers::ChannelTracker;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Optional file.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let mut config = config::load(args.config_path.as_deref())?;

    // Without -i no stdio channel runs (daemon-safe default).
    if !args.interactive {
        config.comms.pty.enabled = false;
    }
    // Only a hand-run sync may block on the browser consent flow.
    config.ingest.google.interactive_consent = matches!(args.command, Command::Sync(_));

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str()).to_string();
    logger::init(
        &effective_log_level,
        args.log_level.is_some(),
        config.log_file.as_deref(),
    )?;

    info!(
        app = %config.app_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        interactive = %args.interactive,
        "config loaded"
    );

    let services = Arc::new(Services::build(config)?);

    match args.command {
        Command::Ask(question) => {
            let result = assistant::answer(&services, &question)
                .await
                .map_err(|e| AppError::Llm(e.to_string()))?;
            println!("{result}");
            Ok(())
        }
        Command::Sync(job) => {
            let summary = scheduler::run_job(&services, job).await?;
            println!("{job}: {summary}");
            Ok(())
        }
        Command::RegisterChannel { id, name, project } => {
            let mut tracker = ChannelTracker::load(&services.storage).await;
            if tracker.register(&id, &name, &project) {
                tracker
                    .save(&services.storage)
                    .await
                    .map_err(|e| AppError::Storage(e.to_string()))?;
                println!("registered channel {id} as '{name}' (project '{project}')");
            } else {
                println!("channel {id} is already registered");
            }
            Ok(())
        }
        Command::Serve => serve(services, args.interactive).await,
    }
}

async fn serve(services: Arc<Services>, interactive: bool) -> Result<(), AppError> {
    let shutdown = CancellationToken::new();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    print_startup_summary(&services, interactive);

    let has_channels = comms::has_channels(&services.config.comms);

    let jobs = scheduler::start(services.clone(), shutdown.clone());
    let channels = comms::start(services, shutdown.clone());

    let comms_result = channels.join().await;
    // A channel exiting on its own (EOF, /quit) stops the whole process.
    if has_channels {
        shutdown.cancel();
    }
    let jobs_result = jobs.join().await;

    if interactive {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }

    comms_result.and(jobs_result)
}

fn print_startup_summary(services: &Services, interactive: bool) {
    let config: &Config = &services.config;

    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        let char_count = text.chars().count();
        if char_count >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    let mode_text = if interactive { "interactive" } else { "daemon" };

    let model = match config.llm.provider.as_str() {
        "gemini" => config.llm.gemini.model.as_str(),
        "openai" => config.llm.openai.model.as_str(),
        _ => "-",
    };
    let llm_line = format!("provider={} model={model}", services.llm.name());
    let embed_line = format!(
        "provider={} model={} dims={}",
        config.embeddings.provider, config.embeddings.model, config.embeddings.dimensions
    );

    let stores = services.retriever.names();
    let stores_line = if stores.is_empty() {
        "none".to_string()
    } else {
        stores.join(", ")
    };

    let mut comms_lines = Vec::new();
    #[cfg(feature = "channel-pty")]
    comms_lines.push(format!(
        "pty: {}",
        if config.comms.pty.enabled { "enabled" } else { "disabled (use -i)" }
    ));
    #[cfg(feature = "channel-axum")]
    comms_lines.push(if config.comms.http.enabled {
        format!("http: {}", config.comms.http.bind)
    } else {
        "http: disabled".to_string()
    });
    #[cfg(not(feature = "channel-axum"))]
    if config.comms.http.enabled {
        comms_lines.push("http: configured but not compiled in".to_string());
    }

    let schedule = scheduler::entries_from_config(&config.schedule);
    let schedule_lines: Vec<String> = if schedule.is_empty() {
        vec!["none".to_string()]
    } else {
        schedule
            .iter()
            .map(|e| format!("{}: every {}s", e.job, e.every.as_secs()))
            .collect()
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ onequery                                                     ║");
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║   {}║", fit(format!("App: {}", config.app_name)));
    println!("║   {}║", fit(format!("PID: {}", std::process::id())));
    println!("║   {}║", fit(format!("Mode: {mode_text}")));
    println!("║   {}║", fit(format!("Storage: {}", services.storage.describe())));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ LLM                                                          ║");
    println!("║   {}║", fit(llm_line));
    println!("║ Embeddings                                                   ║");
    println!("║   {}║", fit(embed_line));
    println!("║ Retrievers                                                   ║");
    println!("║   {}║", fit(stores_line));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ Comms                                                        ║");
    for line in comms_lines {
        println!("║   {}║", fit(line));
    }
    println!("║ Schedule                                                     ║");
    for line in schedule_lines {
        println!("║   {}║", fit(line));
    }
    println!("╚══════════════════════════════════════════════════════════════╝");

    if interactive {
        println!("Type /help for help");
    }
}

// ── CLI ─────────────────────────────────────────────────────────────────────

enum Command {
    Serve,
    Ask(String),
    Sync(Job),
    RegisterChannel {
        id: String,
        name: String,
        project: String,
    },
}

struct CliArgs {
    command: Command,
    log_level: Option<&'static str>,
    interactive: bool,
    config_path: Option<String>,
}

fn print_usage() {
    println!("Usage: onequery [COMMAND] [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  serve                               Run scheduler and channels (default)");
    println!("  ask <question>                      Answer one question and exit");
    println!("  sync <job>                          Run one job now: slack, reports, gmail,");
    println!("                                      drive, meetings, clickup");
    println!("  register-channel <id> <name> <project>");
    println!("                                      Track a Slack channel");
    println!();
    println!("Options:");
    println!("  -h, --help                 Print help");
    println!("  -i, --interactive          Enable the PTY console");
    println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
    println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
}

fn usage_error(msg: &str) -> ! {
    eprintln!("error: {msg}");
    eprintln!("try 'onequery --help'");
    std::process::exit(2);
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut config_path = None;
    let mut positional: Vec<String> = Vec::new();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            positional.extend(iter.by_ref());
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(path),
                None => usage_error("-f/--config requires a path argument"),
            },
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            a if a.starts_with('-') && a.len() > 1 => usage_error(&format!("unknown option {a}")),
            _ => positional.push(arg),
        }
    }

    let command = match positional.first().map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("ask") => {
            let question = positional[1..].join(" ");
            if question.trim().is_empty() {
                usage_error("ask requires a question");
            }
            Command::Ask(question)
        }
        Some("sync") => match positional.get(1).map(|s| s.parse::<Job>()) {
            Some(Ok(job)) => Command::Sync(job),
            Some(Err(e)) => usage_error(&e.to_string()),
            None => usage_error("sync requires a job name"),
        },
        Some("register-channel") => match &positional[1..] {
            [id, name, project] => Command::RegisterChannel {
                id: id.clone(),
                name: name.clone(),
                project: project.clone(),
            },
            _ => usage_error("register-channel requires <id> <name> <project>"),
        },
        Some(other) => usage_error(&format!("unknown command '{other}'")),
    };

    CliArgs {
        command,
        log_level: logger::level_from_verbosity(verbosity),
        interactive,
        config_path,
    }
}
