//! studio-chat: command-line front end for the assistant.
//! Reads config, sends a question, streams the reply to stdout as it arrives,
//! then prints the reply's cards and follow-up suggestions. Subcommands manage
//! stored conversations, start from a quick action, and check the backend.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use studio_chat_client::{
    config, ChatBackend, Client, Config, ConfigError, Role, SendOutcome, Session, Transcript,
    Turn, TurnId,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "studio-chat", version, about = "Chat with the studio assistant")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Config file (default: ~/.studio-chat/config.yaml)
    #[arg(long, env = "STUDIO_CHAT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Continue an existing conversation
    #[arg(long)]
    conversation: Option<String>,

    /// Question to ask; read from stdin when omitted
    question: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question (the default)
    Ask {
        #[arg(long)]
        conversation: Option<String>,
        /// Send the prompt of the quick action with this id
        #[arg(long, conflicts_with = "question")]
        quick: Option<String>,
        question: Option<String>,
    },
    /// List conversations
    List,
    /// Print the stored turns of a conversation
    History { id: String },
    /// Delete a conversation
    Delete { id: String },
    /// List the suggested starter prompts
    QuickActions,
    /// Check that the backend answers
    Health,
}

fn load_config(explicit: Option<&PathBuf>) -> Result<Config, ConfigError> {
    match explicit {
        Some(path) => config::load(path),
        None => {
            let path = config::default_config_path().ok_or(ConfigError::NoHomeDir)?;
            if path.exists() {
                config::load(&path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_env("STUDIO_CHAT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(cfg.log.level.as_deref().unwrap_or("warn"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_question(arg: Option<String>) -> Option<String> {
    let question = match arg {
        Some(q) => q,
        None => {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).unwrap_or(0);
            line
        }
    };
    let question = question.trim();
    (!question.is_empty()).then(|| question.to_string())
}

fn print_extras(out: &mut impl Write, turn: &Turn) -> io::Result<()> {
    for card in &turn.cards {
        writeln!(out, "[{}] {}", card.card_type, card.title)?;
        for action in &card.actions {
            match (&action.url, action.callback_prompt()) {
                (Some(url), _) => writeln!(out, "  - {}: {}", action.label, url)?,
                (None, Some(prompt)) => writeln!(out, "  - {} -> \"{}\"", action.label, prompt)?,
                (None, None) => writeln!(out, "  - {}", action.label)?,
            }
        }
    }
    if !turn.follow_ups.is_empty() {
        writeln!(out, "\nFollow-ups:")?;
        for question in &turn.follow_ups {
            writeln!(out, "  {}", question)?;
        }
    }
    Ok(())
}

/// Print whatever the last assistant turn gained since the previous call.
fn print_progress(transcript: &Transcript, cursor: &mut Option<(TurnId, usize)>) {
    let Some(turn) = transcript.last().filter(|t| t.role == Role::Assistant) else {
        return;
    };
    if cursor.as_ref().map_or(true, |(id, _)| *id != turn.id) {
        *cursor = Some((turn.id.clone(), 0));
    }
    let Some((_, printed)) = cursor.as_mut() else {
        return;
    };
    if let Some(delta) = turn.content.get(*printed..) {
        if !delta.is_empty() {
            let mut out = io::stdout().lock();
            let _ = write!(out, "{}", delta);
            let _ = out.flush();
            *printed = turn.content.len();
        }
    }
}

async fn quick_prompt(client: &Client, id: &str) -> anyhow::Result<String> {
    let actions = client
        .quick_actions()
        .await
        .context("loading quick actions failed")?;
    actions
        .into_iter()
        .find(|a| a.id == id)
        .map(|a| a.prompt)
        .with_context(|| format!("unknown quick action: {id}"))
}

async fn ask(client: Client, conversation: Option<String>, question: String) -> anyhow::Result<ExitCode> {
    let session = match conversation {
        Some(id) => Session::with_conversation(client, id),
        None => Session::new(client),
    };
    session.on_conversation_assigned(|id| eprintln!("conversation: {}", id));

    let mut updates = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut cursor = None;
        while updates.changed().await.is_ok() {
            let transcript = updates.borrow_and_update().clone();
            print_progress(&transcript, &mut cursor);
        }
        cursor
    });

    let outcome = session.send(&question).await;
    let transcript = session.snapshot();
    drop(session);
    let mut cursor = printer.await.context("output task failed")?;
    print_progress(&transcript, &mut cursor);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out)?;
    if let Some(turn) = transcript.last().filter(|t| t.role == Role::Assistant) {
        print_extras(&mut out, turn)?;
    }

    match outcome {
        SendOutcome::Completed => Ok(ExitCode::SUCCESS),
        SendOutcome::Faulted => {
            eprintln!("Error: reply stream failed (is the backend running?)");
            Ok(ExitCode::FAILURE)
        }
        SendOutcome::Rejected | SendOutcome::Superseded => {
            eprintln!("Error: question was not sent");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: Cli, client: Client) -> anyhow::Result<ExitCode> {
    let stdout = io::stdout();
    match cli.command {
        None => {
            let question = read_question(cli.question).context("no question provided")?;
            ask(client, cli.conversation, question).await
        }
        Some(Command::Ask {
            conversation,
            quick,
            question,
        }) => {
            let question = match quick {
                Some(id) => quick_prompt(&client, &id).await?,
                None => read_question(question).context("no question provided")?,
            };
            ask(client, conversation, question).await
        }
        Some(Command::List) => {
            let conversations = client
                .list_conversations()
                .await
                .context("listing conversations failed")?;
            let mut out = stdout.lock();
            for c in conversations {
                writeln!(out, "{}\t{}\t{}\t{}", c.id, c.updated_at, c.message_count, c.title)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::History { id }) => {
            let turns = client
                .fetch_messages(&id)
                .await
                .with_context(|| format!("loading conversation {id} failed"))?;
            let mut out = stdout.lock();
            for turn in &turns {
                let who = match turn.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                writeln!(out, "{}: {}", who, turn.content)?;
                print_extras(&mut out, turn)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Delete { id }) => {
            client
                .delete_conversation(&id)
                .await
                .with_context(|| format!("deleting conversation {id} failed"))?;
            writeln!(stdout.lock(), "deleted {}", id)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::QuickActions) => {
            let actions = client
                .quick_actions()
                .await
                .context("loading quick actions failed")?;
            let mut out = stdout.lock();
            for a in actions {
                writeln!(out, "{}\t{} {}: {}", a.id, a.icon, a.label, a.prompt)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Health) => {
            if client.health().await {
                writeln!(stdout.lock(), "{}: ok", client.api_base())?;
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("{}: unreachable", client.api_base());
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&cfg);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = Client::from_config(&cfg);
    match rt.block_on(run(cli, client)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
