//! Terminal host for the chat client.
//!
//! ```bash
//! # Chat with the first agent the service offers
//! chat-host
//!
//! # Pick an agent and keep conversations on disk
//! chat-host --agent llama3 --store-dir ~/.local/share/chat
//!
//! # Same service, different machine
//! chat-host --host 192.168.1.20
//!
//! chat-host list-agents
//! ```
//!
//! Prompts are read line by line from stdin. Ctrl-C cancels the reply in
//! progress; `/quit` or end of input exits.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chat_core::prelude::*;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt as _;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chat-host", version, about = "Chat with a streaming agent from the terminal")]
struct Args {
    /// Base URL of the chat service (overrides CHAT_API_BASE)
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Replace only the hostname of the base URL
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Directory for saved conversations; kept in memory when unset
    #[arg(long, env = "CHAT_STORE_DIR", value_name = "DIR")]
    store_dir: Option<PathBuf>,

    /// Agent to talk to (defaults to the first one listed)
    #[arg(short, long, value_name = "AGENT")]
    agent: Option<String>,

    /// Seconds without a frame before a reply is abandoned
    #[arg(long, value_name = "SECS")]
    idle_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the agents offered by the service
    ListAgents,
}

fn resolve_config(args: &Args) -> Result<TransportConfig, TransportError> {
    let mut config = TransportConfig::from_env()?;
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url.trim());
    }
    if let Some(host) = &args.host {
        config = config.with_host(host);
    }
    if let Some(secs) = args.idle_timeout_secs {
        config = config.idle_timeout(Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
}

async fn select_agent(client: &ChatClient, requested: Option<String>) -> Result<String, SessionError> {
    if let Some(agent) = requested {
        return Ok(agent);
    }
    let agents = client.list_agents().await?;
    agents
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::Validation("the service offers no agents".into()))
}

fn print_conversation(conversation: &Conversation) {
    for message in conversation.messages() {
        println!("[{}] {}", message.author, message.text);
    }
}

/// Prints assistant text as it grows. Cleanup can rewrite text already
/// printed, in which case the whole reply is printed again.
#[derive(Default)]
struct ReplyPrinter {
    printed: String,
}

impl ReplyPrinter {
    fn update(&mut self, update: TurnUpdate) {
        let mut stdout = std::io::stdout();
        match update {
            TurnUpdate::Started { .. } => {
                self.printed.clear();
            }
            TurnUpdate::Text { text, .. } => {
                match text.strip_prefix(self.printed.as_str()) {
                    Some(suffix) => {
                        let _ = write!(stdout, "{suffix}");
                    }
                    None => {
                        let _ = write!(stdout, "\n{text}");
                    }
                }
                self.printed = text;
            }
            TurnUpdate::Finished(TurnOutcome::Completed { text, .. }) => {
                if text.is_empty() {
                    let _ = write!(stdout, "(no reply)");
                }
                let _ = writeln!(stdout);
            }
            TurnUpdate::Finished(TurnOutcome::Failed { notice, .. }) => {
                if !self.printed.is_empty() {
                    let _ = writeln!(stdout);
                }
                let _ = writeln!(stdout, "{notice}");
            }
        }
        let _ = stdout.flush();
    }
}

async fn chat(session: &ChatSession) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", session.agent());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };
        match line.trim() {
            "" => continue,
            "/quit" => return Ok(()),
            "/history" => {
                print_conversation(&session.snapshot().await);
                continue;
            }
            _ => {}
        }

        let mut printer = ReplyPrinter::default();
        let send = session.send_with(&line, |update| printer.update(update));
        tokio::pin!(send);
        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                _ = tokio::signal::ctrl_c() => {
                    session.cancel_active().await;
                }
            }
        };
        if let Err(error) = result {
            warn!(error = %error, "turn rejected");
            println!("{error}");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_observability();
    let args = Args::parse();

    let config = resolve_config(&args)?;
    info!(base_url = %config.base_url, "chat service");
    let client = ChatClient::new(config)?;

    if let Some(Command::ListAgents) = args.command {
        for agent in client.list_agents().await? {
            println!("{agent}");
        }
        return Ok(());
    }

    let store: Arc<dyn ConversationStore> = match &args.store_dir {
        Some(dir) => Arc::new(JsonFileStore::new(dir)),
        None => Arc::new(MemoryStore::new()),
    };
    let agent = select_agent(&client, args.agent.clone()).await?;
    let session = ChatSession::open(client, agent, store).await?;
    print_conversation(&session.snapshot().await);

    chat(&session).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment_config() {
        let args = Args::parse_from([
            "chat-host",
            "--base-url",
            "http://chat.internal:9000/",
            "--host",
            "10.0.0.7",
            "--idle-timeout-secs",
            "30",
        ]);
        let config = resolve_config(&args).expect("config");
        assert_eq!(config.base_url, "http://10.0.0.7:9000");
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn list_agents_subcommand() {
        let args = Args::parse_from(["chat-host", "list-agents"]);
        assert!(matches!(args.command, Some(Command::ListAgents)));
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let args = Args::parse_from(["chat-host", "--base-url", "http://h:1", "--idle-timeout-secs", "0"]);
        assert!(resolve_config(&args).is_err());
    }
}
