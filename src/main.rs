use std::path::PathBuf;

use anyhow::Context;
use chat_history::agent::OllamaAgentService;
use chat_history::config::data_dir_from_env;
use chat_history::{ConversationStore, FileBackend, MessageRole, StoreConfig, StoreError};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "chat_history", about = "Manage locally stored chat conversations")]
struct Cli {
    /// Directory holding the history file (defaults to CHAT_HISTORY_DIR or ./.chat_history)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "OLLAMA_API_BASE_URL",
        default_value = "http://localhost:11434"
    )]
    ollama_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List conversations, newest first
    List,
    /// Start a new conversation and make it current
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// Make a conversation current
    Switch { id: String },
    /// Delete a conversation
    Delete { id: String },
    /// Print the messages of a conversation, oldest first
    Show {
        #[arg(long)]
        id: Option<String>,
    },
    /// Append a message to the current conversation without asking the model
    Add {
        content: String,
        #[arg(long, default_value = "user")]
        role: MessageRole,
    },
    /// Send a message to the model and store its reply
    Chat { content: String },
    /// Change the model of a conversation (the current one by default)
    Model {
        name: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// Case-insensitive search across all messages
    Search { query: String },
    /// Export one conversation (or everything with --all) as JSON
    Export {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import a conversation export or a full backup
    Import { path: PathBuf },
    /// Show aggregate counts
    Stats,
    /// Clear one conversation's messages, or everything with --all
    Clear {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_history=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(data_dir_from_env);
    let backend = FileBackend::open(&data_dir)
        .with_context(|| format!("Failed to open history directory {}", data_dir.display()))?;
    let store = ConversationStore::open(backend, StoreConfig::from_env())?;
    store.subscribe(|event| debug!(event = event.name(), "store changed"));

    run(&store, &cli).await?;
    store.close();
    Ok(())
}

async fn run(store: &ConversationStore, cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::List => {
            let current = store.current_conversation_id();
            for conversation in store.conversations()? {
                let marker = if current.as_deref() == Some(conversation.id.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {}  {:<34} {:>4} msgs  {}  {}",
                    conversation.id,
                    conversation.title,
                    conversation.messages.len(),
                    conversation.model,
                    conversation.updated_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Command::New { title } => {
            let conversation = store.create_conversation(title.as_deref())?;
            println!("{}", conversation.id);
        }
        Command::Switch { id } => {
            if !store.switch_conversation(id)? {
                return Err(StoreError::ConversationNotFound { id: id.clone() }.into());
            }
        }
        Command::Delete { id } => {
            if !store.delete_conversation(id)? {
                return Err(StoreError::ConversationNotFound { id: id.clone() }.into());
            }
        }
        Command::Show { id } => {
            for message in store.messages(id.as_deref())?.iter().rev() {
                println!("[{}] {}: {}", message.timestamp.format("%H:%M:%S"), message.role, message.content);
            }
        }
        Command::Add { content, role } => {
            let message = store.add_message(content, *role)?;
            println!("{}", message.id);
        }
        Command::Chat { content } => {
            store.add_message(content, MessageRole::User)?;
            let conversation = store
                .current_conversation()?
                .context("No current conversation after adding the message")?;
            let agent = OllamaAgentService::new(&cli.ollama_url)?;
            let reply = agent.reply(&conversation).await?;
            store.add_ai_response(&reply)?;
            println!("{reply}");
        }
        Command::Model { name, id } => {
            let id = match id {
                Some(id) => id.clone(),
                None => store
                    .current_conversation_id()
                    .context("No current conversation")?,
            };
            if !store.set_model(&id, name)? {
                return Err(StoreError::ConversationNotFound { id }.into());
            }
        }
        Command::Search { query } => {
            for hit in store.search_messages(query)? {
                println!("{} ({}) {}: {}", hit.conversation.id, hit.conversation.title, hit.message.role, hit.matched);
            }
        }
        Command::Export { id, all, out } => {
            let json = if *all {
                store.export_all()?
            } else {
                store
                    .export_conversation(id.as_deref())?
                    .context("Nothing to export")?
            };
            match out {
                Some(path) => {
                    std::fs::write(path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Command::Import { path } => {
            let payload = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if !store.import_data(&payload)? {
                anyhow::bail!("{} is not a conversation export or backup", path.display());
            }
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.statistics()?)?);
        }
        Command::Clear { id, all } => {
            if *all {
                store.clear_all()?;
            } else {
                let id = match id {
                    Some(id) => id.clone(),
                    None => store
                        .current_conversation_id()
                        .context("No current conversation")?,
                };
                if !store.clear_conversation(&id)? {
                    return Err(StoreError::ConversationNotFound { id }.into());
                }
            }
        }
    }
    Ok(())
}
