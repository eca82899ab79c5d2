//! # knowledge-chat CLI (`kchat`)
//!
//! ## Usage
//!
//! ```bash
//! kchat --config ./config/kchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kchat index` | Build the index if it does not exist yet |
//! | `kchat ask "<question>"` | One question, answer with sources |
//! | `kchat chat` | Interactive conversation |
//! | `kchat history` | Print the stored conversation |
//! | `kchat reset` | Forget the stored conversation |
//! | `kchat sessions` | List conversations with stored history |
//! | `kchat relearn` | Delete and rebuild the index from the corpus |
//! | `kchat serve` | Start the JSON HTTP server |
//! | `kchat completions <shell>` | Print shell completions |
//!
//! A missing config file is not an error: the built-in defaults read
//! `./knowledge/**/*.md` and talk to Ollama on `localhost:11434`.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use knowledge_chat::config::{self, Config};
use knowledge_chat::corpus::CorpusSource;
use knowledge_chat::embedding::create_embedder;
use knowledge_chat::generation::create_generator;
use knowledge_chat::history::ChatHistoryStore;
use knowledge_chat::index::{ensure_index, rebuild_index, IndexOptions, KnowledgeSnapshot};
use knowledge_chat::manager::{RelearnOptions, SessionManager};
use knowledge_chat::progress::ProgressMode;
use knowledge_chat::server;
use knowledge_chat_core::models::{ChatResponse, Message};

/// Ask questions about a local knowledge base.
#[derive(Parser)]
#[command(
    name = "kchat",
    about = "Ask questions about a local knowledge base through a locally hosted language model",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used if it
    /// does not exist.
    #[arg(long, global = true, default_value = "./config/kchat.toml")]
    config: PathBuf,

    /// Index build progress on stderr. Defaults to `human` on a terminal,
    /// `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the knowledge index if it does not exist yet, then report it.
    Index,

    /// Ask a single question and print the answer with its sources.
    Ask {
        question: String,

        /// Conversation key (defaults to `chat.session_key`).
        #[arg(long)]
        session: Option<String>,
    },

    /// Start an interactive conversation.
    ///
    /// Type a question per line. `/history` shows the conversation, `/reset`
    /// clears it, `/relearn` rebuilds the index, `/quit` exits.
    Chat {
        #[arg(long)]
        session: Option<String>,
    },

    /// Print the stored conversation.
    History {
        #[arg(long)]
        session: Option<String>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Forget the stored conversation. Safe to run repeatedly.
    Reset {
        #[arg(long)]
        session: Option<String>,
    },

    /// List the session keys that have a stored conversation.
    Sessions,

    /// Delete the index and rebuild it from the corpus.
    ///
    /// This cannot be undone. Chat history is kept unless
    /// `--clear-history` is given.
    Relearn {
        /// Also delete every stored conversation.
        #[arg(long)]
        clear_history: bool,

        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Start the JSON HTTP server on `server.bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "kchat", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_or_default(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Index => run_index(&cfg, progress).await?,
        Commands::Ask { question, session } => {
            let mut manager = start_manager(&cfg, progress).await?;
            let key = session.unwrap_or_else(|| cfg.chat.session_key.clone());
            let resp = manager.chat_in(&key, &question).await?;
            print_response(&resp);
            if let Some(failure) = resp.error {
                bail!("question could not be answered ({})", failure.kind);
            }
        }
        Commands::Chat { session } => {
            let manager = start_manager(&cfg, progress).await?;
            let key = session.unwrap_or_else(|| cfg.chat.session_key.clone());
            run_chat(manager, &key).await?;
        }
        Commands::History { session, json } => {
            let key = session.unwrap_or_else(|| cfg.chat.session_key.clone());
            let store = ChatHistoryStore::open(&cfg.storage.history_path)?;
            let messages = store.messages(&key);
            if json {
                println!("{}", serde_json::to_string_pretty(messages)?);
            } else {
                print_history(messages);
            }
        }
        Commands::Reset { session } => {
            let key = session.unwrap_or_else(|| cfg.chat.session_key.clone());
            let mut store = ChatHistoryStore::open(&cfg.storage.history_path)?;
            store.clear(&key)?;
            println!("Chat history cleared.");
        }
        Commands::Sessions => {
            let store = ChatHistoryStore::open(&cfg.storage.history_path)?;
            let keys = store.keys();
            if keys.is_empty() {
                println!("No chat history.");
            }
            for key in keys {
                println!("{}  ({} messages)", key, store.messages(&key).len());
            }
        }
        Commands::Relearn { clear_history, yes } => {
            if !yes && !confirm_relearn(&cfg)? {
                println!("Aborted.");
                return Ok(());
            }
            let snapshot = rebuild_index(
                &cfg.storage.index_dir,
                &CorpusSource::from_config(&cfg.knowledge),
                create_embedder(&cfg.models)?,
                IndexOptions::from_config(&cfg),
                progress.reporter().as_ref(),
            )
            .await?;
            if clear_history {
                ChatHistoryStore::open(&cfg.storage.history_path)?.clear_all()?;
                println!("Chat history cleared.");
            }
            print_index("rebuilt", &snapshot);
        }
        Commands::Serve => {
            let manager = start_manager(&cfg, progress).await?;
            server::run_server(&cfg.server.bind, manager).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn start_manager(cfg: &Config, progress: ProgressMode) -> Result<SessionManager> {
    let manager = SessionManager::start_with_progress(
        cfg,
        create_embedder(&cfg.models)?,
        create_generator(&cfg.models)?,
        progress.reporter(),
    )
    .await?;
    Ok(manager)
}

async fn run_index(cfg: &Config, progress: ProgressMode) -> Result<()> {
    let snapshot = ensure_index(
        &cfg.storage.index_dir,
        &CorpusSource::from_config(&cfg.knowledge),
        create_embedder(&cfg.models)?,
        IndexOptions::from_config(cfg),
        progress.reporter().as_ref(),
    )
    .await?;
    print_index("ready", &snapshot);
    Ok(())
}

fn print_index(verb: &str, snapshot: &KnowledgeSnapshot) {
    let m = snapshot.manifest();
    println!("index {} at {}", verb, snapshot.persist_dir().display());
    println!("  documents: {}", m.document_count);
    println!("  chunks: {}", m.chunk_count);
    println!("  embedding model: {} ({} dims)", m.embedding_model, m.dims);
    println!("  built at: {}", m.built_at.to_rfc3339());
}

fn print_response(resp: &ChatResponse) {
    println!("{}", resp.response);
    if !resp.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &resp.citations {
            println!("  {} (score {:.3})", c.file_path, c.score);
        }
    }
}

fn print_history(messages: &[Message]) {
    if messages.is_empty() {
        println!("No chat history.");
        return;
    }
    for m in messages {
        println!("[{}] {}: {}", m.created_at.format("%Y-%m-%d %H:%M"), m.role, m.content);
    }
}

fn confirm_relearn(cfg: &Config) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        bail!("relearn deletes {}; pass --yes to confirm", cfg.storage.index_dir.display());
    }
    print!(
        "This deletes the index at {} and rebuilds it. Continue? [y/N] ",
        cfg.storage.index_dir.display()
    );
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

async fn run_chat(mut manager: SessionManager, key: &str) -> Result<()> {
    manager.open_session(key)?;
    println!("Ask a question (/history, /reset, /relearn, /quit).");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => print_history(&manager.history_of(key)?),
            "/reset" => {
                manager.reset_session(key)?;
                println!("Chat history cleared.");
            }
            "/relearn" => match manager.relearn_knowledge(RelearnOptions::default()).await {
                Ok(snapshot) => print_index("rebuilt", &snapshot),
                Err(e) => eprintln!("relearn failed: {}", e),
            },
            question => match manager.chat_in(key, question).await {
                Ok(resp) => print_response(&resp),
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }
    Ok(())
}
