//! CLI command definitions, routing, and tracing setup.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncBufReadExt;
use tracing::info;

use chatdoc_client::ApiClient;
use chatdoc_core::{Conversation, UploadPhase, Uploader};
use chatdoc_session::SessionManager;
use chatdoc_shared::{
    AppConfig, DocumentRecord, Session, UploadConfig, data_dir, init_config, load_config,
};
use chatdoc_store::Store;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ChatDoc — upload a PDF, then ask it questions.
#[derive(Parser)]
#[command(
    name = "chatdoc",
    version,
    about = "Upload PDFs and hold conversations about them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create an account and sign in.
    Signup {
        /// Display name for the new account.
        #[arg(long)]
        name: String,

        /// Account email.
        #[arg(long)]
        email: String,

        /// Password (prompted when omitted).
        #[arg(long, env = "CHATDOC_PASSWORD")]
        password: Option<String>,
    },

    /// Sign in to an existing account.
    Login {
        /// Account email.
        #[arg(long)]
        email: String,

        /// Password (prompted when omitted).
        #[arg(long, env = "CHATDOC_PASSWORD")]
        password: Option<String>,
    },

    /// Sign out and clear local session state.
    Logout,

    /// Show the current session.
    Whoami,

    /// Upload a PDF and wait for it to be indexed.
    Upload {
        /// Path to the PDF file.
        file: PathBuf,

        /// Skip the automatic hand-off into the chat loop.
        #[arg(long)]
        no_chat: bool,
    },

    /// List previously uploaded documents.
    List,

    /// Show one document's details.
    Info {
        /// Document identifier.
        uuid: String,
    },

    /// Delete a document. Irreversible.
    Delete {
        /// Document identifier.
        uuid: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Open a conversation with an indexed document.
    Chat {
        /// Document identifier.
        uuid: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = format!(
        "chatdoc_shared={level},chatdoc_store={level},chatdoc_client={level},\
         chatdoc_session={level},chatdoc_core={level},chatdoc_cli={level}"
    );

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Signup {
            name,
            email,
            password,
        } => cmd_signup(&name, &email, password).await,
        Command::Login { email, password } => cmd_login(&email, password).await,
        Command::Logout => cmd_logout().await,
        Command::Whoami => cmd_whoami().await,
        Command::Upload { file, no_chat } => cmd_upload(&file, no_chat).await,
        Command::List => cmd_list().await,
        Command::Info { uuid } => cmd_info(&uuid).await,
        Command::Delete { uuid, yes } => cmd_delete(&uuid, yes).await,
        Command::Chat { uuid } => cmd_chat(&uuid).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// App context
// ---------------------------------------------------------------------------

/// Shared handles the commands operate on.
struct AppContext {
    config: AppConfig,
    store: Store,
    client: ApiClient,
}

impl AppContext {
    async fn init() -> Result<Self> {
        let config = load_config()?;
        let client = ApiClient::new(
            &config.backend.base_url,
            Duration::from_secs(config.backend.request_timeout_secs),
        )?;
        let db_path = data_dir(&config)?.join("chatdoc.db");
        let store = Store::open(&db_path).await?;
        Ok(Self {
            config,
            store,
            client,
        })
    }

    /// Reconcile the persisted session, failing with a hint when absent.
    async fn require_session(&self) -> Result<Session> {
        let manager = SessionManager::new(&self.store, &self.client);
        manager
            .reconcile()
            .await?
            .ok_or_else(|| eyre!("not signed in — run `chatdoc login` first"))
    }
}

// ---------------------------------------------------------------------------
// Auth commands
// ---------------------------------------------------------------------------

async fn cmd_signup(name: &str, email: &str, password: Option<String>) -> Result<()> {
    let ctx = AppContext::init().await?;
    let password = resolve_password(password)?;

    let outcome = ctx.client.sign_up(name, email, &password).await?;
    let manager = SessionManager::new(&ctx.store, &ctx.client);
    let session = manager.sign_in(outcome.user, outcome.token).await?;

    info!(email, "account created");
    println!("Welcome, {}! You are signed in.", session.user.full_name);
    Ok(())
}

async fn cmd_login(email: &str, password: Option<String>) -> Result<()> {
    let ctx = AppContext::init().await?;
    let password = resolve_password(password)?;

    let outcome = ctx.client.sign_in(email, &password).await?;
    let manager = SessionManager::new(&ctx.store, &ctx.client);
    let session = manager.sign_in(outcome.user, outcome.token).await?;

    println!("Signed in as {} <{}>.", session.user.full_name, session.user.email);
    Ok(())
}

async fn cmd_logout() -> Result<()> {
    let ctx = AppContext::init().await?;
    let manager = SessionManager::new(&ctx.store, &ctx.client);
    manager.sign_out().await?;
    println!("Signed out.");
    Ok(())
}

async fn cmd_whoami() -> Result<()> {
    let ctx = AppContext::init().await?;
    let manager = SessionManager::new(&ctx.store, &ctx.client);

    match manager.reconcile().await? {
        Some(session) => {
            println!("{} <{}>", session.user.full_name, session.user.email);
            println!("  session source: {:?}", session.provenance);
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

fn resolve_password(password: Option<String>) -> Result<String> {
    if let Some(p) = password {
        return Ok(p);
    }
    print!("Password: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(eyre!("password must not be empty"));
    }
    Ok(password)
}

// ---------------------------------------------------------------------------
// Document commands
// ---------------------------------------------------------------------------

async fn cmd_upload(file: &std::path::Path, no_chat: bool) -> Result<()> {
    let ctx = AppContext::init().await?;
    let session = ctx.require_session().await?;

    let mut uploader = Uploader::new(
        &ctx.client,
        session.clone(),
        UploadConfig::from(&ctx.config),
    );
    let mut handoff = uploader
        .take_handoff()
        .ok_or_else(|| eyre!("hand-off channel already taken"))?;

    uploader.select(file)?;
    let candidate = uploader.candidate().expect("validated candidate");
    println!(
        "Uploading {} ({:.2} MB)...",
        candidate.name,
        candidate.size as f64 / (1024.0 * 1024.0)
    );

    run_transmission(&mut uploader, false).await?;

    // Offer retry while transmissions keep failing with a retained payload.
    while uploader.phase() == UploadPhase::Failed {
        let reason = uploader.failure().unwrap_or("upload failed").to_string();
        eprintln!("Upload failed: {reason}");
        if uploader.candidate().is_none() || !confirm("Retry upload?")? {
            return Err(eyre!(reason));
        }
        run_transmission(&mut uploader, true).await?;
    }

    if uploader.phase() == UploadPhase::Indexing {
        println!("Uploaded. The document is still being indexed...");
        uploader.await_indexing().await?;
        if let Some(reason) = uploader.failure() {
            return Err(eyre!(reason.to_string()));
        }
    }

    let document = uploader.document().expect("ready document").clone();
    print_document(&document);
    if let Some(url) = &document.storage_url {
        println!("  download: {url}");
    }
    println!("Your document is indexed and ready for questions.");

    if no_chat {
        return Ok(());
    }

    // The hand-off fires after a short delay so the summary above is
    // readable before the conversation opens.
    let document_id = handoff
        .recv()
        .await
        .ok_or_else(|| eyre!("hand-off channel closed"))?;
    chat_loop(&ctx, session, &document_id).await
}

/// Run one transmission attempt (initial or retry) with a live progress bar.
async fn run_transmission(uploader: &mut Uploader<'_>, retry: bool) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:30.cyan} {pos}% {msg}")
            .expect("static template")
            .progress_chars("=> "),
    );
    let progress = uploader.progress_handle();
    let painter = {
        let bar = bar.clone();
        tokio::spawn(async move {
            loop {
                bar.set_position(progress.load(std::sync::atomic::Ordering::Relaxed) as u64);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    };

    let result = if retry {
        uploader.retry().await
    } else {
        uploader.upload().await
    };
    painter.abort();
    bar.finish_and_clear();
    result?;
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let ctx = AppContext::init().await?;
    let session = ctx.require_session().await?;

    let documents = ctx.client.list_documents(&session.token).await?;
    if documents.is_empty() {
        println!("No documents uploaded yet.");
        return Ok(());
    }

    for doc in &documents {
        println!(
            "{}  {}  {} pages  {}/{} chunks  [{}]",
            doc.uuid,
            doc.name,
            doc.page_count,
            doc.successful_chunks,
            doc.total_chunks,
            doc.indexing_status
        );
    }
    Ok(())
}

async fn cmd_info(uuid: &str) -> Result<()> {
    let ctx = AppContext::init().await?;
    let session = ctx.require_session().await?;

    let document = ctx.client.document_info(&session.token, uuid).await?;
    print_document(&document);
    if let Some(url) = &document.storage_url {
        println!("  download: {url}");
    }
    if let Some(at) = &document.indexed_at {
        println!("  indexed:  {}", at.to_rfc3339());
    }
    Ok(())
}

async fn cmd_delete(uuid: &str, yes: bool) -> Result<()> {
    let ctx = AppContext::init().await?;
    let session = ctx.require_session().await?;

    if !yes && !confirm(&format!("Permanently delete {uuid}?"))? {
        println!("Aborted.");
        return Ok(());
    }

    ctx.client.delete_document(&session.token, uuid).await?;
    println!("Deleted {uuid}.");
    Ok(())
}

fn print_document(doc: &DocumentRecord) {
    println!("  {}", doc.name);
    println!("  id:       {}", doc.uuid);
    println!(
        "  size:     {}",
        doc.size_mb
            .clone()
            .map(|mb| format!("{mb} MB"))
            .unwrap_or_else(|| format!("{} bytes", doc.size))
    );
    println!("  pages:    {}", doc.page_count);
    println!("  chunks:   {}/{}", doc.successful_chunks, doc.total_chunks);
    println!("  status:   {}", doc.indexing_status);
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

async fn cmd_chat(uuid: &str) -> Result<()> {
    let ctx = AppContext::init().await?;
    let session = ctx.require_session().await?;
    chat_loop(&ctx, session, uuid).await
}

async fn chat_loop(ctx: &AppContext, session: Session, document_id: &str) -> Result<()> {
    let mut conversation = Conversation::new(&ctx.client, session);
    conversation.open(document_id).await?;

    if let Some(welcome) = conversation.transcript().first() {
        println!("{}", welcome.content);
    }
    println!("(type your question, or 'exit' to leave)");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break; // stdin closed
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        conversation.send(question).await?;

        if let Some(answer) = conversation.transcript().last() {
            println!("{}", answer.content);
            if let Some(meta) = &answer.metadata {
                let mut parts = Vec::new();
                if let Some(chunks) = meta.context_chunks_used {
                    parts.push(format!("{chunks} chunks used"));
                }
                if let Some(top) = meta.similarity_scores.first() {
                    parts.push(format!("top relevance {:.1}%", top * 100.0));
                }
                if !parts.is_empty() {
                    println!("  ({})", parts.join(", "));
                }
            }
        }
    }

    println!("Bye.");
    Ok(())
}
