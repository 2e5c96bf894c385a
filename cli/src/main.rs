use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use jobchat_core::backend::{
    ChatBackend, HttpBackend, RandomFaults, SendMessageRequest, SimulatedBackend, with_timeout,
};
use jobchat_core::{AppAction, AppState, ChatApp, ChatSummary, now_millis};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "jobchat")]
#[command(about = "Homeowner/trader conversation sync CLI")]
struct Cli {
    /// State directory (config and cache live here)
    #[arg(long, default_value = ".jobchat")]
    state_dir: PathBuf,

    /// Conversation API base URL
    #[arg(long, env = "JOBCHAT_API_URL")]
    api: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the job_7 conversation and send "Hello" on the in-memory backend
    Demo {
        /// Simulated latency per backend call
        #[arg(long, default_value_t = 150)]
        latency_ms: u64,

        /// Probability (0..1) that a simulated call fails
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
    },

    /// Fetch and classify the chat list for a user
    Chats {
        /// Bearer token
        #[arg(long, env = "JOBCHAT_TOKEN")]
        token: String,

        /// Viewing user id
        #[arg(long)]
        user: String,
    },

    /// Send one message to a conversation
    Send {
        #[arg(long)]
        conversation: String,

        #[arg(long)]
        sender: String,

        #[arg(long)]
        body: String,
    },

    /// Poll a conversation and print new messages (runs until interrupted or --timeout)
    Watch {
        #[arg(long)]
        conversation: String,

        #[arg(long, default_value_t = 3_000)]
        interval_ms: u64,

        /// Timeout in seconds (0 = run forever)
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("create state dir {}", cli.state_dir.display()))?;

    match &cli.cmd {
        Command::Demo {
            latency_ms,
            failure_rate,
        } => cmd_demo(&cli, *latency_ms, *failure_rate).await,
        Command::Chats { token, user } => cmd_chats(&cli, token, user).await,
        Command::Send {
            conversation,
            sender,
            body,
        } => cmd_send(&cli, conversation, sender, body).await,
        Command::Watch {
            conversation,
            interval_ms,
            timeout,
        } => cmd_watch(&cli, conversation, *interval_ms, *timeout).await,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn http_backend(cli: &Cli) -> anyhow::Result<HttpBackend> {
    let api = cli
        .api
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("--api (or JOBCHAT_API_URL) is required for this command"))?;
    Ok(HttpBackend::new(api))
}

fn request_timeout(cli: &Cli) -> Duration {
    Duration::from_millis(cli.timeout_ms.max(1))
}

fn print(v: serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(&v).expect("json encode"));
}

fn summaries(list: &[ChatSummary]) -> Vec<serde_json::Value> {
    list.iter()
        .map(|c| {
            json!({
                "conversation_id": c.conversation_id,
                "job_id": c.job_id,
                "counterparty_id": c.counterparty_id,
                "counterparty_name": c.counterparty_name,
                "last_message": c.last_message,
                "last_activity": c.activity_at(),
                "unread": c.unread_count,
                "closed": c.status.is_closed(),
            })
        })
        .collect()
}

/// Poll the app snapshot until `f` yields a value; a recorded error ends the wait.
async fn wait_for<T>(
    app: &ChatApp,
    what: &str,
    f: impl Fn(&AppState) -> Option<T>,
) -> anyhow::Result<T> {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let state = app.state();
        if let Some(v) = f(&state) {
            return Ok(v);
        }
        if let Some(err) = state.error {
            bail!("{what}: {}", err.message);
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// ── Commands ────────────────────────────────────────────────────────────────

async fn cmd_demo(cli: &Cli, latency_ms: u64, failure_rate: f64) -> anyhow::Result<()> {
    let mut backend = SimulatedBackend::new().with_latency(Duration::from_millis(latency_ms));
    if failure_rate > 0.0 {
        backend = backend.with_faults(Arc::new(RandomFaults::new(failure_rate)));
    }
    let app = ChatApp::with_backend(
        cli.state_dir.to_string_lossy().into_owned(),
        Arc::new(backend),
    );

    app.dispatch(AppAction::CreateConversation {
        job_id: "job_7".into(),
        homeowner_id: "home_1".into(),
        trader_id: "trade_9".into(),
    });
    let chat = wait_for(&app, "conversation", |s| s.current_chat.clone()).await?;

    app.dispatch(AppAction::SendMessage {
        conversation_id: chat.conversation.id.clone(),
        sender_id: "home_1".into(),
        body: "Hello".into(),
        attachments: vec![],
    });
    let pending = wait_for(&app, "pending message", |s| {
        s.current_chat.as_ref().and_then(|c| c.messages.first().cloned())
    })
    .await?;
    let confirmed = wait_for(&app, "confirmed message", |s| {
        s.current_chat
            .as_ref()
            .and_then(|c| c.messages.iter().find(|m| !m.pending).cloned())
    })
    .await?;

    print(json!({
        "conversation": chat.conversation,
        "first_seen_pending": pending.pending,
        "message": confirmed,
    }));
    Ok(())
}

async fn cmd_chats(cli: &Cli, token: &str, user: &str) -> anyhow::Result<()> {
    let backend = http_backend(cli)?;
    let timeout = request_timeout(cli);
    let (conversations, unread, completed) = tokio::join!(
        with_timeout(timeout, backend.list_conversations(token)),
        with_timeout(timeout, backend.unread_summary(token)),
        with_timeout(timeout, backend.completed_jobs(token)),
    );
    let list = jobchat_core::chat_list::aggregate(
        user,
        &conversations.context("list conversations")?,
        &unread.context("unread summary")?,
        &completed.context("completed jobs")?,
        now_millis(),
    );
    print(json!({
        "active": summaries(&list.active),
        "past": summaries(&list.past),
        "total_unread": list.total_unread(),
    }));
    Ok(())
}

async fn cmd_send(cli: &Cli, conversation: &str, sender: &str, body: &str) -> anyhow::Result<()> {
    if body.trim().is_empty() {
        bail!("message body must not be empty");
    }
    let backend = http_backend(cli)?;
    let req = SendMessageRequest {
        conversation_id: conversation.to_string(),
        message_id: uuid::Uuid::new_v4().to_string(),
        sender_id: sender.to_string(),
        body: body.to_string(),
        attachment_refs: vec![],
    };
    let ack = with_timeout(request_timeout(cli), backend.send_message(req))
        .await
        .context("send message")?;
    print(json!({
        "message_id": ack.message_id,
        "created_at": ack.created_at,
    }));
    Ok(())
}

async fn cmd_watch(
    cli: &Cli,
    conversation: &str,
    interval_ms: u64,
    timeout_sec: u64,
) -> anyhow::Result<()> {
    let backend = http_backend(cli)?;
    let deadline = (timeout_sec > 0).then(|| Instant::now() + Duration::from_secs(timeout_sec));
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut seen: HashSet<String> = HashSet::new();

    loop {
        ticker.tick().await;
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }
        match with_timeout(request_timeout(cli), backend.list_messages(conversation)).await {
            Ok(messages) => {
                for m in messages {
                    if seen.insert(m.id.clone()) {
                        println!(
                            "{}",
                            json!({
                                "id": m.id,
                                "sender_id": m.sender_id,
                                "body": m.body,
                                "created_at": m.created_at,
                            })
                        );
                    }
                }
            }
            Err(e) => tracing::warn!(err = %e, "poll failed"),
        }
    }
}
