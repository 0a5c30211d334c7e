use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use prompt_relay::{
    cache::ResponseCache,
    client::{ChatSession, ClientError, CompletionClient, DEFAULT_MODEL},
    model::TaskKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Token of the prompt currently streaming, if any.
type InFlight = Arc<Mutex<Option<CancellationToken>>>;

/// Sends prompts to a running prompt-relay server and prints the answer as it streams in.
#[derive(Parser, Debug)]
#[command(name = "prompt-cli", version)]
struct Args {
    /// Base URL of the relay server.
    #[arg(long, env = "PROMPT_RELAY_URL", default_value = "http://127.0.0.1:3000")]
    server: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, value_enum, default_value_t = TaskKind::Explain)]
    task: TaskKind,

    /// Serve repeated prompts from memory for this many seconds.
    #[arg(long)]
    cache_ttl: Option<u64>,

    #[arg(long, default_value_t = 64)]
    cache_capacity: usize,

    /// Prompt to send. Without one, prompts are read from stdin, one per line.
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let client = CompletionClient::new(&args.server);
    debug!(endpoint = client.endpoint(), "using relay");
    let mut session = ChatSession::new(client);
    if let Some(ttl) = args.cache_ttl {
        let cache = ResponseCache::new(Duration::from_secs(ttl), args.cache_capacity);
        debug!(
            ttl_secs = cache.ttl().as_secs(),
            capacity = cache.capacity(),
            "response cache enabled"
        );
        session = session.with_cache(cache);
    }

    // One listener for the whole process: Ctrl-C cancels the prompt in
    // flight, or stops the REPL when idle.
    let in_flight: InFlight = Arc::default();
    let idle_interrupt = CancellationToken::new();
    tokio::spawn({
        let in_flight = in_flight.clone();
        let idle_interrupt = idle_interrupt.clone();
        async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupt(&in_flight, &idle_interrupt);
            }
        }
    });

    let one_shot = args.prompt.join(" ");
    if !one_shot.trim().is_empty() {
        ask(&mut session, &one_shot, &args, &in_flight).await?;
        return Ok(());
    }

    eprintln!("🎯 {} / {}: one prompt per line, Ctrl-D or Ctrl-C to quit", args.model, args.task);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;
    loop {
        let line = tokio::select! {
            _ = idle_interrupt.cancelled() => {
                interrupted = true;
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = ask(&mut session, &line, &args, &in_flight).await {
            eprintln!("❌ {err:#}");
        }
    }

    print_history(&session);

    if interrupted {
        // The blocking stdin read cannot be cancelled, so runtime shutdown
        // would wait for the next line.
        std::process::exit(130);
    }
    Ok(())
}

fn interrupt(in_flight: &InFlight, idle_interrupt: &CancellationToken) {
    let current = in_flight.lock().ok().and_then(|slot| slot.clone());
    match current {
        Some(cancel) => cancel.cancel(),
        None => idle_interrupt.cancel(),
    }
}

/// Writes the part of `text` not printed yet.
fn write_delta<W: Write>(out: &mut W, text: &str, printed: &mut usize) -> std::io::Result<()> {
    out.write_all(text[*printed..].as_bytes())?;
    out.flush()?;
    *printed = text.len();
    Ok(())
}

fn print_history(session: &ChatSession) {
    if session.history().is_empty() {
        return;
    }
    eprintln!("\n📜 History:");
    for (i, entry) in session.history().iter().enumerate() {
        let origin = if entry.cached { " (cached)" } else { "" };
        eprintln!(
            "{}. [{} / {}]{origin} {}\n   {}",
            i + 1,
            entry.model,
            entry.task,
            entry.prompt,
            entry.response
        );
    }
}

async fn ask(session: &mut ChatSession, input: &str, args: &Args, in_flight: &InFlight) -> Result<()> {
    let cancel = CancellationToken::new();
    if let Ok(mut slot) = in_flight.lock() {
        *slot = Some(cancel.clone());
    }

    let mut printed = 0usize;
    let mut write_error: Option<std::io::Error> = None;
    let result = session
        .submit_with_cancel(input, &args.model, args.task, &cancel, |text| {
            if write_error.is_some() {
                return;
            }
            if let Err(err) = write_delta(&mut std::io::stdout().lock(), text, &mut printed) {
                write_error = Some(err);
                cancel.cancel();
            }
        })
        .await;

    if let Ok(mut slot) = in_flight.lock() {
        *slot = None;
    }

    if let Some(err) = write_error {
        return Err(anyhow::Error::new(err).context("failed to write response to stdout"));
    }
    println!();

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_rate_limited() => {
            anyhow::bail!("rate limit reached, try another model or wait: {err}")
        }
        Err(ClientError::Incomplete { reason, .. }) => {
            anyhow::bail!("⚠️ incomplete response ({reason})")
        }
        Err(err) => Err(err.into()),
    }
}
