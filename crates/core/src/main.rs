use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use attune_core::config::EngineCfg;
use attune_core::io::input::InputSender;
use attune_core::io::output::OutputReceiver;
use attune_core::runtime::Engine;
use attune_core::store::{
    ConversationStore, FallbackStore, JsonlConversationStore, JsonlFallbackStore,
    MemoryConversationStore, MemoryFallbackStore,
};
use attune_core::types::InboundMessage;
use attune_llm::LlmProvider;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const REPL_PLATFORM: &str = "repl";
const REPL_CHANNEL: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing: write to a file when RUST_LOG is set (the REPL owns stdout).
    if std::env::var("RUST_LOG").is_ok() {
        let path = std::env::var("ATTUNE_LOG_FILE").unwrap_or_else(|_| "/tmp/attune.log".into());
        let file = std::fs::File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    let cfg_path = std::env::var("ATTUNE_CONFIG").unwrap_or_else(|_| "attune.json".into());
    let cfg = EngineCfg::load(std::path::Path::new(&cfg_path))?;

    let mut startup_notice: Option<String> = None;
    let (store, fallback): (Arc<dyn ConversationStore>, Arc<dyn FallbackStore>) =
        if std::env::var("ATTUNE_EPHEMERAL").is_ok() {
            startup_notice =
                Some("ephemeral mode: conversation logs will not be persisted".to_string());
            (Arc::new(MemoryConversationStore::new()), Arc::new(MemoryFallbackStore::new()))
        } else {
            let root = PathBuf::from(&cfg.data_dir);
            (
                Arc::new(JsonlConversationStore::new(root.join("conversations"))),
                Arc::new(JsonlFallbackStore::new(root.join("fallback"))),
            )
        };

    let provider = attune_llm::http::from_env();
    let model_line = match &provider {
        Some(p) => format!("model {} via {}", p.model(), p.name()),
        None => "no model (set ATTUNE_LLM_MODEL and ATTUNE_LLM_API_KEY); messages are \
                 gated and cached but never answered"
            .to_string(),
    };
    let llm: Option<Arc<dyn LlmProvider>> = provider.map(|p| Arc::new(p) as _);

    let self_name = cfg.self_name.clone();
    let (mut engine, input_tx, output_rx) = Engine::new(cfg, llm, store, fallback);
    let token = engine.token();
    spawn_sigint_canceler(token.clone());

    let repl_token = token.clone();
    let engine_fut = engine.run();
    let repl_fut = run_repl(input_tx, output_rx, repl_token, self_name, model_line, startup_notice);
    tokio::pin!(engine_fut);
    tokio::pin!(repl_fut);

    tokio::select! {
        _ = &mut engine_fut => {
            token.cancel();
            (&mut repl_fut).await
        }
        result = &mut repl_fut => {
            token.cancel();
            (&mut engine_fut).await;
            result
        }
    }
}

async fn run_repl(
    input_tx: InputSender,
    mut output_rx: OutputReceiver,
    token: CancellationToken,
    self_name: String,
    model_line: String,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    // Clear screen so cargo build output is not visible.
    print!("\x1b[2J\x1b[3J\x1b[H");
    io::stdout().flush()?;

    println!("attune on {REPL_PLATFORM}:{REPL_CHANNEL} ({model_line})");
    println!("/user <id> switches speaker, /mention <text> addresses {self_name} directly, /q quits");
    if let Some(notice) = startup_notice {
        println!("{notice}");
    }

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<String>();
    spawn_input_thread(line_tx, ready_rx);

    let mut user = String::from("u1");
    request_next_prompt(&ready_tx, &user);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                break;
            }
            line = line_rx.recv() => {
                let Some(event) = line else {
                    break;
                };
                match event {
                    InputEvent::Line(line) => {
                        let text = line.trim();
                        if text.is_empty() {
                            request_next_prompt(&ready_tx, &user);
                            continue;
                        }
                        if matches!(text, "/q" | "/exit" | "/quit") {
                            break;
                        }
                        if let Some(id) = text.strip_prefix("/user ") {
                            let id = id.trim();
                            if id.is_empty() {
                                println!("usage: /user <id>");
                            } else {
                                user = id.to_owned();
                            }
                            request_next_prompt(&ready_tx, &user);
                            continue;
                        }
                        let (content, mentions) = match text.strip_prefix("/mention ") {
                            Some(rest) => (rest.trim(), true),
                            None => (text, false),
                        };
                        if content.is_empty() {
                            println!("usage: /mention <text>");
                            request_next_prompt(&ready_tx, &user);
                            continue;
                        }
                        let mut msg = InboundMessage::text(
                            REPL_PLATFORM,
                            REPL_CHANNEL,
                            user.as_str(),
                            user.as_str(),
                            content,
                        );
                        msg.mentions_self = mentions;
                        if input_tx.send(msg).await.is_err() {
                            break;
                        }
                        request_next_prompt(&ready_tx, &user);
                    }
                    InputEvent::Interrupted => {
                        token.cancel();
                        break;
                    }
                    InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                }
            }
            msg = output_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                // Clear the pending readline prompt before printing.
                print!("\r\x1b[2K");
                println!("{self_name}: {}", msg.content);
                io::stdout().flush()?;
            }
        }
    }
    drop(ready_tx);
    println!();
    Ok(())
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<String>, user: &str) {
    let _ = ready_tx.send(format!("{user}> "));
}

fn spawn_input_thread(
    line_tx: mpsc::UnboundedSender<InputEvent>,
    ready_rx: std::sync::mpsc::Receiver<String>,
) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while let Ok(prompt) = ready_rx.recv() {
            match editor.readline(&prompt) {
                Ok(line) => {
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}

fn spawn_sigint_canceler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            if let Ok(mut sigint) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            {
                let _ = sigint.recv().await;
                token.cancel();
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        }
    });
}
