//! Terminal chat loop.
//!
//! Stdin is read on its own OS thread and handed over line by line, so the
//! loop never leaves a runtime worker blocked on the terminal. Ctrl-C arrives
//! as a stream of interrupts:
//! - at the prompt it exits
//! - while a reply is streaming it abandons that reply only (the partial
//!   text stays in the history)
//! - during `/models` or `/model <id>` it abandons the command
//! - during start-up it ends the initializer's [`Liveness`]

use std::io::{BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ConfigLoader;
use crate::credentials::CredentialSource;
use crate::error::InitError;
use crate::factory::{create_client, ClientInitializer};
use crate::llm::{ChatClient, ChunkSink, Liveness};
use crate::session::{ChatSession, SendOutcome};

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Quit,
    Clear,
    Models,
    /// `/model` with no id: show the active model
    CurrentModel,
    SwitchModel(&'a str),
    Message(&'a str),
}

impl<'a> Command<'a> {
    /// Parse already-trimmed, non-empty input.
    pub fn parse(input: &'a str) -> Self {
        match input.to_lowercase().as_str() {
            "quit" | "exit" | "/quit" | "/exit" => return Command::Quit,
            "/clear" | "clear" => return Command::Clear,
            "/models" => return Command::Models,
            _ => {}
        }
        match input.strip_prefix("/model") {
            Some("") => Command::CurrentModel,
            Some(rest) if rest.starts_with(char::is_whitespace) => {
                Command::SwitchModel(rest.trim())
            }
            _ => Command::Message(input),
        }
    }
}

/// Prints reply text as it streams in.
struct TerminalSink;

impl ChunkSink for TerminalSink {
    fn on_chunk(&mut self, text: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn on_error(&mut self, _message: String) {}
}

fn prompt(label: &str) {
    print!("{}", label);
    let _ = std::io::stdout().flush();
}

/// Forward every Ctrl-C as one message. The channel closes if the signal
/// handler cannot be installed.
pub fn spawn_interrupt_listener() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Read stdin lines on a dedicated thread. The thread is detached, so a read
/// still pending at exit does not hold the process open.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to read input");
                    break;
                }
            }
        }
    });
    rx
}

/// Run the start-up initializer. An interrupt ends its liveness, so it stops
/// at the next attempt boundary with [`InitError::Abandoned`].
pub async fn initialize_client(
    initializer: &ClientInitializer,
    loader: &ConfigLoader,
    credentials: &dyn CredentialSource,
    model_id: Option<&str>,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Result<ChatClient, InitError> {
    let liveness = Liveness::new();
    let init = initializer.initialize(loader, credentials, model_id, &liveness);
    tokio::pin!(init);

    tokio::select! {
        result = &mut init => return result,
        Some(()) = interrupts.recv() => {}
    }

    debug!("interrupted during initialization");
    liveness.end();
    init.await
}

pub async fn run_chat_loop(
    session: ChatSession,
    loader: &ConfigLoader,
    credentials: &dyn CredentialSource,
    interrupts: mpsc::UnboundedReceiver<()>,
) {
    println!(
        "Type your message. Type quit or exit to leave, /clear to reset, \
         /models to list models, /model <id> to switch."
    );
    drive(session, loader, credentials, spawn_stdin_reader(), interrupts).await;
}

enum Step {
    Continue,
    Quit,
}

/// The prompt loop over any line source. Returns the session once input
/// ends, the user quits, or an interrupt arrives at the prompt.
async fn drive(
    mut session: ChatSession,
    loader: &ConfigLoader,
    credentials: &dyn CredentialSource,
    mut lines: mpsc::Receiver<String>,
    mut interrupts: mpsc::UnboundedReceiver<()>,
) -> ChatSession {
    loop {
        prompt("You > ");
        let line = tokio::select! {
            line = lines.recv() => line,
            Some(()) = interrupts.recv() => {
                println!("\nGoodbye!");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let step = tokio::select! {
            step = execute(Command::parse(input), &mut session, loader, credentials) => step,
            Some(()) = interrupts.recv() => {
                println!("\n[Interrupted]\n");
                Step::Continue
            }
        };
        if let Step::Quit = step {
            break;
        }
    }

    session
}

async fn execute(
    command: Command<'_>,
    session: &mut ChatSession,
    loader: &ConfigLoader,
    credentials: &dyn CredentialSource,
) -> Step {
    match command {
        Command::Quit => {
            println!("Goodbye!");
            return Step::Quit;
        }
        Command::Clear => {
            session.clear();
            println!("[Cleared]");
        }
        Command::Models => {
            let active = session.client().map(|c| c.model_id().to_string());
            for id in loader.available_model_ids().await {
                let marker = if active.as_deref() == Some(id.as_str()) { "*" } else { " " };
                println!(" {} {}", marker, id);
            }
        }
        Command::CurrentModel => match session.client() {
            Some(client) => println!(
                "[Model: {} ({}, {})]",
                client.model_id(),
                client.settings().name,
                client.provider().name()
            ),
            None => println!("[No model selected]"),
        },
        Command::SwitchModel(id) => match create_client(loader, credentials, Some(id)).await {
            Ok(client) => {
                println!("[Model: {} ({})]", client.model_id(), client.provider().name());
                session.set_client(client);
            }
            Err(e) => println!("[Error: {}]", e),
        },
        Command::Message(text) => {
            prompt("\nAssistant > ");
            match session.send_message_with(text, None, &mut TerminalSink).await {
                SendOutcome::Completed => println!("\n"),
                SendOutcome::Failed | SendOutcome::ClientUnavailable => {
                    println!("\n[Error: {}]\n", session.error().unwrap_or("unknown error"))
                }
                SendOutcome::Busy => println!("\n[Still answering the previous message]\n"),
            }
        }
    }
    Step::Continue
}
