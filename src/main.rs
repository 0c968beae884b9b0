use anyhow::{Context, Result};
use modelchat::cli;
use modelchat::config::{ConfigLoader, MODEL_ENV};
use modelchat::credentials::EnvCredentials;
use modelchat::factory::ClientInitializer;
use modelchat::logging;
use modelchat::session::ChatSession;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    println!("========================================");
    println!("  modelchat (v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");

    let loader = ConfigLoader::from_env()?;
    println!("[Config] Models: {}", loader.location());

    let model_id = std::env::var(MODEL_ENV)
        .ok()
        .filter(|id| !id.trim().is_empty());

    let mut interrupts = cli::spawn_interrupt_listener();

    println!("[Init] Initializing API client...");
    let client = cli::initialize_client(
        &ClientInitializer::default(),
        &loader,
        &EnvCredentials,
        model_id.as_deref(),
        &mut interrupts,
    )
    .await
    .context("Initialization error")?;
    println!(
        "[Init] Model: {} ({}, {})",
        client.model_id(),
        client.settings().name,
        client.provider().name()
    );

    cli::run_chat_loop(
        ChatSession::with_client(client),
        &loader,
        &EnvCredentials,
        interrupts,
    )
    .await;
    Ok(())
}
