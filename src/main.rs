use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xs_auth::{AuthFlowOutcome, Authenticator, StreamingTokens, XalConfig};
use xs_core::{Capabilities, FileKeyValueStore, SettingsFile};
use xs_stream::{ServiceHosts, StreamConfig};
use xstream::{AuthSink, ConsoleSurface, Coordinator};

const SILENT_FLOW_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "status".to_string());

    let settings = SettingsFile::load(SettingsFile::default_path()?)
        .await
        .context("Failed to load settings")?;
    let store = FileKeyValueStore::new(FileKeyValueStore::default_storage_dir()?)
        .await
        .context("Failed to open data store")?;
    let caps = Capabilities::new(Arc::new(settings), Arc::new(store));

    let config = XalConfig::default();
    let sink = Arc::new(AuthSink::new(caps.clone()));
    let surface = Arc::new(ConsoleSurface::stdin());
    let auth = Arc::new(Authenticator::new(caps.clone(), config, sink.clone(), surface.clone()).await?);
    surface.attach(&auth);

    let coordinator = Coordinator::new(
        caps,
        auth,
        StreamConfig::default(),
        ServiceHosts::production()?,
    );
    let tokens = sink.subscribe();

    match command.as_str() {
        "login" => login(&coordinator, tokens).await,
        "status" => status(&coordinator, tokens).await,
        "logout" => {
            coordinator.clear_data().await?;
            println!("Signed out");
            Ok(())
        }
        "titles" => titles(&coordinator, tokens).await,
        "consoles" => consoles(&coordinator, tokens).await,
        other => bail!("Unknown command {other}; expected login, status, logout, titles or consoles"),
    }
}

async fn login(
    coordinator: &Coordinator,
    tokens: watch::Receiver<Option<StreamingTokens>>,
) -> Result<()> {
    if coordinator.check_authentication().await {
        wait_for_tokens(tokens).await?;
    } else {
        match coordinator.login().await? {
            AuthFlowOutcome::Completed(level) => info!("Signed in with {:?} access", level),
            AuthFlowOutcome::Cancelled => bail!("Login cancelled"),
        }
    }

    print_user(coordinator).await;
    Ok(())
}

async fn status(
    coordinator: &Coordinator,
    tokens: watch::Receiver<Option<StreamingTokens>>,
) -> Result<()> {
    if !coordinator.check_authentication().await {
        println!("Not signed in");
        return Ok(());
    }

    let tokens = wait_for_tokens(tokens).await?;
    print_user(coordinator).await;

    let xhome = &tokens.xhome_token;
    println!("xHome market {}", xhome.market());
    for region in xhome.regions() {
        let marker = if region.is_default { "*" } else { " " };
        println!(" {marker} {} {}", region.name, region.base_uri);
    }
    match &tokens.xcloud_token {
        Some(xcloud) => println!("xCloud market {}", xcloud.market()),
        None => println!("No xCloud access"),
    }
    Ok(())
}

async fn titles(
    coordinator: &Coordinator,
    tokens: watch::Receiver<Option<StreamingTokens>>,
) -> Result<()> {
    if !coordinator.check_authentication().await {
        bail!("Not signed in; run `login` first");
    }
    wait_for_tokens(tokens).await?;

    let titles = coordinator.get_titles().await?;
    let products = coordinator.get_game_pass_products(&titles["results"]).await?;
    for product in &products {
        if let Some(name) = product["ProductTitle"].as_str() {
            println!("{name}");
        }
    }
    println!("{} titles", products.len());
    Ok(())
}

async fn consoles(
    coordinator: &Coordinator,
    tokens: watch::Receiver<Option<StreamingTokens>>,
) -> Result<()> {
    if !coordinator.check_authentication().await {
        bail!("Not signed in; run `login` first");
    }
    wait_for_tokens(tokens).await?;

    for console in coordinator.get_consoles().await? {
        println!("{} {} ({}, {})", console.id, console.name, console.console_type, console.power_state);
    }
    Ok(())
}

/// Wait for the background silent flow to report
async fn wait_for_tokens(
    mut tokens: watch::Receiver<Option<StreamingTokens>>,
) -> Result<StreamingTokens> {
    tokio::time::timeout(SILENT_FLOW_TIMEOUT, tokens.changed())
        .await
        .context("Timed out refreshing tokens")?
        .context("Authentication stopped")?;

    let current = tokens.borrow().clone();
    current.context("Session expired; run `login` again")
}

async fn print_user(coordinator: &Coordinator) {
    let state = coordinator.get_auth_state().await;
    match state.user.and_then(|user| user.gamertag) {
        Some(gamertag) => println!("Signed in as {gamertag}"),
        None => println!("Signed in"),
    }
}
