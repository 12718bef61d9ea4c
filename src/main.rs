//! Commentbus CLI entry point

mod cli;

use crate::cli::{BrokerArgs, Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use commentbus::auth::{CredentialIssuer, SecretKey};
use commentbus::gateway::{GatewayConfig, PublishGateway};
use commentbus::server::{run_bridge_server, BridgeConfig, BridgeState};
use commentbus_client::{
    Channel, HttpTokenSource, Item, PublishClient, PublishConfig, SessionConfig, SubscriptionSession,
    TopicView,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let channel = Channel::parse(&cli.channel)
        .with_context(|| format!("Invalid channel: {}", cli.channel))?;

    match cli.command {
        Commands::Serve { bind, broker, dangerous_plaintext } => {
            serve(channel, bind, broker, dangerous_plaintext).await
        }
        Commands::Token { broker } => token(channel, broker),
        Commands::Publish { content, author, url } => publish(content, author, url).await,
        Commands::Tail { url, await_ack, reconnect, dangerous_plaintext } => {
            tail(channel, url, await_ack, reconnect, dangerous_plaintext).await
        }
    }
}

fn build_issuer(broker: &BrokerArgs) -> Result<CredentialIssuer> {
    CredentialIssuer::new(SecretKey::new(broker.api_key.clone()), broker.http_host.clone())
        .context("Invalid broker configuration")
}

async fn serve(channel: Channel, bind: String, broker: BrokerArgs, dangerous_plaintext: bool) -> Result<()> {
    let issuer = Arc::new(build_issuer(&broker)?);

    let config = BridgeConfig {
        bind_addr: bind.parse().context("Invalid bind address")?,
        realtime_host: broker.realtime_host,
        channel,
    };

    let mut gateway_config = GatewayConfig::new(config.channel.clone());
    if dangerous_plaintext {
        warn!("Ingress requests will use plain HTTP");
        gateway_config = gateway_config.dangerous_plaintext();
    }

    let gateway =
        PublishGateway::new(issuer.clone(), gateway_config).context("Failed to build publish gateway")?;
    let state = BridgeState::new(issuer, gateway, config.realtime_host.clone());

    info!(channel = %config.channel, http_host = %broker.http_host, "Starting commentbus bridge...");
    run_bridge_server(config.bind_addr, state, shutdown_signal()).await?;

    info!("Commentbus bridge stopped");
    Ok(())
}

fn token(channel: Channel, broker: BrokerArgs) -> Result<()> {
    let issuer = build_issuer(&broker)?;
    let grant = issuer.grant(&channel, &broker.realtime_host);

    println!("{}", serde_json::to_string_pretty(&grant)?);
    Ok(())
}

async fn publish(content: String, author: String, url: String) -> Result<()> {
    let client = PublishClient::new(PublishConfig::new(url)).context("Failed to build HTTP client")?;

    // No view to derive the next id from, so use the clock
    let id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let item = Item::new(id, author, content, "Just now");

    client
        .publish(&item)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    println!("Published comment {}", item.id);
    Ok(())
}

async fn tail(
    channel: Channel,
    url: String,
    await_ack: bool,
    reconnect: bool,
    dangerous_plaintext: bool,
) -> Result<()> {
    let tokens = Arc::new(HttpTokenSource::new(url).context("Failed to build HTTP client")?);

    let mut config = SessionConfig::new(channel);
    if await_ack {
        config = config.await_connection_ack();
    }
    if reconnect {
        config = config.auto_reconnect(Duration::from_secs(1), Duration::from_secs(30), 5);
    }
    if dangerous_plaintext {
        config = config.dangerous_plaintext();
    }

    let session = SubscriptionSession::new(config, tokens);
    let mut stream = session.open().await.context("Failed to subscribe")?;
    let mut view = TopicView::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            next = stream.next_item() => match next {
                Some(Ok(item)) => {
                    if view.apply(item.clone()) {
                        println!("[{}] {}: {}", item.id, item.author, item.content);
                    }
                }
                Some(Err(e)) => break Err(anyhow::Error::new(e).context("Subscription failed")),
                None => break Ok(()),
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, closing subscription");
                break Ok(());
            }
        }
    };

    session.close().await?;
    info!(received = view.len(), "Subscription closed");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
