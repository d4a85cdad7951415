use anyhow::{anyhow, Context, Result};
use rabbit_relay::{config, BrokerLink, PublishCoordinator, Settings};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: rabbit_relay publish '<json>' | rabbit_relay health";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let file_config = config::load_config()?;
    let settings = Settings::load(file_config.as_ref())?;

    let link = Arc::new(BrokerLink::lapin(&settings));
    let publisher = PublishCoordinator::new(Arc::clone(&link), &settings);

    let mut args = std::env::args().skip(1);
    let outcome = match args.next().as_deref() {
        Some("publish") => {
            let raw = args.next().ok_or_else(|| anyhow!(USAGE))?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("Payload is not valid JSON")?;
            publish(&publisher, &payload).await
        }
        Some("health") => health(&link).await,
        _ => Err(anyhow!(USAGE)),
    };

    link.close().await;
    outcome
}

async fn publish(publisher: &PublishCoordinator, payload: &serde_json::Value) -> Result<()> {
    let receipt = publisher.publish(payload).await?;
    info!(message_id = %receipt.message_id, attempts = receipt.attempts, "Published");
    println!("{}", serde_json::json!({
        "message_id": receipt.message_id,
        "attempts": receipt.attempts,
    }));
    Ok(())
}

async fn health(link: &BrokerLink) -> Result<()> {
    if link.is_healthy().await {
        println!("healthy");
        Ok(())
    } else {
        Err(anyhow!("RabbitMQ link is unhealthy"))
    }
}
