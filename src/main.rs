use anyhow::Context;
use tracing::{error, info};

use hubcast::config::load_config;
use hubcast::hub::Hub;
use hubcast::transport::websocket::{OriginPolicy, start_websocket_server};
use hubcast::utils::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = load_config().context("failed to load configuration")?;
    logging::init(&settings.log.level);

    let hub = Hub::new(settings.hub.to_hub_config()?)?;
    let runner = hub.clone();
    let hub_task = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!(error = %e, "Hub event loop failed");
        }
    });

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let origins = OriginPolicy::from_origins(settings.server.allowed_origins);
    tokio::select! {
        res = start_websocket_server(&addr, hub.clone(), origins) => {
            res.with_context(|| format!("server on {addr} stopped"))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    hub.shutdown();
    let _ = hub_task.await;
    info!("Hub stopped");
    Ok(())
}
