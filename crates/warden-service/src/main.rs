//! Warden service entrypoint
//!
//! Starts the AuthPolicy reconciler and the ext_authz gRPC server
//! against one shared host-keyed config store.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use warden_auth::{AuthMetrics, ConfigStore, Pipeline};
use warden_common::telemetry::{init_telemetry, TelemetryConfig};
use warden_service::controller::{run_controller, Context};
use warden_service::server::AuthzServer;
use warden_service::Settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::parse();

    init_telemetry(TelemetryConfig {
        service_name: "warden".to_string(),
        pretty: settings.pretty_logs,
    })?;

    let client = kube::Client::try_default().await?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let store = Arc::new(ConfigStore::new());
    let metrics = Arc::new(AuthMetrics::new());
    let pipeline =
        Arc::new(Pipeline::new(metrics.clone()).with_timeout(settings.evaluator_timeout()));

    let context = Arc::new(Context {
        client,
        store: store.clone(),
        settings: settings.clone(),
        http,
    });

    let server = AuthzServer::new(store, pipeline, settings.grpc_addr);

    info!(addr = %settings.grpc_addr, "Warden starting");

    tokio::select! {
        result = run_controller(context) => {
            result?;
            info!("AuthPolicy controller stopped");
        }
        result = server.run() => {
            result?;
            info!("ext_authz server stopped");
        }
    }

    Ok(())
}
