use anyhow::Result;
use mocks_server::config::{ConfigError, ConfigSources, FileSource};
use mocks_server::loader::load_definitions;
use mocks_server::logger::filter_directive;
use mocks_server::{Core, CoreError, MockServer};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

const CONFIG_FILE: &str = "mocks.config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let core = Arc::new(
        Core::builder()
            .with_sources(ConfigSources::from_process().with_file(FileSource::new(CONFIG_FILE)))
            .build()?,
    );

    match core.init(Value::Null).await {
        Err(CoreError::Config(ConfigError::DisplayHelp(help))) => {
            println!("{}", help);
            return Ok(());
        }
        other => other?,
    }

    let apply_level = move |level: &str| {
        if let Err(e) = filter_handle.reload(EnvFilter::new(filter_directive(level))) {
            eprintln!("Failed to change log level: {}", e);
        }
    };
    apply_level(&core.log_level());
    core.config().on_change("log", move |value| {
        if let Some(level) = value.as_str() {
            apply_level(level);
        }
    })?;

    core.start(Value::Null).await?;

    if let Some(path) = core.definitions_file() {
        match load_definitions(&path).await {
            Ok(definitions) => {
                if let Err(e) = core.mock().reload(definitions).await {
                    error!("{}", e);
                }
            }
            Err(e) => warn!("{:#}", e),
        }
    }

    let server = MockServer::bind(Arc::clone(&core)).await?;
    let server_task = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown requested");
    core.stop().await;
    server_task.await?;
    Ok(())
}
