//! gRPC Mock Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use grpc_mock_server::{MockServerConfig, RpcCall, ServiceRegistry};
use prost_reflect::{DescriptorPool, DynamicMessage};
use std::path::{Path, PathBuf};
use tonic::Status;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "grpc-mock-server",
    about = "Configurable gRPC mock server - matcher-based request stubbing",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Compiled descriptor set, overrides `descriptor_set` from the config
    #[arg(short, long, value_name = "FILE")]
    descriptor_set: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Dispatch one request to a method (e.g. "demo.PlateService/Lookup")
    #[arg(long, value_name = "SERVICE/METHOD")]
    call: Option<String>,

    /// JSON request payload for --call
    #[arg(long, default_value = "{}", requires = "call")]
    data: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no services)");
        MockServerConfig::default()
    };

    // Building the registry checks every matcher table
    let registry = config.build_registry()?;

    if args.validate {
        let methods: usize = config.services.iter().map(|s| s.methods.len()).sum();
        println!(
            "Configuration is valid ({} services, {} methods)",
            config.services.len(),
            methods
        );
        return Ok(());
    }

    let pool = match args.descriptor_set.as_ref().or(config.descriptor_set.as_ref()) {
        Some(path) => Some(load_descriptor_pool(path)?),
        None => None,
    };

    if let Some(pool) = &pool {
        for service in registry.bind_services(pool, &config.service_names())? {
            for method in &service.methods {
                if method.registered {
                    info!(service = %service.name, method = %method.name, "Method mocked");
                } else {
                    info!(
                        service = %service.name,
                        method = %method.name,
                        streaming = method.streaming,
                        "Method unimplemented"
                    );
                }
            }
        }
    }

    if let Some(target) = &args.call {
        let (service, method) = target
            .rsplit_once('/')
            .with_context(|| format!("Expected SERVICE/METHOD, got {:?}", target))?;
        let request: serde_json::Value =
            serde_json::from_str(&args.data).context("Invalid JSON in --data")?;

        let reply = call_method(&registry, pool.as_ref(), service, method, request).await;
        match reply {
            Ok(reply) => println!("{}", serde_json::to_string_pretty(&reply)?),
            Err(status) => {
                anyhow::bail!(
                    "{:?}: {} {}",
                    status.code(),
                    status.message(),
                    String::from_utf8_lossy(status.details())
                );
            }
        }
        return Ok(());
    }

    info!(
        services = config.services.len(),
        bound = pool.is_some(),
        "Registry ready"
    );

    Ok(())
}

fn load_descriptor_pool(path: &Path) -> Result<DescriptorPool> {
    info!(path = %path.display(), "Loading descriptor set");
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read descriptor set {}", path.display()))?;
    DescriptorPool::decode(bytes.as_slice())
        .with_context(|| format!("Invalid descriptor set {}", path.display()))
}

/// Dispatch one request, through the protobuf types when they are known.
async fn call_method(
    registry: &ServiceRegistry,
    pool: Option<&DescriptorPool>,
    service: &str,
    method: &str,
    request: serde_json::Value,
) -> Result<serde_json::Value, Status> {
    let descriptor = pool
        .and_then(|pool| pool.get_service_by_name(service))
        .and_then(|svc| svc.methods().find(|m| m.name() == method));

    let Some(descriptor) = descriptor else {
        if pool.is_some() {
            warn!(service = %service, method = %method, "Method not found in descriptor set");
        }
        return registry
            .dispatch(&RpcCall::new(service, method, request))
            .await;
    };

    let message = DynamicMessage::deserialize(descriptor.input(), request)
        .map_err(|e| Status::invalid_argument(format!("Invalid request: {}", e)))?;
    let reply = registry.invoke(&descriptor, &message).await?;
    serde_json::to_value(&reply).map_err(|e| Status::internal(e.to_string()))
}
