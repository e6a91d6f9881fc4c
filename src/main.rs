//! Mockswitch - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mockswitch::registry::LoadState;
use mockswitch::{MockDecision, MockRegistry, MockState, MockSwitchConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mockswitch",
    about = "Load a mock catalog and show how request paths would be routed",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mockswitch.yaml")]
    config: PathBuf,

    /// Catalog access key (overrides the configuration file)
    #[arg(long, env = "MOCKSWITCH_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    /// Enable every mock in this group before resolving
    #[arg(short, long)]
    group: Option<String>,

    /// Mock state to apply (enabled, disabled, mocks_only)
    #[arg(long)]
    mock_state: Option<MockState>,

    /// Response delay requested from the mock server (ms)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Request paths to resolve (e.g. /api/dashboard)
    paths: Vec<String>,
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

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    }
    info!(path = ?args.config, "Loading configuration");
    let mut config = MockSwitchConfig::from_file(&args.config)?;

    // Validate and exit if requested
    if args.validate {
        println!(
            "Configuration is valid (collection {})",
            config.catalog.collection_id
        );
        return Ok(());
    }

    if let Some(key) = args.access_key {
        config.catalog.access_key = key;
    }
    let timeout = config.catalog.timeout();
    let registry = MockRegistry::from_config(config)?;

    let collection_id = registry.config().catalog.collection_id.clone();
    match registry
        .load_collection_with_timeout(&collection_id, timeout)
        .await?
    {
        LoadState::Error(e) => anyhow::bail!("Failed to load collection: {}", e),
        LoadState::Loading | LoadState::Success => {}
    }

    if let Some(collection) = registry.collection() {
        let updated = collection
            .info
            .updated_at()
            .map(|t| t.to_rfc2822())
            .unwrap_or_else(|| collection.info.updated_at.clone());
        println!("Collection: {} (updated {})", collection.info.name, updated);
    }

    let groups = registry.available_groups();
    if groups.is_empty() {
        println!("Groups: none");
    } else {
        println!(
            "Groups: {}",
            groups.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    println!("Mocked APIs:");
    for api in registry.mocked_apis().iter() {
        println!(
            "  {:<32} /{}",
            api.name,
            api.full_path.as_deref().unwrap_or("")
        );
    }

    if let Some(group) = &args.group {
        if !groups.contains(group) {
            anyhow::bail!("Unknown group: {}", group);
        }
        registry.enable_group(group);
    }
    if let Some(state) = args.mock_state {
        registry.set_mock_state(state);
    }
    if let Some(delay_ms) = args.delay_ms {
        registry.set_response_delay_ms(delay_ms);
    }

    if !args.paths.is_empty() {
        let enforced = registry.mock_state() == MockState::MocksOnly;
        println!("Routing ({}):", registry.mock_state());
        for path in &args.paths {
            match registry.resolve(path) {
                MockDecision::Matched { mock_id, mock_url } => {
                    println!("  {} -> {} [{}]", path, mock_url, mock_id)
                }
                MockDecision::NoMock { .. } if enforced => {
                    println!("  {} -> blocked (mocking enforced)", path)
                }
                MockDecision::NoMock { .. } => println!("  {} -> network", path),
            }
        }
    }

    Ok(())
}
