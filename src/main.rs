//! Exposure gate runner
//!
//! Wires the gate pipeline to its collaborator services and runs the tick
//! loop:
//! 1. Shadow gate decides whether the probe lane may run
//! 2. Rotation engine evaluates exits on any open micro position
//! 3. Probe executor opens at most one bounded position
//! 4. Promotion gate grants or revokes full exposure downstream

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use exposure_gate::client::GateServiceClient;
use exposure_gate::paper::{PaperGateway, PaperSizer};
use exposure_gate::policy::ExplorationPolicy;
use exposure_gate::runner::{Collaborators, GateRunner};
use exposure_gate::store::StateStore;
use exposure_gate::GateConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting exposure gate runner...");

    let env = load_env()?;
    info!(
        "Services: {} | mode: {} | state dir: {}",
        env.service_base_url,
        env.execution_mode,
        env.state_dir.display()
    );

    let mut config = GateConfig::load(env.config_file.as_deref())?;

    let client = Arc::new(GateServiceClient::new(&env.service_base_url)?);

    let collab = match env.execution_mode {
        ExecutionMode::Paper => {
            // Paper runs without an operator-managed policy file; make the
            // leniency explicit in config rather than implied by the mode
            if config.probe.policy_path.is_none() && !config.probe.allow_on_missing_policy {
                warn!("Paper mode without a policy file: allowing exploration");
                config.probe.allow_on_missing_policy = true;
            }
            Collaborators {
                signals: client.clone(),
                evidence: client.clone(),
                gateway: Arc::new(PaperGateway::new(client.clone())),
                prices: client.clone(),
                sizer: Arc::new(PaperSizer::new()),
                quarantine: client.clone(),
                circuit: client.clone(),
            }
        }
        ExecutionMode::Live => Collaborators {
            signals: client.clone(),
            evidence: client.clone(),
            gateway: client.clone(),
            prices: client.clone(),
            sizer: client.clone(),
            quarantine: client.clone(),
            circuit: client.clone(),
        },
    };

    let policy = ExplorationPolicy::load(
        config.probe.policy_path.as_deref(),
        config.probe.allow_on_missing_policy,
    )?;

    let store = StateStore::new(env.state_dir);
    let runner = GateRunner::new(config, store, collab, policy);
    runner.run(Duration::from_secs(env.tick_secs)).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionMode {
    Paper,
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Runtime wiring loaded from environment variables
#[derive(Debug, Clone)]
struct EnvConfig {
    service_base_url: String,
    state_dir: PathBuf,
    tick_secs: u64,
    execution_mode: ExecutionMode,
    config_file: Option<PathBuf>,
}

fn load_env() -> anyhow::Result<EnvConfig> {
    let service_base_url =
        std::env::var("SERVICE_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

    let state_dir = std::env::var("STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| StateStore::default_dir());

    let tick_secs = std::env::var("TICK_SECS")
        .ok()
        .map(|v| v.parse::<u64>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("Invalid TICK_SECS: {}", e))?
        .unwrap_or(60);

    let execution_mode = match std::env::var("EXECUTION_MODE").as_deref() {
        Ok("live") => ExecutionMode::Live,
        Ok("paper") | Err(_) => ExecutionMode::Paper,
        Ok(other) => {
            return Err(anyhow::anyhow!("Invalid EXECUTION_MODE: {}", other));
        }
    };

    let config_file = std::env::var("GATE_CONFIG_FILE").ok().map(PathBuf::from);

    Ok(EnvConfig {
        service_base_url,
        state_dir,
        tick_secs,
        execution_mode,
        config_file,
    })
}
