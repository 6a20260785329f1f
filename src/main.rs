//! Eviction Autoscaler controller
//!
//! Watches Nodes and records anticipated evictions on EvictionAutoScalers.
//!
//! ## Usage
//!
//! ```bash
//! # Run the controller (requires kubeconfig)
//! eviction-autoscaler
//!
//! # Run with custom log level
//! RUST_LOG=debug eviction-autoscaler --cooldown-seconds 30
//!
//! # Print the EvictionAutoScaler CRD
//! eviction-autoscaler --print-crd | kubectl apply -f -
//! ```

use clap::Parser;
use eviction_autoscaler::leader_election::{self, LeaderElector};
use eviction_autoscaler::metrics::Metrics;
use eviction_autoscaler::server::{self, Readiness};
use eviction_autoscaler::{
    EvictionAutoScaler, KubeStore, NodeController, NodeControllerConfig, PolicyOrder,
};
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Eviction Autoscaler controller
#[derive(Parser, Debug)]
#[command(name = "eviction-autoscaler")]
#[command(version, about = "Anticipates pod evictions on cordoned nodes")]
struct Args {
    /// Enable leader election for HA deployments
    #[arg(long, env = "LEADER_ELECTION", default_value = "false")]
    leader_election: bool,

    /// Namespace for the leader election Lease (auto-detected if empty)
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "")]
    leader_election_namespace: String,

    /// Namespace to watch pods, budgets and autoscalers in (empty for all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Metrics bind address
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: String,

    /// Health probe bind address
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    health_probe_bind_address: String,

    /// Seconds to wait before reconciling a cordoned node again after marking pods (0 disables)
    #[arg(long, env = "COOLDOWN_SECONDS", default_value = "60")]
    cooldown_seconds: u64,

    /// Order to try autoscalers in when several match a pod: listing or name
    #[arg(long, env = "POLICY_ORDER", default_value = "listing")]
    policy_order: PolicyOrder,

    /// Print the EvictionAutoScaler CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&EvictionAutoScaler::crd())?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Eviction Autoscaler");
    info!("Leader election: {}", args.leader_election);
    info!(
        "Watching namespace: {}",
        if args.namespace.is_empty() {
            "all"
        } else {
            &args.namespace
        }
    );

    let metrics = Metrics::new()?;
    let readiness = Readiness::default();

    let metrics_handle = {
        let router = server::metrics_router(metrics.clone());
        let addr = args.metrics_bind_address.clone();
        tokio::spawn(async move { server::serve(&addr, router).await })
    };
    let probe_handle = {
        let router = server::probe_router(readiness.clone());
        let addr = args.health_probe_bind_address.clone();
        tokio::spawn(async move { server::serve(&addr, router).await })
    };

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Leader election: acquire lease before starting the controller
    let elector = if args.leader_election {
        let ns = leader_election::detect_namespace(&args.leader_election_namespace);
        info!("Leader election namespace: {}", ns);
        let elector = LeaderElector::new(client.clone(), &ns);
        elector.acquire().await?;
        Some(Arc::new(elector))
    } else {
        None
    };

    let namespace = (!args.namespace.is_empty()).then_some(args.namespace.as_str());
    let (store, node_events) = KubeStore::start(client.clone(), namespace);
    store.wait_until_ready().await?;
    readiness.set_ready();

    let config = NodeControllerConfig {
        cooldown: Duration::from_secs(args.cooldown_seconds),
        policy_order: args.policy_order,
    };
    info!(
        cooldown = ?config.cooldown,
        policy_order = %config.policy_order,
        "Node controller configured"
    );
    let node_controller = Arc::new(NodeController::new(store, metrics, config));

    let node_handle = {
        let controller = Arc::clone(&node_controller);
        tokio::spawn(async move {
            if let Err(e) = controller.run(node_events).await {
                error!("Node controller error: {}", e);
            }
        })
    };

    // Periodic lease renewal (no-op future when leader election is disabled)
    let elector_for_renew = elector.clone();
    let renew_handle = tokio::spawn(async move {
        match elector_for_renew {
            Some(e) => loop {
                tokio::time::sleep(e.renew_interval()).await;
                match e.renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        error!("Lost leader lease");
                        break;
                    }
                    Err(err) => {
                        error!("Failed to renew leader lease: {}", err);
                        break;
                    }
                }
            },
            None => std::future::pending::<()>().await,
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = node_handle => {
            if let Err(e) = result {
                error!("Node controller task failed: {}", e);
            }
        }
        result = metrics_handle => {
            error!("Metrics server stopped: {:?}", result);
        }
        result = probe_handle => {
            error!("Health probe server stopped: {:?}", result);
        }
        _ = renew_handle => {
            error!("Leader lease lost, initiating shutdown");
        }
    }

    // Release the lease before exiting so a standby replica can take over immediately
    if let Some(e) = &elector {
        e.release().await;
    }

    info!("Eviction Autoscaler shutting down");
    Ok(())
}
