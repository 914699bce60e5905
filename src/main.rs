//! # Config Rollout Controller
//!
//! Rolls Deployments, DaemonSets and StatefulSets whenever the content of the
//! ConfigMaps and Secrets they consume changes.
//!
//! Configuration comes from flags with environment-variable fallbacks; see
//! `config-rollout-controller --help`.

use anyhow::{anyhow, Result};
use clap::Parser;
use config_rollout_controller::config::{Args, ControllerConfig};
use config_rollout_controller::runtime::leader_election::LeaderElector;
use config_rollout_controller::runtime::{initialization, watch_loop};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    initialization::init_tracing(args.log_format);

    let config = match ControllerConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let init = initialization::initialize(&config).await?;

    let leadership = match &config.leader_election {
        Some(election) => {
            let elector = Arc::new(LeaderElector::new(init.client.clone(), election));
            // A standby is healthy; reporting it unready would stall rolling updates
            init.server_state.set_ready(true);
            let guard = elector.acquire(&init.shutdown).await;
            // Ready again once the leader's watchers have synced
            init.server_state.set_ready(false);
            match guard {
                Some(guard) => Some(guard),
                None => {
                    info!("Shutdown requested before leadership was acquired");
                    if let Err(e) = init.server_handle.await {
                        error!("HTTP server task failed: {}", e);
                    }
                    return Ok(());
                }
            }
        }
        None => None,
    };

    // Cancelled by shutdown, or by losing the Lease
    let loop_shutdown = init.shutdown.child_token();
    let watch = watch_loop::run_watch_loop(
        init.client,
        config.namespace.clone(),
        init.reconciler,
        Arc::clone(&init.server_state),
        loop_shutdown.clone(),
    );

    let mut leadership_lost = false;
    match leadership {
        Some(mut guard) => {
            tokio::pin!(watch);
            tokio::select! {
                () = &mut watch => {}
                () = guard.lost() => {
                    warn!("Leadership lost, stopping the watch loop");
                    leadership_lost = true;
                    loop_shutdown.cancel();
                    watch.await;
                }
            }
            if !leadership_lost {
                guard.release().await;
            }
        }
        None => watch.await,
    }

    // Stops the HTTP servers if the loop ended on its own
    init.shutdown.cancel();
    if let Err(e) = init.server_handle.await {
        error!("HTTP server task failed: {}", e);
    }

    if leadership_lost {
        return Err(anyhow!("leadership lost; exiting so a fresh replica can compete"));
    }
    info!("Config Rollout Controller stopped");
    Ok(())
}
