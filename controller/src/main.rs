use controller::{
    backfill::BackfillSweep,
    config::ControllerConfig,
    dispatcher::{dispatch_events, resync_every},
    index::NodeIndex,
    StartupReconciler,
};
use models::{
    constants::CONTROLLER,
    node::{K8SStartupClusterClient, StartupClusterClient},
    telemetry,
};

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::Api,
    runtime::{
        reflector,
        watcher::{watcher, Config},
        WatchStreamExt,
    },
};
use snafu::ResultExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};
use tracing::{event, Level};

// How often to check whether the pod index has synced before running the backfill sweep.
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The module-wide result type.
type Result<T> = std::result::Result<T, controller_error::Error>;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_telemetry_from_env().context(controller_error::TelemetryInitSnafu)?;

    let config = ControllerConfig::from_environment().context(controller_error::ConfigSnafu)?;
    event!(Level::INFO, controller = CONTROLLER, ?config, "Starting controller.");

    let k8s_client = kube::client::Client::try_default()
        .await
        .context(controller_error::ClientCreateSnafu)?;
    let cluster_client = K8SStartupClusterClient::new(k8s_client.clone());

    let index = NodeIndex::new();
    let reconciler = StartupReconciler::new(cluster_client.clone(), index.clone());
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);

    // Both streams stop taking new events once shutdown begins; handlers already running finish.
    let nodes: Api<Node> = Api::all(k8s_client.clone());
    let node_events = watcher(nodes, Config::default())
        .default_backoff()
        .take_until(shutdown_requested(shutdown_receiver.clone()));
    let node_store = reflector::store::Writer::<Node>::default();
    let node_reader = node_store.as_reader();
    let node_dispatcher = dispatch_events(node_events, node_store, &reconciler);

    // Cached nodes are periodically handed back to the reconciler, so a failed reconcile is retried
    // even if the node and its pods never change again.
    let resync_stopped = shutdown_requested(shutdown_receiver.clone());
    let node_resync = async {
        tokio::select! {
            _ = resync_every(node_reader, config.resync_period, &reconciler) => {},
            _ = resync_stopped => {},
        }
    };

    let pods: Api<Pod> = Api::all(k8s_client);
    let pod_events = watcher(pods, Config::default())
        .default_backoff()
        .take_until(shutdown_requested(shutdown_receiver.clone()));
    let pod_dispatcher = dispatch_events(pod_events, index.clone(), &reconciler);

    let backfill = run_backfill(
        &config,
        BackfillSweep::new(cluster_client, index.clone()),
        index,
        shutdown_receiver,
    );

    let controller_runner = async {
        tokio::join!(node_dispatcher, node_resync, pod_dispatcher, backfill);
    };
    tokio::pin!(controller_runner);

    tokio::select! {
        _ = &mut controller_runner => {
            event!(Level::ERROR, "Watch streams ended before shutdown was requested.");
            return controller_error::KubernetesWatcherFailedSnafu.fail();
        },
        signal_name = termination_signal() => {
            let signal_name = signal_name?;
            event!(Level::INFO, signal = signal_name, "Received termination signal, shutting down.");
        }
    };

    // Receivers are held by the runner, so this can only fail once it has already finished.
    let _ = shutdown_sender.send(true);
    match timeout(config.shutdown_grace_period, controller_runner).await {
        Ok(()) => event!(Level::INFO, "Controller stopped."),
        Err(_) => event!(
            Level::WARN,
            grace_period = ?config.shutdown_grace_period,
            "In-flight reconciles did not finish within the shutdown grace period."
        ),
    }
    Ok(())
}

/// Resolves once the shutdown flag has been raised, or its sender is gone.
async fn shutdown_requested(mut receiver: watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            return;
        }
    }
}

/// Waits for SIGINT or SIGTERM, returning the name of the signal received.
async fn termination_signal() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context(controller_error::SignalHandlerSnafu)?;
    let mut sigint =
        signal(SignalKind::interrupt()).context(controller_error::SignalHandlerSnafu)?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

/// Runs the backfill sweep once the pod index has synced, if enabled, then repeats it at the configured
/// interval until shutdown.
async fn run_backfill<T: StartupClusterClient>(
    config: &ControllerConfig,
    sweep: BackfillSweep<T>,
    index: NodeIndex,
    shutdown: watch::Receiver<bool>,
) {
    if !config.backfill_enabled {
        return;
    }

    let sweeper = async {
        while !index.is_synced() {
            sleep(SYNC_POLL_INTERVAL).await;
        }
        match config.backfill_interval {
            Some(interval) => sweep.run_every(interval).await,
            None => {
                // Errors are logged by instrumentation in `run()`.
                #[allow(unused_must_use)]
                {
                    sweep.run().await;
                }
            }
        }
    };

    tokio::select! {
        _ = sweeper => {},
        _ = shutdown_requested(shutdown) => {
            event!(Level::DEBUG, "Backfill stopped for shutdown.");
        },
    }
}

pub mod controller_error {
    use controller::config::config_error;
    use models::telemetry;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Unable to create Kubernetes client: '{}'", source))]
        ClientCreate { source: kube::Error },

        #[snafu(display("Invalid controller configuration: '{}'", source))]
        Config { source: config_error::Error },

        #[snafu(display("The Kubernetes WATCH on Node and Pod objects has failed."))]
        KubernetesWatcherFailed,

        #[snafu(display("Unable to install termination signal handler: '{}'", source))]
        SignalHandler { source: std::io::Error },

        #[snafu(display("Error configuring telemetry: '{}'", source))]
        TelemetryInit {
            source: telemetry::TelemetryConfigError,
        },
    }
}
