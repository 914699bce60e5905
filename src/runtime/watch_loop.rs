//! # Watch Loop
//!
//! Watches ConfigMaps and Secrets and runs a convergence pass for the
//! namespace of every admitted change. Deletions trigger too, since removing
//! a source changes the aggregate fingerprint.
//!
//! Passes run one at a time. Triggers that arrive while a pass is running
//! are coalesced per namespace before the next one starts. `/readyz` turns
//! ready once both watchers have finished their initial list.

use crate::controller::model::{ReconciliationTrigger, SourceKind};
use crate::controller::reconciler::{reconcile, ConvergenceError, ConvergenceOutcome, Reconciler};
use crate::controller::selector::{LabelSelector, Labeled};
use crate::controller::server::ServerState;
use crate::runtime::error_policy::{
    handle_reconciliation_error, handle_reconciliation_success, handle_watch_stream_error,
};
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use kube::{Client, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Trigger for an observed object, if the selector admits it
pub fn admit<K>(selector: &LabelSelector, kind: SourceKind, object: &K) -> Option<ReconciliationTrigger>
where
    K: Labeled + Resource,
{
    if !selector.matches(object) {
        return None;
    }
    let meta = object.meta();
    let namespace = meta.namespace.clone()?;
    let name = meta.name.clone()?;
    Some(ReconciliationTrigger::for_object(namespace, kind, name))
}

/// Trigger for a watch event. Only object-carrying events produce one.
pub fn event_trigger<K>(
    selector: &LabelSelector,
    kind: SourceKind,
    event: &watcher::Event<K>,
) -> Option<ReconciliationTrigger>
where
    K: Labeled + Resource,
{
    match event {
        watcher::Event::Apply(object)
        | watcher::Event::InitApply(object)
        | watcher::Event::Delete(object) => admit(selector, kind, object),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// What the merged watch streams deliver to the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Trigger(ReconciliationTrigger),
    /// The initial list for this source kind has completed
    Synced(SourceKind),
}

impl From<ReconciliationTrigger> for WatchSignal {
    fn from(trigger: ReconciliationTrigger) -> Self {
        WatchSignal::Trigger(trigger)
    }
}

/// Like [`event_trigger`], but also reports the end of an initial list
pub fn event_signal<K>(
    selector: &LabelSelector,
    kind: SourceKind,
    event: &watcher::Event<K>,
) -> Option<WatchSignal>
where
    K: Labeled + Resource,
{
    match event {
        watcher::Event::InitDone => Some(WatchSignal::Synced(kind)),
        _ => event_trigger(selector, kind, event).map(WatchSignal::Trigger),
    }
}

/// Source kinds whose initial list has completed
#[derive(Debug, Default)]
pub struct InitialSync {
    synced: HashSet<SourceKind>,
}

impl InitialSync {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        SourceKind::ALL.iter().all(|kind| self.synced.contains(kind))
    }

    /// Record a completed list; true only for the call that completes the set.
    /// Re-lists after a watch desync report `InitDone` again and return false.
    pub fn mark(&mut self, kind: SourceKind) -> bool {
        let was_complete = self.is_complete();
        self.synced.insert(kind);
        !was_complete && self.is_complete()
    }
}

/// Keep the first trigger per namespace, in arrival order
#[must_use]
pub fn coalesce(triggers: Vec<ReconciliationTrigger>) -> Vec<ReconciliationTrigger> {
    let mut seen = HashSet::new();
    triggers
        .into_iter()
        .filter(|trigger| seen.insert(trigger.namespace.clone()))
        .collect()
}

fn watcher_config(selector: &LabelSelector) -> watcher::Config {
    if selector.is_everything() {
        watcher::Config::default()
    } else {
        watcher::Config::default().labels_from(selector.as_selector())
    }
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

fn trigger_stream<K>(
    api: Api<K>,
    selector: Arc<LabelSelector>,
    kind: SourceKind,
) -> BoxStream<'static, WatchSignal>
where
    K: Labeled + Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    <K as Resource>::DynamicType: Default + Clone + Eq + std::hash::Hash,
{
    watcher(api, watcher_config(&selector))
        .default_backoff()
        .filter_map(move |event| {
            let signal = match event {
                Ok(event) => event_signal(&selector, kind, &event),
                Err(e) => {
                    handle_watch_stream_error(kind.as_str(), &e);
                    None
                }
            };
            futures::future::ready(signal)
        })
        .boxed()
}

fn schedule_redelivery(
    sender: UnboundedSender<ReconciliationTrigger>,
    trigger: ReconciliationTrigger,
    delay: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                if sender.unbounded_send(trigger).is_err() {
                    debug!("Watch loop gone, dropping redelivery");
                }
            }
        }
    });
}

/// Run the controller watch loop until `shutdown` is cancelled or every
/// trigger stream has ended
pub async fn run_watch_loop(
    client: Client,
    namespace: Option<String>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    info!(
        "Starting controller watch loop (namespace: {})",
        namespace.as_deref().unwrap_or("<all>")
    );

    let selector = Arc::clone(&reconciler.settings.selector);
    let config_maps: Api<ConfigMap> = scoped_api(&client, namespace.as_deref());
    let secrets: Api<Secret> = scoped_api(&client, namespace.as_deref());
    let (redeliver_tx, redeliver_rx) = mpsc::unbounded();

    let mut triggers = stream::select_all(vec![
        trigger_stream(config_maps, Arc::clone(&selector), SourceKind::Plain),
        trigger_stream(secrets, Arc::clone(&selector), SourceKind::Sensitive),
        redeliver_rx.map(WatchSignal::from).boxed(),
    ]);
    let mut initial_sync = InitialSync::default();

    loop {
        let first = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            next = triggers.next() => match next {
                Some(trigger) => trigger,
                None => {
                    warn!("All trigger streams ended");
                    break;
                }
            },
        };

        let mut signals = vec![first];
        while let Some(Some(signal)) = triggers.next().now_or_never() {
            signals.push(signal);
        }

        let mut pending = Vec::with_capacity(signals.len());
        for signal in signals {
            match signal {
                WatchSignal::Trigger(trigger) => pending.push(trigger),
                WatchSignal::Synced(kind) => {
                    debug!("Initial {} list complete", kind.as_str());
                    if initial_sync.mark(kind) {
                        info!("Initial lists complete, reporting ready");
                        server_state.set_ready(true);
                    }
                }
            }
        }

        for trigger in coalesce(pending) {
            match reconcile(&reconciler, &trigger, &shutdown).await {
                Ok(outcome) => {
                    log_outcome(&trigger, &outcome);
                    handle_reconciliation_success(&trigger, &reconciler);
                }
                Err(ConvergenceError::Cancelled { .. }) => {
                    info!("Pass for {} interrupted by shutdown", trigger);
                    break;
                }
                Err(e) => {
                    if let Some(delay) = handle_reconciliation_error(&trigger, &e, &reconciler) {
                        schedule_redelivery(redeliver_tx.clone(), trigger, delay, shutdown.clone());
                    }
                }
            }
        }
    }

    server_state.set_ready(false);
    info!("Watch loop stopped");
}

fn log_outcome(trigger: &ReconciliationTrigger, outcome: &ConvergenceOutcome) {
    match outcome {
        ConvergenceOutcome::NoSignal => debug!("{}: no signal", trigger),
        ConvergenceOutcome::Converged {
            fingerprint,
            patched,
            unchanged,
        } => info!(
            "{}: converged on {} ({} patched, {} unchanged)",
            trigger, fingerprint, patched, unchanged
        ),
    }
}
