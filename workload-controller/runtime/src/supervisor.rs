use crate::{
    index::Reconciler,
    k8s::{self, Change, ChangeStream, ClusterApi},
};
use futures::prelude::*;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info, info_span, warn, Instrument};


/// Bounds the number of events buffered between the subscriptions and the reconciler.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// A handle to the watch supervisor.
///
/// The supervisor owns one subscription per resource kind. A subscription that ends, for any
/// reason, reports itself as disconnected and is re-opened on the next tick of the reconnect
/// interval. Events from all subscriptions are funneled into a single dispatcher so that the
/// reconciler never processes two events at once.
#[derive(Clone, Debug)]
pub struct Supervisor<C> {
    client: C,
    events: mpsc::Sender<Event>,
    workloads: watch::Receiver<SubscriptionState>,
    pods: watch::Receiver<SubscriptionState>,
}

/// The resource kinds the supervisor subscribes to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Workloads,
    Pods,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Streaming,
}

#[derive(Clone, Debug)]
pub struct SupervisorMetrics {
    connects: Family<KindLabels, Counter>,
    disconnects: Family<KindLabels, Counter>,
    processed: Family<KindLabels, Counter>,
    skipped: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

#[derive(Debug)]
enum Event {
    Workload(Change<k8s::Deployment>),
    Pod(Change<k8s::Pod>),
}

struct Subscription {
    kind: Kind,
    state: Arc<watch::Sender<SubscriptionState>>,
    task: Option<JoinHandle<()>>,
}

/// Re-opens disconnected subscriptions on each tick.
struct Scheduler<C> {
    client: C,
    interval: Duration,
    events: mpsc::Sender<Event>,
    metrics: SupervisorMetrics,
    subscriptions: [Subscription; 2],
}

// === impl Supervisor ===

impl<C: ClusterApi> Supervisor<C> {
    /// Spawns the subscription scheduler and the event dispatcher. Both run until `drain` is
    /// signaled.
    pub fn spawn(
        client: C,
        reconciler: Reconciler<C>,
        interval: Duration,
        metrics: SupervisorMetrics,
        drain: drain::Watch,
    ) -> Self {
        let (events, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let (workloads_tx, workloads) = watch::channel(SubscriptionState::Disconnected);
        let (pods_tx, pods) = watch::channel(SubscriptionState::Disconnected);
        let scheduler = Scheduler {
            client: client.clone(),
            interval,
            events: events.clone(),
            metrics: metrics.clone(),
            subscriptions: [
                Subscription::new(Kind::Workloads, workloads_tx),
                Subscription::new(Kind::Pods, pods_tx),
            ],
        };

        tokio::spawn(
            scheduler
                .run(drain.clone())
                .instrument(info_span!("supervisor")),
        );
        tokio::spawn(dispatch(reconciler, rx, metrics, drain).instrument(info_span!("dispatch")));

        Self {
            client,
            events,
            workloads,
            pods,
        }
    }

    /// Returns the current state of each subscription.
    pub fn states(&self) -> [(Kind, SubscriptionState); 2] {
        [
            (Kind::Workloads, *self.workloads.borrow()),
            (Kind::Pods, *self.pods.borrow()),
        ]
    }

    /// Returns a receiver that observes a subscription's state transitions.
    pub fn state_rx(&self, kind: Kind) -> watch::Receiver<SubscriptionState> {
        match kind {
            Kind::Workloads => self.workloads.clone(),
            Kind::Pods => self.pods.clone(),
        }
    }

    /// Reads a workload from the cluster and queues its current state for reconciliation, as if
    /// it had been delivered by the workload watch.
    ///
    /// A workload that no longer exists is queued as deleted. Returns false if the dispatcher
    /// has shut down.
    pub async fn resync_workload(&self, name: &str) -> anyhow::Result<bool> {
        let change = match self.client.get_workload(name).await? {
            Some(deployment) => Change::Applied(deployment),
            None => Change::Deleted(k8s::Deployment {
                metadata: k8s::ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }),
        };
        debug!(workload = %name, deleted = change.is_deleted(), "Queuing resync");
        Ok(self.events.send(Event::Workload(change)).await.is_ok())
    }
}

// === impl Kind ===

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workloads => "workloads",
            Self::Pods => "pods",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl SupervisorMetrics ===

impl SupervisorMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let connects = Family::default();
        reg.register(
            "subscription_connects",
            "Count of subscriptions that started streaming",
            connects.clone(),
        );

        let disconnects = Family::default();
        reg.register(
            "subscription_disconnects",
            "Count of subscriptions that stopped streaming",
            disconnects.clone(),
        );

        let processed = Family::default();
        reg.register(
            "events_processed",
            "Count of events applied to the index",
            processed.clone(),
        );

        let skipped = Family::default();
        reg.register(
            "events_skipped",
            "Count of events that could not be applied to the index",
            skipped.clone(),
        );

        Self {
            connects,
            disconnects,
            processed,
            skipped,
        }
    }

    fn connected(&self, kind: Kind) {
        self.connects.get_or_create(&kind.into()).inc();
    }

    fn disconnected(&self, kind: Kind) {
        self.disconnects.get_or_create(&kind.into()).inc();
    }

    fn processed(&self, kind: Kind) {
        self.processed.get_or_create(&kind.into()).inc();
    }

    fn skipped(&self, kind: Kind) {
        self.skipped.get_or_create(&kind.into()).inc();
    }
}

impl From<Kind> for KindLabels {
    fn from(kind: Kind) -> Self {
        Self {
            kind: kind.as_str(),
        }
    }
}

// === impl Subscription ===

impl Subscription {
    fn new(kind: Kind, state: watch::Sender<SubscriptionState>) -> Self {
        Self {
            kind,
            state: Arc::new(state),
            task: None,
        }
    }

    fn is_disconnected(&self) -> bool {
        *self.state.borrow() == SubscriptionState::Disconnected
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.state.send_replace(SubscriptionState::Disconnected);
    }
}

// === impl Scheduler ===

impl<C: ClusterApi> Scheduler<C> {
    async fn run(mut self, drain: drain::Watch) {
        // The first tick completes immediately, so subscriptions are opened at startup.
        let mut ticks = time::interval(self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticks.tick() => self.reconnect(),
                release = &mut shutdown => {
                    for sub in self.subscriptions.iter_mut() {
                        sub.abort();
                    }
                    info!("Subscriptions closed");
                    drop(release);
                    return;
                }
            }
        }
    }

    fn reconnect(&mut self) {
        for sub in self.subscriptions.iter_mut() {
            if !sub.is_disconnected() {
                continue;
            }

            // The state is updated before the task is spawned so that a subscription is never
            // opened twice.
            sub.state.send_replace(SubscriptionState::Connecting);
            let state = sub.state.clone();
            let events = self.events.clone();
            let metrics = self.metrics.clone();
            let client = self.client.clone();
            let task = match sub.kind {
                Kind::Workloads => tokio::spawn(
                    stream_events(
                        Kind::Workloads,
                        async move { client.watch_workloads().await },
                        Event::Workload,
                        state,
                        events,
                        metrics,
                    )
                    .instrument(info_span!("workloads")),
                ),
                Kind::Pods => tokio::spawn(
                    stream_events(
                        Kind::Pods,
                        async move { client.watch_pods().await },
                        Event::Pod,
                        state,
                        events,
                        metrics,
                    )
                    .instrument(info_span!("pods")),
                ),
            };
            sub.task = Some(task);
        }
    }
}

/// Opens a subscription and forwards its changes to the dispatcher until the stream ends.
async fn stream_events<T, F>(
    kind: Kind,
    open: F,
    wrap: fn(Change<T>) -> Event,
    state: Arc<watch::Sender<SubscriptionState>>,
    events: mpsc::Sender<Event>,
    metrics: SupervisorMetrics,
) where
    F: Future<Output = anyhow::Result<ChangeStream<T>>>,
{
    let mut changes = match open.await {
        Ok(changes) => changes,
        Err(error) => {
            error!(%error, "Failed to open subscription");
            state.send_replace(SubscriptionState::Disconnected);
            return;
        }
    };

    info!(%kind, "Subscription streaming");
    metrics.connected(kind);
    state.send_replace(SubscriptionState::Streaming);

    while let Some(change) = changes.next().await {
        match change {
            Ok(change) => {
                if events.send(wrap(change)).await.is_err() {
                    debug!("Dispatcher closed");
                    break;
                }
            }
            Err(error) => {
                error!(%error, "Subscription failed");
                break;
            }
        }
    }

    warn!(%kind, "Subscription disconnected");
    metrics.disconnected(kind);
    state.send_replace(SubscriptionState::Disconnected);
}

/// Applies queued events to the reconciler, one at a time, until shutdown.
async fn dispatch<C: ClusterApi>(
    reconciler: Reconciler<C>,
    mut rx: mpsc::Receiver<Event>,
    metrics: SupervisorMetrics,
    drain: drain::Watch,
) {
    let shutdown = drain.signaled();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            // Events already queued at shutdown are discarded.
            biased;
            release = &mut shutdown => {
                debug!("Dispatcher shut down");
                drop(release);
                return;
            }
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        let (kind, result) = match event {
            Event::Workload(change) => {
                // Applying a workload may wait on a pod listing. Shutdown abandons it before the
                // store is written.
                let result = tokio::select! {
                    biased;
                    release = &mut shutdown => {
                        debug!("Dispatcher shut down while applying a workload");
                        drop(release);
                        return;
                    }
                    result = reconciler.apply_workload(change) => result,
                };
                (Kind::Workloads, result)
            }
            Event::Pod(change) => (Kind::Pods, reconciler.apply_pod(change)),
        };
        match result {
            Ok(()) => metrics.processed(kind),
            Err(error) => {
                warn!(%error, %kind, "Skipping event");
                metrics.skipped(kind);
            }
        }
    }
}
