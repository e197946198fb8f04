//! Watches pods and services and feeds lifecycle events to the reconciler.

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::reconciler::{EventKind, Reconciler};
use crate::resource::{Snapshot, WatchedResource};
use crate::template::TemplateResolver;

/// A watch event with the object already reduced to a snapshot.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Object created or modified.
    Apply(Snapshot),
    /// Object deleted.
    Delete(Snapshot),
    /// A relist is starting.
    Init,
    /// Object seen during a relist.
    InitApply(Snapshot),
    /// The relist is complete.
    InitDone,
}

impl<K: WatchedResource> From<Event<K>> for WatchEvent {
    fn from(event: Event<K>) -> Self {
        match event {
            Event::Apply(obj) => WatchEvent::Apply(obj.snapshot()),
            Event::Delete(obj) => WatchEvent::Delete(obj.snapshot()),
            Event::Init => WatchEvent::Init,
            Event::InitApply(obj) => WatchEvent::InitApply(obj.snapshot()),
            Event::InitDone => WatchEvent::InitDone,
        }
    }
}

/// Turns raw watch events into Add/Update/Delete notifications.
///
/// Remembers the last snapshot of every object of one kind so that applies
/// can be told apart (new key = Add, known key = Update) and so that objects
/// missing from a relist can be deleted.
#[derive(Debug, Default)]
pub struct FeedTracker {
    known: HashMap<String, Snapshot>,
    relist: Option<HashSet<String>>,
}

impl FeedTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently known.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// True when no objects are known.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Classify one watch event.
    pub fn handle(&mut self, event: WatchEvent) -> Vec<(EventKind, Snapshot)> {
        match event {
            WatchEvent::Apply(snapshot) => self.apply(snapshot),
            WatchEvent::Delete(snapshot) => {
                self.known.remove(&snapshot.key());
                vec![(EventKind::Delete, snapshot)]
            }
            WatchEvent::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            WatchEvent::InitApply(snapshot) => {
                self.relist
                    .get_or_insert_with(HashSet::new)
                    .insert(snapshot.key());
                self.apply(snapshot)
            }
            WatchEvent::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return Vec::new();
                };

                let mut gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                gone.sort();

                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(|snapshot| (EventKind::Delete, snapshot))
                    .collect()
            }
        }
    }

    fn apply(&mut self, snapshot: Snapshot) -> Vec<(EventKind, Snapshot)> {
        let Some(previous) = self.known.insert(snapshot.key(), snapshot.clone()) else {
            return vec![(EventKind::Add, snapshot)];
        };

        // A changed template or templated field moves the record: drop the
        // one published under the old domain first.
        let mut events = Vec::with_capacity(2);
        if let Some(old_domain) = published_domain(&previous) {
            if rendered_domain(&snapshot).as_deref() != Some(old_domain.as_str()) {
                debug!(resource = %previous.key(), domain = %old_domain, "domain moved");
                events.push((EventKind::Delete, previous));
            }
        }
        events.push((EventKind::Update, snapshot));
        events
    }
}

/// Domain a snapshot currently has a record under, if any.
fn published_domain(snapshot: &Snapshot) -> Option<String> {
    if snapshot.deleting || !snapshot.is_publishable() {
        return None;
    }
    rendered_domain(snapshot)
}

/// Domain the snapshot's template renders to, published or not.
fn rendered_domain(snapshot: &Snapshot) -> Option<String> {
    let template = snapshot.annotation.as_deref()?;
    Some(TemplateResolver.resolve(template, &snapshot.fields))
}

/// Runs the pod and service watches.
pub struct SubscriptionHandler {
    client: Client,
    reconciler: Reconciler,
}

impl SubscriptionHandler {
    /// Create a new subscription handler.
    pub fn new(client: Client, reconciler: Reconciler) -> Self {
        Self { client, reconciler }
    }

    /// Watch pods and services across all namespaces until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let pods = tokio::spawn(watch::<Pod>(
            self.client.clone(),
            self.reconciler.clone(),
            shutdown.clone(),
        ));
        let services = tokio::spawn(watch::<Service>(
            self.client.clone(),
            self.reconciler.clone(),
            shutdown.clone(),
        ));

        let (pods_result, services_result) = tokio::join!(pods, services);

        if let Err(e) = pods_result {
            error!("Pod watch task panicked: {}", e);
        }
        if let Err(e) = services_result {
            error!("Service watch task panicked: {}", e);
        }
    }
}

/// Watch one resource type and apply its events in delivery order.
async fn watch<K: WatchedResource>(
    client: Client,
    reconciler: Reconciler,
    shutdown: CancellationToken,
) {
    let kind = K::KIND;
    let api: Api<K> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut tracker = FeedTracker::new();

    info!(%kind, "starting watch");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(%kind, "watch shutting down");
                return;
            }

            next = stream.next() => match next {
                Some(Ok(event)) => {
                    let event = WatchEvent::from(event);
                    let relist_done = matches!(event, WatchEvent::InitDone);

                    for (event_kind, snapshot) in tracker.handle(event) {
                        reconciler.apply(event_kind, &snapshot);
                    }

                    if relist_done {
                        debug!(%kind, objects = tracker.len(), "relist complete");
                        metrics::record_resync(kind.as_str());
                        reconciler.store().mark_ready(kind);
                    }
                }
                Some(Err(e)) => {
                    warn!(%kind, error = %e, "watch error");
                    metrics::record_watch_error(kind.as_str());
                }
                None => {
                    warn!(%kind, "watch stream ended");
                    return;
                }
            }
        }
    }
}
