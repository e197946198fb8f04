//! Applies lifecycle events to the record store.
//!
//! Each event maps to at most one [`Transition`]:
//!
//! | event  | annotated | addressed | deleting | transition |
//! |--------|-----------|-----------|----------|------------|
//! | Add    | yes       | yes       | -        | Upsert     |
//! | Update | yes       | yes       | no       | Upsert     |
//! | Update | yes       | yes       | yes      | Remove     |
//! | Delete | yes       | -         | -        | Remove     |
//!
//! Anything else is a no-op.

use tracing::info;

use crate::metrics;
use crate::resource::Snapshot;
use crate::state::RecordStore;
use crate::template::TemplateResolver;

/// Lifecycle event delivered by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Object appeared.
    Add,
    /// Object changed.
    Update,
    /// Object is gone.
    Delete,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

/// The single store mutation an event results in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Write `domain -> address`.
    Upsert {
        /// Resolved domain.
        domain: String,
        /// Address to publish.
        address: String,
    },
    /// Drop `domain`.
    Remove {
        /// Resolved domain.
        domain: String,
    },
}

/// Turns snapshots into store mutations.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: RecordStore,
    templates: TemplateResolver,
}

impl Reconciler {
    /// Create a reconciler writing into `store`.
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            templates: TemplateResolver,
        }
    }

    /// The store this reconciler writes to.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Decide what `event` does to the store, without applying it.
    pub fn transition(&self, event: EventKind, resource: &Snapshot) -> Option<Transition> {
        let template = resource.annotation.as_deref()?;

        match event {
            EventKind::Add | EventKind::Update if resource.address.is_empty() => None,
            EventKind::Update if resource.deleting => Some(Transition::Remove {
                domain: self.templates.resolve(template, &resource.fields),
            }),
            EventKind::Add | EventKind::Update => Some(Transition::Upsert {
                domain: self.templates.resolve(template, &resource.fields),
                address: resource.address.clone(),
            }),
            EventKind::Delete => Some(Transition::Remove {
                domain: self.templates.resolve(template, &resource.fields),
            }),
        }
    }

    /// Handle an Add event.
    pub fn on_add(&self, resource: &Snapshot) {
        self.apply(EventKind::Add, resource);
    }

    /// Handle an Update event.
    pub fn on_update(&self, resource: &Snapshot) {
        self.apply(EventKind::Update, resource);
    }

    /// Handle a Delete event.
    pub fn on_delete(&self, resource: &Snapshot) {
        self.apply(EventKind::Delete, resource);
    }

    /// Compute and apply the transition for `event`.
    pub fn apply(&self, event: EventKind, resource: &Snapshot) {
        metrics::record_reconcile_event(resource.kind.as_str(), event.as_str());

        let Some(transition) = self.transition(event, resource) else {
            return;
        };

        match transition {
            Transition::Upsert { domain, address } => {
                info!(
                    kind = %resource.kind,
                    resource = %resource.key(),
                    %domain,
                    %address,
                    "{}",
                    if event == EventKind::Add { "ADD" } else { "UPDATE" }
                );
                metrics::record_transition(resource.kind.as_str(), "upsert");
                self.store.upsert(&domain, &address, resource.kind);
            }
            Transition::Remove { domain } => {
                info!(
                    kind = %resource.kind,
                    resource = %resource.key(),
                    %domain,
                    address = %resource.address,
                    "{}",
                    if event == EventKind::Delete { "DELETE" } else { "UDELETE" }
                );
                metrics::record_transition(resource.kind.as_str(), "remove");
                self.store.remove(&domain, resource.kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use serde_json::json;

    fn snapshot(
        kind: ResourceKind,
        name: &str,
        address: &str,
        annotation: Option<&str>,
        deleting: bool,
    ) -> Snapshot {
        Snapshot {
            kind,
            name: name.to_string(),
            namespace: "default".to_string(),
            address: address.to_string(),
            deleting,
            annotation: annotation.map(String::from),
            fields: json!({ "metadata": { "name": name, "namespace": "default" } }),
        }
    }

    fn pod(address: &str, deleting: bool) -> Snapshot {
        snapshot(
            ResourceKind::Instance,
            "worker-1",
            address,
            Some("{metadata.name}.pod"),
            deleting,
        )
    }

    #[test]
    fn test_add_upserts() {
        let reconciler = Reconciler::new(RecordStore::new());
        reconciler.on_add(&pod("10.0.0.5", false));
        assert_eq!(
            reconciler.store().lookup_exact("worker-1.pod.").as_deref(),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn test_add_without_address_is_ignored() {
        let reconciler = Reconciler::new(RecordStore::new());
        reconciler.on_add(&pod("", false));
        assert_eq!(reconciler.store().exact_count(), 0);
    }

    #[test]
    fn test_add_without_annotation_is_ignored() {
        let reconciler = Reconciler::new(RecordStore::new());
        let snap = snapshot(ResourceKind::Instance, "worker-1", "10.0.0.5", None, false);
        assert_eq!(reconciler.transition(EventKind::Add, &snap), None);
        reconciler.on_add(&snap);
        assert_eq!(reconciler.store().exact_count(), 0);
    }

    #[test]
    fn test_update_changes_address() {
        let reconciler = Reconciler::new(RecordStore::new());
        reconciler.on_add(&pod("10.0.0.5", false));
        reconciler.on_update(&pod("10.0.0.6", false));
        assert_eq!(
            reconciler.store().lookup_exact("worker-1.pod.").as_deref(),
            Some("10.0.0.6")
        );
    }

    #[test]
    fn test_update_while_deleting_removes_only() {
        let reconciler = Reconciler::new(RecordStore::new());
        reconciler.on_add(&pod("10.0.0.5", false));

        let deleting = pod("10.0.0.5", true);
        assert_eq!(
            reconciler.transition(EventKind::Update, &deleting),
            Some(Transition::Remove {
                domain: "worker-1.pod.".to_string()
            })
        );

        reconciler.on_update(&deleting);
        assert!(reconciler.store().lookup_exact("worker-1.pod.").is_none());
    }

    #[test]
    fn test_update_without_address_leaves_record() {
        let reconciler = Reconciler::new(RecordStore::new());
        reconciler.on_add(&pod("10.0.0.5", false));
        reconciler.on_update(&pod("", false));
        assert_eq!(
            reconciler.store().lookup_exact("worker-1.pod.").as_deref(),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn test_delete_removes_regardless_of_address() {
        let reconciler = Reconciler::new(RecordStore::new());
        reconciler.on_add(&pod("10.0.0.5", false));
        reconciler.on_delete(&pod("", false));
        assert!(reconciler.store().lookup_exact("worker-1.pod.").is_none());
    }

    #[test]
    fn test_delete_without_annotation_is_ignored() {
        let reconciler = Reconciler::new(RecordStore::new());
        let snap = snapshot(ResourceKind::Service, "api", "10.0.1.9", None, false);
        assert_eq!(reconciler.transition(EventKind::Delete, &snap), None);
    }

    #[test]
    fn test_service_add_registers_suffix() {
        let reconciler = Reconciler::new(RecordStore::new());
        let svc = snapshot(
            ResourceKind::Service,
            "api",
            "10.0.1.9",
            Some("{metadata.name}.{metadata.namespace}"),
            false,
        );
        reconciler.on_add(&svc);

        let store = reconciler.store();
        assert_eq!(store.lookup_exact("api.default.").as_deref(), Some("10.0.1.9"));
        assert_eq!(store.lookup_suffix("foo.api.default.").as_deref(), Some("10.0.1.9"));

        reconciler.on_delete(&svc);
        assert!(store.lookup_suffix("foo.api.default.").is_none());
    }
}
