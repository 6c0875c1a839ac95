use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use chrono::Utc;
use shared::error::ReconcileError;
use shared::identity::IdentityStrategy;
use shared::query::filter_services;
use shared::reconcile::{
    apply_manual_edit, create_manual_entry, reconcile_run, RunOptions, RunTally,
};
use shared::naming::unique_id;
use shared::types::{CreateServiceRequest, EditPayload, ObservedService, ServiceEntry, ServiceQuery};
use crate::store::{db::ServiceDb, digest};

/// Result of an edit request.
#[derive(Debug)]
pub enum MutationOutcome {
    Applied(ServiceEntry),
    NotFound,
    Rejected(ReconcileError),
}

/// Commands sent to the registry thread
pub enum RegistryCommand {
    List(ServiceQuery, oneshot::Sender<Result<Vec<ServiceEntry>>>),
    Get(String, oneshot::Sender<Result<Option<ServiceEntry>>>),
    Count(oneshot::Sender<Result<usize>>),
    Create(CreateServiceRequest, oneshot::Sender<Result<Result<ServiceEntry, ReconcileError>>>),
    Edit {
        id: String,
        edit: EditPayload,
        reply: oneshot::Sender<Result<MutationOutcome>>,
    },
    Reconcile(Vec<ObservedService>, oneshot::Sender<Result<RunTally>>),
    Shutdown,
}

/// Owner of the service database. Every mutation goes through here, one at a
/// time, which is what keeps discovery merges and manual edits of the same
/// record from interleaving.
pub struct Registry {
    db: ServiceDb,
    strategy: Box<dyn IdentityStrategy>,
    options: RunOptions,
    default_host: String,
    digest_tx: watch::Sender<String>,
}

impl Registry {
    pub fn new(
        db: ServiceDb,
        strategy: Box<dyn IdentityStrategy>,
        options: RunOptions,
        default_host: String,
        digest_tx: watch::Sender<String>,
    ) -> Self {
        Self {
            db,
            strategy,
            options,
            default_host,
            digest_tx,
        }
    }

    pub fn list(&self, query: &ServiceQuery) -> Result<Vec<ServiceEntry>> {
        let services = self.db.get_all_services()?;
        Ok(filter_services(&services, query))
    }

    pub fn get(&self, id: &str) -> Result<Option<ServiceEntry>> {
        self.db.get_service(id)
    }

    pub fn count(&self) -> Result<usize> {
        self.db.count_services()
    }

    /// Outer error: storage failure. Inner error: the request was rejected.
    pub fn create(&self, request: &CreateServiceRequest) -> Result<Result<ServiceEntry, ReconcileError>> {
        let mut entry = match create_manual_entry(request, &self.default_host, Utc::now()) {
            Ok(entry) => entry,
            Err(e) => return Ok(Err(e)),
        };

        let existing = self.db.get_all_services()?;
        entry.id = unique_id(&entry.id, |candidate| existing.iter().any(|e| e.id == candidate));

        self.db.upsert_service(&entry)?;
        tracing::info!("Created service {}", entry.id);
        self.publish_digest();
        Ok(Ok(entry))
    }

    pub fn edit(&self, id: &str, edit: &EditPayload) -> Result<MutationOutcome> {
        let Some(existing) = self.db.get_service(id)? else {
            return Ok(MutationOutcome::NotFound);
        };

        match apply_manual_edit(&existing, edit, Utc::now()) {
            Ok(result) => {
                self.db.upsert_service(&result.entry)?;
                tracing::info!(
                    "Edited service {} (changed: {:?}, locked: {:?})",
                    id,
                    result.changed,
                    result.entry.locked_fields
                );
                self.publish_digest();
                Ok(MutationOutcome::Applied(result.entry))
            }
            Err(e) => {
                tracing::debug!("Rejected edit of {}: {}", id, e);
                Ok(MutationOutcome::Rejected(e))
            }
        }
    }

    pub fn reconcile(&mut self, observations: &[ObservedService]) -> Result<RunTally> {
        let current = self.db.get_all_services()?;
        let outcome = reconcile_run(
            current,
            observations,
            self.strategy.as_ref(),
            self.options,
            Utc::now(),
        );

        for conflict in &outcome.tally.conflicts {
            tracing::warn!(
                "Identity key {} matches several services {:?}; observation not merged",
                conflict.key,
                conflict.ids
            );
        }
        if outcome.tally.ignored_locks > 0 {
            tracing::debug!("Discovery left {} locked fields untouched", outcome.tally.ignored_locks);
        }

        self.db.save_services(&outcome.entries)?;
        self.publish_digest();
        Ok(outcome.tally)
    }

    fn publish_digest(&self) {
        if let Ok(services) = self.db.get_all_services() {
            let _ = self.digest_tx.send(digest::compute_digest(&services));
        }
    }
}

/// Handle to interact with the registry thread
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn the registry thread
    pub fn spawn(mut registry: Registry) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    RegistryCommand::List(query, reply) => {
                        let _ = reply.send(registry.list(&query));
                    }
                    RegistryCommand::Get(id, reply) => {
                        let _ = reply.send(registry.get(&id));
                    }
                    RegistryCommand::Count(reply) => {
                        let _ = reply.send(registry.count());
                    }
                    RegistryCommand::Create(request, reply) => {
                        let _ = reply.send(registry.create(&request));
                    }
                    RegistryCommand::Edit { id, edit, reply } => {
                        let _ = reply.send(registry.edit(&id, &edit));
                    }
                    RegistryCommand::Reconcile(observations, reply) => {
                        let _ = reply.send(registry.reconcile(&observations));
                    }
                    RegistryCommand::Shutdown => {
                        tracing::info!("Registry thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    pub async fn list(&self, query: ServiceQuery) -> Result<Vec<ServiceEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::List(query, reply)).await?;
        rx.await?
    }

    pub async fn get(&self, id: String) -> Result<Option<ServiceEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Get(id, reply)).await?;
        rx.await?
    }

    pub async fn count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Count(reply)).await?;
        rx.await?
    }

    pub async fn create(
        &self,
        request: CreateServiceRequest,
    ) -> Result<Result<ServiceEntry, ReconcileError>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Create(request, reply)).await?;
        rx.await?
    }

    pub async fn edit(&self, id: String, edit: EditPayload) -> Result<MutationOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Edit { id, edit, reply }).await?;
        rx.await?
    }

    /// Merge a batch of observations and persist the result
    pub async fn reconcile(&self, observations: Vec<ObservedService>) -> Result<RunTally> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Reconcile(observations, reply)).await?;
        rx.await?
    }

    /// Shutdown the registry thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(RegistryCommand::Shutdown).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::fields::LockableField;
    use shared::identity::UnitNameIdentity;
    use shared::types::{ServiceSource, ServiceStatus};

    pub(crate) fn test_registry() -> (Registry, watch::Receiver<String>) {
        let db = ServiceDb::open(":memory:").unwrap();
        let (digest_tx, digest_rx) = watch::channel(String::new());
        let registry = Registry::new(
            db,
            Box::new(UnitNameIdentity),
            RunOptions::default(),
            "nas.local".to_string(),
            digest_tx,
        );
        (registry, digest_rx)
    }

    fn observed(service_name: &str, port: u16) -> ObservedService {
        ObservedService {
            service_name: service_name.to_string(),
            host: "nas.local".to_string(),
            port: Some(port),
            status: ServiceStatus::Running,
            ..Default::default()
        }
    }

    #[test]
    fn test_reconcile_persists_and_tallies() {
        let (mut registry, digest_rx) = test_registry();

        let tally = registry
            .reconcile(&[observed("jellyfin.service", 8096), observed("grafana.service", 3000)])
            .unwrap();
        assert_eq!(tally.added, 2);
        assert!(!digest_rx.borrow().is_empty());

        let tally = registry.reconcile(&[observed("jellyfin.service", 8096)]).unwrap();
        assert_eq!(tally.unchanged, 1);

        let grafana = registry.get("grafana-service").unwrap().unwrap();
        assert_eq!(grafana.status, ServiceStatus::Unknown);
    }

    #[test]
    fn test_rejected_edit_leaves_row_untouched() {
        let (mut registry, _digest_rx) = test_registry();
        registry.reconcile(&[observed("jellyfin.service", 8096)]).unwrap();
        let before = registry.get("jellyfin-service").unwrap().unwrap();

        let edit = EditPayload {
            display_name: Some("Movies".to_string()),
            port: Some(Some(-1)),
            ..Default::default()
        };
        let outcome = registry.edit("jellyfin-service", &edit).unwrap();

        assert!(matches!(outcome, MutationOutcome::Rejected(ref e) if e.field() == Some("port")));
        assert_eq!(registry.get("jellyfin-service").unwrap().unwrap(), before);
    }

    #[test]
    fn test_edit_locks_against_next_run() {
        let (mut registry, _digest_rx) = test_registry();
        registry.reconcile(&[observed("jellyfin.service", 8096)]).unwrap();

        let edit = EditPayload {
            port: Some(Some(8920)),
            ..Default::default()
        };
        let MutationOutcome::Applied(edited) = registry.edit("jellyfin-service", &edit).unwrap() else {
            panic!("edit should apply");
        };
        assert!(edited.is_locked(LockableField::Port));
        assert_eq!(edited.source, ServiceSource::Merged);

        registry.reconcile(&[observed("jellyfin.service", 8096)]).unwrap();
        let stored = registry.get("jellyfin-service").unwrap().unwrap();
        assert_eq!(stored.port, Some(8920));
    }

    #[test]
    fn test_edit_unknown_id_is_not_found() {
        let (registry, _digest_rx) = test_registry();
        let outcome = registry.edit("missing", &EditPayload::default()).unwrap();
        assert!(matches!(outcome, MutationOutcome::NotFound));
    }

    #[test]
    fn test_create_assigns_unique_id() {
        let (registry, _digest_rx) = test_registry();
        let request = CreateServiceRequest {
            service_name: "router".to_string(),
            port: Some(443),
            ..Default::default()
        };

        let first = registry.create(&request).unwrap().unwrap();
        let second = registry.create(&request).unwrap().unwrap();

        assert_eq!(first.id, "router");
        assert_eq!(second.id, "router-2");
        assert_eq!(first.host, "nas.local");
        assert_eq!(registry.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (registry, _digest_rx) = test_registry();
        let handle = RegistryHandle::spawn(registry);

        handle.reconcile(vec![observed("immich.service", 2283)]).await.unwrap();
        let listed = handle.list(ServiceQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_name, "Immich");

        handle.shutdown().await.unwrap();
    }
}
