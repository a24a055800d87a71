use crate::config::IvmConfig;
use crate::engine::buffer::ChangeBuffer;
use crate::engine::maintain::MaintenancePass;
use crate::engine::query::{Query, QueryId};
use crate::engine::types::{ChangeSet, ViewEntity};
use crate::engine::update::QueryUpdate;
use crate::engine::view::{ListenerId, ViewStore};
use crate::error::{IvmError, Result};
use crate::exec::{MemoryExecutor, QueryExecutor};
use crate::store::{ApplyOptions, EntityStore, MemoryStore, OverlayStore};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Incremental view maintenance over an entity store.
///
/// Writers call [`Ivm::buffer_changes`]; the owner drives
/// [`Ivm::update_views`] once per batch and then
/// [`Ivm::flush_changes_to_listeners`] to deliver results.
pub struct Ivm<S, X = MemoryExecutor> {
    store: Arc<S>,
    executor: Arc<X>,
    config: IvmConfig,
    buffer: ChangeBuffer,
    views: Arc<Mutex<ViewStore>>,
    /// At most one maintenance pass, flush or clear at a time.
    run_lock: tokio::sync::Mutex<()>,
}

impl Ivm<MemoryStore, MemoryExecutor> {
    pub fn in_memory(config: IvmConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryExecutor::new()), config)
    }
}

impl<S, X> Ivm<S, X>
where
    S: EntityStore,
    X: QueryExecutor,
{
    pub fn new(store: Arc<S>, executor: Arc<X>, config: IvmConfig) -> Self {
        Self {
            store,
            executor,
            config,
            buffer: ChangeBuffer::default(),
            views: Arc::new(Mutex::new(ViewStore::default())),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &IvmConfig {
        &self.config
    }

    /// Register a listener for `query`. Structurally identical queries share
    /// one cached result; the first delivery after the next pass is the full
    /// result set.
    pub fn subscribe<F, E>(&self, query: Query, on_results: F, on_error: E) -> Result<Subscription>
    where
        F: Fn(&QueryUpdate) + Send + Sync + 'static,
        E: Fn(&IvmError) + Send + Sync + 'static,
    {
        let (query_id, listener) = self
            .views
            .lock()
            .subscribe(query, Arc::new(on_results), Arc::new(on_error))?;
        debug!(query_id = %query_id, listener, "subscribed");
        Ok(Subscription {
            views: Arc::downgrade(&self.views),
            query_id,
            listener,
        })
    }

    /// Queue a change set for the next pass. With nothing subscribed and
    /// nothing pending, the changes go straight to the store instead.
    #[instrument(skip_all)]
    pub async fn buffer_changes(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        if self.is_idle() {
            let _guard = self.run_lock.lock().await;
            if self.is_idle() {
                debug!(changes = changes.total_changes(), "no subscriptions, applying directly");
                return self
                    .store
                    .apply_changes(&changes, ApplyOptions::trusted())
                    .await
                    .map_err(IvmError::Storage);
            }
        }
        self.buffer.write(changes);
        Ok(())
    }

    fn is_idle(&self) -> bool {
        !self.views.lock().has_subscriptions() && self.buffer.is_empty()
    }

    /// Run one maintenance pass over everything buffered so far, commit the
    /// batch to the store and publish the new results.
    ///
    /// A failed commit leaves the batch buffered and the published results
    /// untouched, so calling again retries the whole pass.
    #[instrument(skip_all)]
    pub async fn update_views(&self) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        let changes = self.buffer.begin_drain();

        let staged = {
            let overlay = OverlayStore::new(self.store.as_ref(), &changes);
            MaintenancePass::new(
                &self.views,
                self.executor.as_ref(),
                &overlay,
                self.store.as_ref(),
                &self.config,
            )
            .run(&changes)
            .await
        };

        if !changes.is_empty() {
            if let Err(err) = self.store.apply_changes(&changes, ApplyOptions::trusted()).await {
                warn!(error = %err, "commit failed, keeping changes buffered");
                return Err(IvmError::Storage(err));
            }
        }

        let published = staged.len();
        self.views.lock().publish(staged, &changes);
        self.buffer.complete_drain();
        info!(changes = changes.total_changes(), views = published, "views updated");
        Ok(())
    }

    /// Deliver pending results: the full result set to listeners that have
    /// never seen one, otherwise the changes captured since the last flush.
    #[instrument(skip_all)]
    pub async fn flush_changes_to_listeners(&self) {
        let deliveries = {
            let _guard = self.run_lock.lock().await;
            self.views.lock().take_deliveries()
        };
        debug!(deliveries = deliveries.len(), "flushing");
        for delivery in deliveries {
            (delivery.callback)(&delivery.update);
        }
    }

    /// Drop every view and subscription, pending changes and stored entities.
    #[instrument(skip_all)]
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        self.views.lock().clear();
        self.buffer.clear();
        self.store.clear().await.map_err(IvmError::Storage)?;
        info!("cleared");
        Ok(())
    }

    /// Cached results of a query, as listeners see them.
    pub fn results(&self, query_id: &str) -> Option<Vec<ViewEntity>> {
        let views = self.views.lock();
        let rows = views.get(query_id)?.results.as_ref()?;
        Some(rows.iter().map(ViewEntity::strip_synthetic).collect())
    }

    pub fn query_ids(&self) -> Vec<QueryId> {
        self.views.lock().query_ids()
    }

    pub fn has_subscriptions(&self) -> bool {
        self.views.lock().has_subscriptions()
    }
}

/// Handle returned by [`Ivm::subscribe`]. Dropping it keeps the listener
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    views: Weak<Mutex<ViewStore>>,
    query_id: QueryId,
    listener: ListenerId,
}

impl Subscription {
    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// Remove this listener; the query and its nodes go with the last one.
    pub fn unsubscribe(self) -> bool {
        let Some(views) = self.views.upgrade() else {
            return false;
        };
        let removed = views.lock().unsubscribe(&self.query_id, self.listener);
        debug!(query_id = %self.query_id, listener = self.listener, removed, "unsubscribed");
        removed
    }
}
