use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tagline_core::{AudienceKind, Mutation};
use tagline_storage::{ConfigStore, StorageError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Notified once for every mutation the server has accepted.
pub trait UploadListener<M>: Send + Sync {
    fn on_mutation_uploaded(&self, mutation: &M);
}

/// Outbound tag group mutations, queued per audience until uploaded.
pub trait Registrar<M: Mutation>: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn UploadListener<M>>);

    /// Mutations queued for `kind` that have not been confirmed yet, in
    /// upload order.
    fn pending_mutations(&self, kind: AudienceKind) -> Result<Vec<M>, RegistrarError>;
}

pub fn pending_key(kind: AudienceKind) -> String {
    format!("tagline.registrar.{}.pending", kind.as_str())
}

/// Registrar whose pending queues live in a [`ConfigStore`].
pub struct StoredRegistrar<M> {
    store: Arc<dyn ConfigStore>,
    queue_lock: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn UploadListener<M>>>>,
}

impl<M: Mutation> StoredRegistrar<M> {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            queue_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, kind: AudienceKind, mutation: &M) -> Result<(), RegistrarError> {
        let _guard = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut queue = self.load_queue(kind)?;
        queue.push(mutation.clone());
        self.save_queue(kind, &queue)?;
        debug!(
            event = "tag_group_mutation_enqueued",
            audience = %kind,
            pending = queue.len()
        );
        Ok(())
    }

    /// Marks the oldest pending mutation for `kind` as uploaded.
    ///
    /// Listeners run after the queue has been rewritten and the queue lock
    /// released.
    pub fn confirm_upload(&self, kind: AudienceKind) -> Result<Option<M>, RegistrarError> {
        let uploaded = {
            let _guard = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut queue = self.load_queue(kind)?;
            if queue.is_empty() {
                return Ok(None);
            }
            let head = queue.remove(0);
            self.save_queue(kind, &queue)?;
            head
        };

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_mutation_uploaded(&uploaded);
        }

        Ok(Some(uploaded))
    }

    pub fn clear_pending(&self, kind: AudienceKind) -> Result<(), RegistrarError> {
        let _guard = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(&pending_key(kind))?;
        Ok(())
    }

    fn load_queue(&self, kind: AudienceKind) -> Result<Vec<M>, RegistrarError> {
        let key = pending_key(kind);
        let Some(value) = self.store.get(&key)? else {
            return Ok(Vec::new());
        };
        let Some(items) = value.as_array() else {
            warn!(event = "tag_group_pending_not_array", key = %key);
            return Ok(Vec::new());
        };

        let queue = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match M::from_json(item) {
                Ok(mutation) => Some(mutation),
                Err(err) => {
                    warn!(
                        event = "tag_group_pending_parse_error",
                        key = %key,
                        index,
                        error = %err
                    );
                    None
                }
            })
            .collect();
        Ok(queue)
    }

    fn save_queue(&self, kind: AudienceKind, queue: &[M]) -> Result<(), RegistrarError> {
        let key = pending_key(kind);
        if queue.is_empty() {
            self.store.remove(&key)?;
        } else {
            let value = Value::Array(queue.iter().map(Mutation::to_json).collect());
            self.store.put(&key, &value)?;
        }
        Ok(())
    }
}

impl<M: Mutation> Registrar<M> for StoredRegistrar<M> {
    fn add_listener(&self, listener: Arc<dyn UploadListener<M>>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn pending_mutations(&self, kind: AudienceKind) -> Result<Vec<M>, RegistrarError> {
        let _guard = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_queue(kind)
    }
}
