use crate::config::HistorianConfig;
use crate::record::{MutationRecord, RecordError};
use crate::registrar::{Registrar, RegistrarError, UploadListener};
use crate::store::RecordStore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tagline_core::{AudienceKind, Clock, Mutation, TagGroups};
use tagline_storage::{ConfigStore, StorageError};
use thiserror::Error;
use tracing::{debug, error};

const UNBOUNDED_AGE_MS: u64 = u64::MAX;

#[derive(Debug, Error)]
pub enum HistorianError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("registrar error: {0}")]
    Registrar(#[from] RegistrarError),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
}

/// Keeps uploaded tag group mutations around so local reads can see them
/// before the server snapshot catches up.
pub struct TagGroupHistorian<M: Mutation> {
    registrar: Arc<dyn Registrar<M>>,
    records: RecordStore,
    clock: Arc<dyn Clock>,
    record_lock: Mutex<()>,
    max_record_age_ms: AtomicU64,
    subscribed: AtomicBool,
}

impl<M: Mutation> TagGroupHistorian<M> {
    pub fn new(
        registrar: Arc<dyn Registrar<M>>,
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(registrar, store, clock, &HistorianConfig::default())
    }

    pub fn with_config(
        registrar: Arc<dyn Registrar<M>>,
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
        config: &HistorianConfig,
    ) -> Self {
        let historian = Self {
            registrar,
            records: RecordStore::new(store, config.records_key.clone()),
            clock,
            record_lock: Mutex::new(()),
            max_record_age_ms: AtomicU64::new(UNBOUNDED_AGE_MS),
            subscribed: AtomicBool::new(false),
        };
        if let Some(age) = config.max_record_age() {
            historian.set_max_record_age(age);
        }
        historian
    }

    /// Subscribes to upload confirmations. Later calls are no-ops.
    pub fn init(self: &Arc<Self>) {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        let listener = Arc::new(HistorianListener {
            historian: Arc::downgrade(self),
        });
        self.registrar.add_listener(listener);
    }

    /// Applies from the next read on; stored records are left untouched.
    pub fn set_max_record_age(&self, age: Duration) {
        let age_ms = u64::try_from(age.as_millis()).unwrap_or(UNBOUNDED_AGE_MS);
        self.max_record_age_ms.store(age_ms, Ordering::SeqCst);
    }

    pub fn clear_max_record_age(&self) {
        self.max_record_age_ms
            .store(UNBOUNDED_AGE_MS, Ordering::SeqCst);
    }

    pub fn max_record_age(&self) -> Option<Duration> {
        match self.max_record_age_ms.load(Ordering::SeqCst) {
            UNBOUNDED_AGE_MS => None,
            age_ms => Some(Duration::from_millis(age_ms)),
        }
    }

    /// Merges local knowledge into `tags`: recorded mutations with
    /// `time >= since_ms` oldest first, then pending named user mutations,
    /// then pending channel mutations.
    ///
    /// `tags` is left untouched when reading any source fails.
    pub fn apply_local_data(&self, tags: &mut TagGroups, since_ms: i64) -> Result<(), HistorianError> {
        let records = self.mutation_records()?;
        let named_user = self.registrar.pending_mutations(AudienceKind::NamedUser)?;
        let channel = self.registrar.pending_mutations(AudienceKind::Channel)?;

        for record in records.iter().filter(|record| record.time() >= since_ms) {
            record.mutation().apply(tags);
        }
        for mutation in named_user.iter().chain(channel.iter()) {
            mutation.apply(tags);
        }

        Ok(())
    }

    /// Records a mutation the server has accepted, stamped with the current
    /// time. Expired records are dropped from storage as part of the rewrite.
    ///
    /// Only the upload listener registered by [`init`](Self::init) calls this.
    pub(crate) fn record_mutation(&self, mutation: M) -> Result<(), HistorianError> {
        let _guard = self.lock_records();
        let now = self.clock.now_ms();

        let mut records = self.retained_records(now)?;
        records.push(MutationRecord::new(now, mutation)?);
        self.records.save(&mut records)?;

        debug!(
            event = "tag_group_mutation_recorded",
            time = now,
            records = records.len()
        );
        Ok(())
    }

    pub(crate) fn mutation_records(&self) -> Result<Vec<MutationRecord<M>>, HistorianError> {
        let _guard = self.lock_records();
        let now = self.clock.now_ms();
        self.retained_records(now)
    }

    fn retained_records(&self, now: i64) -> Result<Vec<MutationRecord<M>>, HistorianError> {
        let max_age_ms = self.max_record_age_ms.load(Ordering::SeqCst);
        let mut records = self.records.load::<M>()?;
        records.retain(|record| is_retained(now.saturating_sub(record.time()), max_age_ms));
        Ok(records)
    }

    // Records live in the config store, so a poisoned lock guards nothing stale.
    fn lock_records(&self) -> MutexGuard<'_, ()> {
        self.record_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// Records stamped ahead of `now` have a negative age and are kept.
fn is_retained(age_ms: i64, max_age_ms: u64) -> bool {
    u64::try_from(age_ms).map_or(true, |age_ms| age_ms <= max_age_ms)
}

struct HistorianListener<M: Mutation> {
    historian: Weak<TagGroupHistorian<M>>,
}

impl<M: Mutation> UploadListener<M> for HistorianListener<M> {
    fn on_mutation_uploaded(&self, mutation: &M) {
        let Some(historian) = self.historian.upgrade() else {
            debug!(event = "tag_group_historian_dropped");
            return;
        };
        if let Err(err) = historian.record_mutation(mutation.clone()) {
            error!(event = "tag_group_record_error", error = %err);
        }
    }
}
