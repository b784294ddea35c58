use crate::record::MutationRecord;
use serde_json::Value;
use std::sync::Arc;
use tagline_core::Mutation;
use tagline_storage::{ConfigStore, StorageError};
use tracing::warn;

pub const RECORDS_KEY: &str = "tagline.tag_group_historian.records";

/// Mutation records persisted as one JSON array under a single key.
pub struct RecordStore {
    store: Arc<dyn ConfigStore>,
    key: String,
}

impl RecordStore {
    pub fn new(store: Arc<dyn ConfigStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Loads every parseable record, oldest first.
    ///
    /// Elements that fail to parse are logged and skipped. Equal times keep
    /// their persisted order.
    pub fn load<M: Mutation>(&self) -> Result<Vec<MutationRecord<M>>, StorageError> {
        let Some(value) = self.store.get(&self.key)? else {
            return Ok(Vec::new());
        };

        let mut records = parse_records(&self.key, &value);
        sort_records(&mut records);
        Ok(records)
    }

    /// Sorts `records` oldest first and overwrites the stored array.
    pub fn save<M: Mutation>(&self, records: &mut [MutationRecord<M>]) -> Result<(), StorageError> {
        sort_records(records);
        let value = Value::Array(records.iter().map(MutationRecord::to_json).collect());
        self.store.put(&self.key, &value)
    }
}

fn parse_records<M: Mutation>(key: &str, value: &Value) -> Vec<MutationRecord<M>> {
    let Some(items) = value.as_array() else {
        warn!(
            event = "tag_group_records_not_array",
            key,
            found = %value
        );
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match MutationRecord::from_json(item) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    event = "tag_group_record_parse_error",
                    key,
                    index,
                    error = %err
                );
                None
            }
        })
        .collect()
}

fn sort_records<M>(records: &mut [MutationRecord<M>])
where
    M: Mutation,
{
    records.sort_by_key(MutationRecord::time);
}
