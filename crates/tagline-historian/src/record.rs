use serde_json::{Map, Value};
use tagline_core::{Mutation, MutationError};
use thiserror::Error;

const TIME_KEY: &str = "time";
const MUTATION_KEY: &str = "mutation";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is not an object: {0}")]
    NotAnObject(Value),
    #[error("record time is missing or not an integer")]
    MissingTime,
    #[error("record time is negative: {0}")]
    NegativeTime(i64),
    #[error("record mutation is missing")]
    MissingMutation,
    #[error("record mutation is invalid: {0}")]
    Mutation(#[from] MutationError),
}

/// A mutation together with the time (epoch ms) its upload was confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord<M> {
    time: i64,
    mutation: M,
}

impl<M: Mutation> MutationRecord<M> {
    pub fn new(time: i64, mutation: M) -> Result<Self, RecordError> {
        if time < 0 {
            return Err(RecordError::NegativeTime(time));
        }
        Ok(Self { time, mutation })
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn mutation(&self) -> &M {
        &self.mutation
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(TIME_KEY.to_string(), Value::from(self.time));
        map.insert(MUTATION_KEY.to_string(), self.mutation.to_json());
        Value::Object(map)
    }

    pub fn from_json(value: &Value) -> Result<Self, RecordError> {
        let Some(map) = value.as_object() else {
            return Err(RecordError::NotAnObject(value.clone()));
        };

        let time = map
            .get(TIME_KEY)
            .and_then(Value::as_i64)
            .ok_or(RecordError::MissingTime)?;
        let mutation = map
            .get(MUTATION_KEY)
            .filter(|mutation| !mutation.is_null())
            .ok_or(RecordError::MissingMutation)?;

        Self::new(time, M::from_json(mutation)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tagline_core::{TagGroups, TagGroupsMutation};

    #[test]
    fn json_roundtrip_keeps_time_and_mutation_effect() {
        let mutation = TagGroupsMutation::add_tags("music", ["rock"]).with_remove("music", ["pop"]);
        let record = MutationRecord::new(1_700_000_000_123, mutation).expect("record");

        let parsed =
            MutationRecord::<TagGroupsMutation>::from_json(&record.to_json()).expect("parse");
        assert_eq!(parsed.time(), 1_700_000_000_123);

        let mut base = TagGroups::new();
        base.insert("music".to_string(), ["pop".to_string()].into());
        let mut from_original = base.clone();
        let mut from_parsed = base;
        record.mutation().apply(&mut from_original);
        parsed.mutation().apply(&mut from_parsed);
        assert_eq!(from_parsed, from_original);
    }

    #[test]
    fn persisted_shape_embeds_mutation_verbatim() {
        let record =
            MutationRecord::new(7, TagGroupsMutation::set_tags("news", ["local"])).expect("record");
        assert_eq!(
            record.to_json(),
            json!({ "time": 7, "mutation": { "set": { "news": ["local"] } } })
        );
    }

    #[test]
    fn rejects_negative_missing_and_fractional_times() {
        let mutation = json!({ "add": { "music": ["rock"] } });

        assert!(matches!(
            MutationRecord::<TagGroupsMutation>::from_json(
                &json!({ "time": -1, "mutation": mutation })
            ),
            Err(RecordError::NegativeTime(-1))
        ));
        assert!(matches!(
            MutationRecord::<TagGroupsMutation>::from_json(&json!({ "mutation": mutation })),
            Err(RecordError::MissingTime)
        ));
        assert!(matches!(
            MutationRecord::<TagGroupsMutation>::from_json(
                &json!({ "time": 1.5, "mutation": mutation })
            ),
            Err(RecordError::MissingTime)
        ));
    }

    #[test]
    fn rejects_missing_or_invalid_mutation() {
        assert!(matches!(
            MutationRecord::<TagGroupsMutation>::from_json(&json!({ "time": 1 })),
            Err(RecordError::MissingMutation)
        ));
        assert!(matches!(
            MutationRecord::<TagGroupsMutation>::from_json(
                &json!({ "time": 1, "mutation": "add" })
            ),
            Err(RecordError::Mutation(_))
        ));
        assert!(matches!(
            MutationRecord::<TagGroupsMutation>::from_json(&json!([1, 2])),
            Err(RecordError::NotAnObject(_))
        ));
    }
}
