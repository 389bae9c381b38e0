//! Synthetic record generation for benchmark runs.

use crate::models::{ID_FIELD, PARTITION_KEY_VALUE, Record};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use uuid::Uuid;

const LOREM: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "ad", "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi",
    "aliquip", "ex", "ea", "commodo", "consequat", "duis", "aute", "irure", "in", "voluptate",
];

const HANDLE_PREFIXES: &[&str] = &[
    "quiet", "rapid", "amber", "silver", "brisk", "lunar", "cobalt", "mellow", "swift", "rusty",
];

const HANDLE_SUFFIXES: &[&str] = &[
    "otter", "falcon", "maple", "harbor", "comet", "badger", "willow", "ember", "pixel", "heron",
];

fn username(rng: &mut impl Rng) -> String {
    let prefix = HANDLE_PREFIXES.choose(rng).copied().unwrap_or("user");
    let suffix = HANDLE_SUFFIXES.choose(rng).copied().unwrap_or("name");
    format!("{prefix}_{suffix}{}", rng.gen_range(10..1000))
}

fn lorem_words(rng: &mut impl Rng, count: usize) -> String {
    (0..count)
        .filter_map(|_| LOREM.choose(rng).copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generate `count` records `{id, username, data, <partition_key_field>}`.
///
/// Every record carries the same partition-key value so a single procedure
/// execution can write any slice of the set.
pub fn generate_records(count: usize, word_count: usize, partition_key_field: &str) -> Vec<Record> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut fields = Map::new();
            fields.insert(ID_FIELD.to_string(), Value::from(Uuid::new_v4().to_string()));
            fields.insert("username".to_string(), Value::from(username(&mut rng)));
            fields.insert("data".to_string(), Value::from(lorem_words(&mut rng, word_count)));
            fields.insert(
                partition_key_field.to_string(),
                Value::from(PARTITION_KEY_VALUE),
            );
            Record::new(fields)
        })
        .collect()
}

/// Give every record a new random id.
pub fn refresh_ids(records: &mut [Record]) {
    for record in records.iter_mut() {
        *record = record.with_field(ID_FIELD, Uuid::new_v4().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_records_are_unique_and_share_a_partition() {
        let records = generate_records(50, 4, "pk");

        let ids: HashSet<_> = records.iter().filter_map(Record::id).collect();
        assert_eq!(ids.len(), 50);
        assert!(
            records
                .iter()
                .all(|record| record.partition_key("pk") == Some(PARTITION_KEY_VALUE))
        );
        let data = records[0].get("data").and_then(Value::as_str).unwrap_or_default();
        assert_eq!(data.split(' ').count(), 4);
    }

    #[test]
    fn refresh_replaces_ids_only() {
        let mut records = generate_records(3, 2, "pk");
        let before = records.clone();

        refresh_ids(&mut records);

        for (old, new) in before.iter().zip(&records) {
            assert_ne!(old.id(), new.id());
            assert_eq!(old.get("username"), new.get("username"));
        }
    }
}
