use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, PoisonError};

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initialise the Snowflake generator used for alert, action and log ids.
///
/// `machine_id` and `node_id` must be unique per worker process (0-31) so
/// that workers sharing a document store never mint the same id.
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Next Snowflake id as a string. The high bits encode the creation time,
/// so ids sort roughly by age.
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

/// Random correlation id linking a held action to its noise-reduction window.
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn next_id_returns_unique_numeric_ids() {
        init(1, 1);
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(id.parse::<i64>().is_ok(), "id should be numeric: {id}");
            assert!(ids.insert(id), "duplicate id generated");
        }
    }

    #[test]
    fn generate_uuid_has_no_separators() {
        let a = generate_uuid();
        let b = generate_uuid();
        assert_eq!(a.len(), 32);
        assert!(!a.contains('-'));
        assert_ne!(a, b);
    }
}
