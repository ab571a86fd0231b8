use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

fn generator() -> MutexGuard<'static, Option<SnowflakeIdBucket>> {
    ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initializes the process-wide snowflake generator.
///
/// `machine_id` and `node_id` must each be in `0..=31`. Calling this again
/// replaces the generator; ids already handed out stay unique as long as the
/// pair does not change mid-millisecond.
pub fn init(machine_id: i32, node_id: i32) {
    *generator() = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Returns the next snowflake id as a decimal string.
///
/// Falls back to a `(1, 1)` generator when [`init`] was never called.
pub fn next_id() -> String {
    let mut gen = generator();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}
