//! IdGenerator port.
//!
//! Ids are ULIDs stamped from the injected [`Clock`], so they sort by creation
//! time and can be minted by independent worker processes without coordination.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{ActionId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_action_id(&self) -> ActionId;

    fn generate_task_id(&self) -> TaskId;
}

pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_action_id(&self) -> ActionId {
        ActionId::from_ulid(self.next_ulid())
    }

    fn generate_task_id(&self) -> TaskId {
        TaskId::new(format!("task-{}", self.next_ulid()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let a = id_gen.generate_action_id();
        let b = id_gen.generate_action_id();
        assert_ne!(a, b);

        let t = id_gen.generate_task_id();
        assert!(t.as_str().starts_with("task-"));
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.generate_action_id();
        let id2 = id_gen.generate_action_id();
        assert_ne!(id1, id2);

        let timestamp1 = (id1.as_ulid().0 >> 80) as u64;
        let timestamp2 = (id2.as_ulid().0 >> 80) as u64;
        assert_eq!(timestamp1, timestamp2);
        assert_eq!(timestamp1, fixed_time.timestamp_millis() as u64);
    }
}
