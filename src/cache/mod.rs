//! In-memory snapshot of the full appraisal dataset
//!
//! This module provides a cache that holds a complete, point-in-time copy of
//! the upstream dataset with a configurable TTL. Refills are single-flight and
//! swap the snapshot atomically, so readers never observe a partial fill. A
//! failed refill leaves the previous snapshot in place.

mod manager;

pub use manager::{CacheSettings, DatasetCache, Snapshot};
