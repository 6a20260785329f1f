//! Custom Resource Definitions for the eviction autoscaler
//!
//! - EvictionAutoScaler: per-budget record of the most recent anticipated eviction

mod eviction_autoscaler;

pub use eviction_autoscaler::{
    Eviction, EvictionAutoScaler, EvictionAutoScalerCondition, EvictionAutoScalerSpec,
    EvictionAutoScalerStatus,
};
