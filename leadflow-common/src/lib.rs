pub mod claim;
pub mod conditions;
pub mod error;
pub mod events;
pub mod metrics;
pub mod rules;
pub mod store;
pub mod test_utils;
pub mod types;
