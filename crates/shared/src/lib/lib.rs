pub mod beacon_time;
pub mod chain;
pub mod types;
