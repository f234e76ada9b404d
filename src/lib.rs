pub mod batches;
pub mod calendar;
pub mod catalog;
pub mod config;
pub mod curriculum;
pub mod db;
pub mod delivery;
pub mod model;
pub mod report;
pub mod scheduler;
pub mod sessions;
pub mod tiers;
pub mod workers;
