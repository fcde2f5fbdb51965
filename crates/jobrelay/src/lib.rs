pub mod config;
pub mod db;
pub mod delivery;
pub mod documents;
pub mod jobs;
pub mod poller;
pub mod schema;
pub mod telemetry;
