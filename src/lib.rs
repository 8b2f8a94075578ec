pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod messenger;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod schedule;
pub mod wal;
