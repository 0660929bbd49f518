//! Result store - persistent record of finished jobs

mod schema;
mod sqlite;

pub use sqlite::{ResultStore, StoredItem, StoredRun};
