//! Persistence for query history and generated reports.
//!
//! Both lists are stored as JSON under their own key in a small SQLite key/value table.

mod history;
mod list;
mod models;
mod reports;
mod store;

pub use history::*;
pub use models::*;
pub use reports::*;
pub use store::*;
