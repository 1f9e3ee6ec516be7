//! SQLite-backed catalog of shows and episodes.

mod episodes;
mod schema;
mod shows;
mod types;

pub use schema::Database;
pub use types::{Episode, Show, StoreError};
