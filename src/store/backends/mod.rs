/// SQLite-backed document store.
pub mod sqlite_store;
