mod maxmind_location_store;
mod sqlite_location_store;

pub use maxmind_location_store::MaxMindLocationStore;
pub use sqlite_location_store::{SqliteLocationStore, SqliteStoreConfig};
