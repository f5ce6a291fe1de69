pub mod columnar;
pub mod relational;
pub mod tick_store;
pub mod version_store;

pub use columnar::ColumnarStore;
pub use relational::RelationalStore;
pub use tick_store::TickStore;
pub use version_store::VersionStore;
