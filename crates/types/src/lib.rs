pub mod error;
pub mod keys;
pub mod policy;
pub mod series;
pub mod time;

pub use error::{BoxError, ResultExt, StoreError};
pub use keys::{BackendKind, DataKind, StoreLocation};
pub use policy::{Existence, WritePolicy};
pub use series::{Column, ColumnData, FieldKind, TickSeries, Value};
pub use time::TimeRange;
