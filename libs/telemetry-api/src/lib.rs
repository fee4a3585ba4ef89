//! Shared types of the telemetry service: the reading model, page cursors,
//! paged results, the storage trait and the error taxonomy.

pub mod cursor;
pub mod error;
pub mod paged;
pub mod reading;
pub mod store;

pub use cursor::{CURSOR_VERSION, CursorCodec, PageCursor};
pub use error::{StoreError, TelemetryError};
pub use paged::PagedResult;
pub use reading::{InstrumentKind, MAX_SPACECRAFT_NAME_BYTES, Measurement, PartitionKey, Reading, UnknownInstrument};
pub use store::{ScanPage, ScanPosition, TelemetryStore};
