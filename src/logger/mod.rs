//! Alarm logger: persists every alarm notification as an audit record

pub mod handler;
pub mod record;
pub mod store;

pub use handler::{
    url_from_dimensions, AlarmLogger, AlarmLoggerSubscriber, LogOutcome, LoggerError,
};
pub use record::{truncate_chars, AlarmLogRecord, MAX_RAW_CHARS, MAX_REASON_CHARS};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore, StoreError};
