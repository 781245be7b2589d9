//! Timestamped record file engine for multi-stream sensor data.
//!
//! Files hold records from several streams, each record carrying a
//! timestamp, a kind, and a payload. Storage is chunked and pluggable:
//! a file can span several chunk files and live behind any registered
//! storage backend. Payload schemas evolve through structural layouts
//! matched by field name and type.

pub mod backend;
pub mod chunk;
pub mod compress;
pub mod error;
pub mod event;
pub mod format;
pub mod index;
pub mod layout;
pub mod membuf;
pub mod queue;
pub mod reader;
pub mod record;
pub mod registry;
pub mod spec;
pub mod stream;
pub mod writer;

pub use error::{Error, Result};
pub use layout::{FieldType, LayoutDescriptor, SchemaLayout};
pub use reader::{ReaderOptions, RecordPlayer, RecordReader};
pub use record::{DataSource, RecordAllocator, RecordKind};
pub use spec::FileSpec;
pub use stream::StreamId;
pub use writer::{RecordWriter, WriterOptions};
