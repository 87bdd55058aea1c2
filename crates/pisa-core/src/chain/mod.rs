//! Chain head ingestion: the block source port and the processor that
//! linearises heads into cache updates and component dispatch.

pub mod processor;
pub mod source;

pub use processor::{BlockProcessor, ProcessorError};
pub use source::{BlockSource, BlockSourceError};
