//! Infrastructure shared by the workspace crates: 2-D pixel containers,
//! concurrency-limited parallel maps, log setup and config file handling.

pub mod buffer2;
pub mod file_format;
pub mod log_setup;
pub mod parallel;
pub mod test_utils;

pub use buffer2::Buffer2;
pub use file_format::{FileFormat, FileFormatError, FileFormatResult};
