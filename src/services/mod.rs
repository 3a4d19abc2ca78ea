//! File-facing services used by result assembly
//!
//! Image I/O and output format handling are kept apart from the pipeline stages
//! so the stages stay pure functions over in-memory images.

pub mod format;
pub mod io;

pub use format::OutputFormatHandler;
pub use io::ImageIOService;
