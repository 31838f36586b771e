pub mod config;
pub mod config_tree;
pub mod file_sink;
pub mod logging;
pub mod paths;
pub mod signals;
pub mod sink;

pub use config::*;
pub use config_tree::{ConfigTree, ConfigTreeError, DEFAULT_PLACES};
pub use file_sink::FileSink;
pub use logging::*;
pub use signals::*;
pub use sink::{format_line, LogKind, LogRelay, LogSink};
