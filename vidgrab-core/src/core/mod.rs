pub mod catalog;
pub mod dependencies;
pub mod ffmpeg;
pub mod filename;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod reporter;
pub mod resolver;
pub mod retention;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod ytdlp;
