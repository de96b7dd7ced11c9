pub mod autosave;
pub mod config;
pub mod errors;
pub mod queue;
pub mod realtime;
pub mod session;
mod util;

pub use boardsync_common as common;
pub use errors::SyncError;
pub use session::{BoardSession, Notice};
