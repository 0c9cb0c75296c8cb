//! Background synchronization: drain-then-refresh passes triggered by a timer,
//! by reconnects and on demand.

mod resources;
mod service;
mod state;

pub use resources::Resource;
pub use service::SyncService;
pub use state::{PassResult, RefreshEvent, SyncError, SyncReport, SyncStatus};
