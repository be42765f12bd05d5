pub mod checkpoint;
pub mod extractor;
pub mod gmail;
pub mod google_auth;
pub mod poller;
pub mod routing;
pub mod service;
pub mod store;
pub mod threads;

mod pipeline;

pub use pipeline::{SyncEngine, SyncError, SyncReport, SyncSettings};
pub use service::{run_server, AppState, ServiceConfig};
pub use store::HelpdeskStore;
