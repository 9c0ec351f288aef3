/// ChainShare - group sharing pipeline for contract addresses
///
/// A clipboard-watching daemon that shares detected cryptocurrency contract
/// addresses with a small group through a hosted record store, polls the
/// store for records shared by others, and fans out notifications to
/// attached UI surfaces and the native tray.

pub mod api;
pub mod backend;
pub mod clipboard;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod poll;
pub mod store;
pub mod supervisor;
pub mod surfaces;
pub mod tray;
pub mod types;
pub mod webhook;

pub use backend::BackendClient;
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{Result, ShareError};
pub use poll::PollLoop;
pub use store::StateStore;
pub use supervisor::{InitPhase, PipelineState, Supervisor};
pub use surfaces::{SurfaceKind, SurfaceRegistry};
pub use tray::TrayNotifier;
