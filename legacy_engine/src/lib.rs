#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]

pub const LEGACY_VERSION: &str = env!("CARGO_PKG_VERSION");

// Content and merging
pub mod content;
pub mod data_paths;
pub mod loader;
pub mod merge;
pub mod repository;

// Scripting hooks
pub mod apply;
pub mod command;
pub mod dispatch;
pub mod hooks;
pub mod script;
pub mod snapshot;
pub mod state;

// Host and collaborators
pub mod console;
pub mod display;
pub mod host;
pub mod save_store;

// Re-exports for convenience
pub use apply::CommandApplier;
pub use command::{Command, CommandKind};
pub use content::ContentPackage;
pub use data_paths::DataPaths;
pub use dispatch::{ScriptHost, TriggerReport};
pub use hooks::{HookBinding, HookRegistry};
pub use host::GameHost;
pub use loader::load_host;
pub use merge::{MergeError, ResolvedDataset, merge};
pub use snapshot::StateSnapshotBridge;
pub use state::EngineState;
