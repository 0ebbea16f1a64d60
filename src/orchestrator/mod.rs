pub mod controller;
pub mod state;

pub use controller::{TestOrchestrator, TestSnapshot};
pub use state::{dispatch_key, Key, KeyAction, Phase};
