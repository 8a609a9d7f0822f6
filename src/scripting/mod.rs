//! User scripts: the Rhai API they see, how they run, and reactions to their output.

pub mod api;
pub mod engine;
pub mod hooks;

pub use api::{register_api, CharacterHandle, WorldHandle};
pub use engine::{Execution, Outcome, ScriptConfig, ScriptEngine};
pub use hooks::{OutputHooks, OutputPattern};
