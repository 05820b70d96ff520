pub mod sandbox;

pub use sandbox::{IsolateBox, IsolateResult, RunOptions, RunStatus, SandboxError};
