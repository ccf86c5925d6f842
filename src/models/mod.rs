mod build;
mod caller;
mod event;
mod job;
mod project;
mod webhook;

pub use build::*;
pub use caller::*;
pub use event::*;
pub use job::*;
pub use project::*;
pub use webhook::*;
