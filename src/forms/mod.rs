pub mod build;
pub mod webhook;

pub use build::*;
pub use webhook::*;
