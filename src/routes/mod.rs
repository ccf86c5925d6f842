pub mod admin;
pub mod build;
pub mod health_check;
pub mod stream;
pub mod webhook;

pub use health_check::*;
