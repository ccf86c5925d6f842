pub(crate) mod json;
mod kv;

pub use json::*;
pub use kv::KvManager;
