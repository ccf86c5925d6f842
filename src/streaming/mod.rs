mod hub;

pub use hub::{StreamHub, StreamKey, StreamRole};
