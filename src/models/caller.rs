use serde::{Deserialize, Serialize};

/// Authenticated principal extracted from the signed request headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
}
