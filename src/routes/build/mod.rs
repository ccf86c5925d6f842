pub mod create;
pub mod events;
pub mod rollback;
pub mod status;
