pub mod outbox;
pub mod session_cache;
