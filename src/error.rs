use thiserror::Error;

/// Why an insert could not issue a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    /// Every handle below `limit` is already taken. Handles are never
    /// reused, so the owner has to start a fresh cache.
    #[error("handle space exhausted after {limit} unique entries")]
    HandleSpaceExhausted { limit: u32 },
}
