//! UUIDv7 helpers.
//!
//! Job and image ids are UUIDv7 so that their natural byte order follows
//! creation time, which keeps listings and tie-breaks stable.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
