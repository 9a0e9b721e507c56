//! Content-addressed objects.
//!
//! - [`ObjectIdentifier`] - SHA-256 digest plus size of an immutable blob
//! - [`ObjectStore`] - per-page value rows and entry references

mod id;
mod store;

pub use id::{ContentHasher, ObjectIdentifier};
pub use store::{ObjectStore, FRAGMENT_SIZE};
