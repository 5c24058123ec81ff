//! Keyring: the canonical persistent state, and its sole writer.

mod keyid;
mod store;
mod types;

pub use keyid::key_id_for;
pub use store::KeyringStore;
pub use types::{
    KeyRecord, KeyStatus, Keyring, RotationEvent, RotationEventKind, UsageSnapshot,
    KEYRING_VERSION, MAX_LOG_ENTRIES,
};
