//! grid-core: Core types for confidential energy-grid load records
//!
//! A record publishes its name, creator, capacity and timestamp in the clear,
//! while the measured load is stored on-chain as an FHE ciphertext. The load
//! only becomes authoritative cleartext after the ledger contract accepts a
//! decryption proof for it ("verification").
//!
//! # Confidentiality Model
//!
//! | Information | Public on the ledger |
//! |-------------|----------------------|
//! | Record name, creator, timestamp | **YES** |
//! | Capacity (public value 1) | **YES** |
//! | Load before verification | NO - FHE ciphertext handle only |
//! | Load after verification | **YES** - cleartext accepted by the contract |
//!
//! A load value decrypted locally but not yet accepted by the ledger is
//! *provisional*. [`LoadReading`] keeps the two cases apart so nothing
//! downstream can mistake one for the other.
//!
//! This crate has no I/O beyond config files; the ledger and co-processor
//! plumbing lives in `grid-client`.

mod analysis;
mod config;
mod error;
mod record;
mod status;

pub use analysis::{analyze, GridAnalysis, GridStatistics};
pub use config::GridConfig;
pub use error::Error;
pub use record::{LoadReading, Record, RecordId, RECORD_ID_PREFIX};
pub use status::{OperationStatus, StatusKind};

pub type Result<T> = std::result::Result<T, Error>;

/// Constants shared between the client and the contract ABI
pub mod constants {
    /// Descriptive tag attached to every record on creation
    pub const RECORD_TAG: &str = "Energy Grid Load Data";

    /// Second public value, unused by grid records and always written as zero
    pub const AUX_PUBLIC_DEFAULT: u64 = 0;

    /// Largest load the co-processor can encrypt (32-bit FHE integer)
    pub const MAX_ENCRYPTED_LOAD: u64 = u32::MAX as u64;

    /// Minimum accepted capacity
    pub const MIN_CAPACITY: u64 = 1;
}
