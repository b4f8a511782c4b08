//! Grid record types

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Prefix of ledger business ids created by this client
pub const RECORD_ID_PREFIX: &str = "grid-";

/// Ledger business identifier of a record (`grid-<unix-millis>`)
///
/// The same string is used as the ciphertext reference: the contract
/// resolves the encrypted load handle by business id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Build the id for a record created at `millis`
    pub fn from_millis(millis: u64) -> Self {
        Self(format!("{RECORD_ID_PREFIX}{millis}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric creation-time suffix, if the id follows the `grid-` scheme
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix(RECORD_ID_PREFIX)?.parse().ok()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidRecordId("empty id".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One encrypted energy-grid entry, as last seen on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub name: String,
    pub creator: Address,
    /// Ledger-assigned creation timestamp (unix seconds)
    pub created_at: u64,
    /// Public value 1
    pub capacity: u64,
    /// Public value 2
    pub aux_public: u64,
    /// Business id used to look up the encrypted load handle
    pub ciphertext_ref: RecordId,
    pub verified: bool,
    /// Only meaningful when `verified` is true
    pub clear_load: u64,
}

impl Record {
    /// Ledger-confirmed load, if any
    pub fn confirmed_load(&self) -> Option<u64> {
        self.verified.then_some(self.clear_load)
    }

    /// Classify the load for display, given a locally decrypted value
    ///
    /// Ledger cleartext always wins over a provisional value.
    pub fn load_reading(&self, provisional: Option<u64>) -> LoadReading {
        match (self.confirmed_load(), provisional) {
            (Some(value), _) => LoadReading::Confirmed(value),
            (None, Some(value)) => LoadReading::Provisional(value),
            (None, None) => LoadReading::Encrypted,
        }
    }

    /// Reconcile a freshly fetched copy against the last confirmed cleartext
    ///
    /// `verified` never goes back to false: a stale read that reports an
    /// unverified record keeps the cleartext confirmed earlier.
    pub fn reconcile(mut self, confirmed: Option<u64>) -> Record {
        if let (Some(clear_load), false) = (confirmed, self.verified) {
            self.verified = true;
            self.clear_load = clear_load;
        }
        self
    }

    /// Case-insensitive match on name or creator address
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&term)
            || format!("{:#x}", self.creator).contains(&term)
    }
}

/// What is known about a record's load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LoadReading {
    /// Accepted by the ledger; authoritative
    Confirmed(u64),
    /// Decrypted by the co-processor in this session but not confirmed on-chain
    Provisional(u64),
    /// Only the ciphertext handle is known
    Encrypted,
}

impl LoadReading {
    pub fn value(&self) -> Option<u64> {
        match self {
            LoadReading::Confirmed(v) | LoadReading::Provisional(v) => Some(*v),
            LoadReading::Encrypted => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, LoadReading::Confirmed(_))
    }
}

impl fmt::Display for LoadReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadReading::Confirmed(v) => write!(f, "{v} MW (verified)"),
            LoadReading::Provisional(v) => write!(f, "{v} MW (decrypted, unverified)"),
            LoadReading::Encrypted => f.write_str("encrypted"),
        }
    }
}
