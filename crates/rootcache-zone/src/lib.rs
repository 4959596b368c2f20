//! # Root Zone Store
//!
//! This crate holds the in-memory view of the DNS root zone that the
//! server answers from:
//!
//! - **Record sets**: records grouped by owner name and type
//! - **Delegations**: every NS-owning name with the glue of its NS targets
//! - **Query algorithm**: authoritative answers at the apex, referrals below it
//! - **Snapshots**: one record per line presentation files for warm restarts
//!
//! A [`ZoneStore`] is built once from a flat record list and never mutated
//! afterwards, so it can be shared between any number of readers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rootcache_zone::ZoneStore;
//! use hickory_proto::rr::RecordType;
//!
//! let store = ZoneStore::from_file("root.zone")?;
//! let response = store.query("www.example.com.", RecordType::A, false);
//! assert!(!response.authoritative);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

use std::path::PathBuf;

use hickory_proto::rr::Name;
use thiserror::Error;

pub mod presentation;
pub mod rrset;
pub mod store;

pub use presentation::{parse_record_line, parse_records, LoadedRecords};
pub use rrset::RRset;
pub use store::{DelegationEntry, QueryResponse, ZoneStore};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while building, loading or persisting a zone.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// No records were supplied to the builder.
    #[error("cannot build a zone store from an empty record set")]
    EmptyInput,

    /// The record set contains no NS-owning name.
    #[error("record set contains no delegations")]
    NoDelegations,

    /// A presentation line could not be parsed.
    #[error("record parse error at line {line}: {message}")]
    Parse {
        /// Line number, starting at 1.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Snapshot file does not exist.
    #[error("snapshot not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Snapshot path names a directory.
    #[error("snapshot path is a directory: {}", .0.display())]
    NotAFile(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZoneError {
    /// Creates a new parse error.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

/// Result type for zone operations.
pub type Result<T> = std::result::Result<T, ZoneError>;

// ============================================================================
// Name Helpers
// ============================================================================

/// Returns the index key for `name`: lower case and fully qualified.
pub fn canonical(name: &Name) -> Name {
    let mut name = name.to_lowercase();
    name.set_fqdn(true);
    name
}

/// Parses query text into a canonical name.
///
/// Empty input, whitespace and `"."` all map to the root. Leading dots are
/// ignored. Returns `None` when the text is not a valid domain name.
pub fn canonical_name(text: &str) -> Option<Name> {
    let text = text.trim().trim_start_matches('.');
    if text.is_empty() {
        return Some(Name::root());
    }
    Name::from_ascii(text).ok().map(|name| canonical(&name))
}

/// Returns the top-level label of `name` as a fully qualified name.
///
/// `www.example.com.` becomes `com.`; the root stays the root.
pub fn top_level_label(name: &Name) -> Name {
    if name.num_labels() <= 1 {
        return canonical(name);
    }
    canonical(&name.trim_to(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("").unwrap(), Name::root());
        assert_eq!(canonical_name("   ").unwrap(), Name::root());
        assert_eq!(canonical_name(".").unwrap(), Name::root());

        let com = canonical_name("COM").unwrap();
        assert!(com.is_fqdn());
        assert_eq!(com.to_string(), "com.");

        assert_eq!(canonical_name(".net.").unwrap().to_string(), "net.");
        assert_eq!(
            canonical_name("WWW.Example.COM.").unwrap().to_string(),
            "www.example.com."
        );
    }

    #[test]
    fn test_canonical_name_rejects_garbage() {
        let oversized = format!("{}.com.", "x".repeat(64));
        assert!(canonical_name(&oversized).is_none());
    }

    #[test]
    fn test_top_level_label() {
        let name = canonical_name("www.example.com").unwrap();
        assert_eq!(top_level_label(&name).to_string(), "com.");

        let tld = canonical_name("org.").unwrap();
        assert_eq!(top_level_label(&tld).to_string(), "org.");

        assert!(top_level_label(&Name::root()).is_root());
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            ZoneError::parse(3, "bad ttl").to_string(),
            "record parse error at line 3: bad ttl"
        );
    }
}
