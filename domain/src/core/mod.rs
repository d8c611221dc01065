//! Core domain concepts shared across all subdomains.
//!
//! - [`error::ErrorCode`]: the stable error taxonomy
//! - [`error::ErrorSeverity`]: severity tiers used by the error ledger

pub mod error;
