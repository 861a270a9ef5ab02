//! Ratekeeper Common Types
//!
//! Shared types used across the Ratekeeper workspace: rate snapshots, the
//! upstream error taxonomy, the locale-aware numeric parser and clocks.

pub mod error;
pub mod numeric;
pub mod snapshot;
pub mod time;

pub use error::*;
pub use numeric::parse_locale_number;
pub use snapshot::*;
pub use time::*;
