//==------------------------------------------------------------------------==//
//                                  Relay
//      This file is distributed under the APACHE License, Version 2.0.
//                         See LICENSE for details.
//==------------------------------------------------------------------------==//

//! A lock-free concurrent hash map from positive 32-bit integer keys to
//! positive 32-bit integer values. The map grows by linking progressively
//! larger tables into a forward chain and migrating live entries across,
//! with every thread that touches an in-flight slot helping to complete
//! the move.

pub mod relaymap;
mod sync;
mod util;

pub use relaymap::RelayMap;

/// Error for arguments which fall outside the range the map can represent.
/// A caller error is reported before anything is written, so the map is
/// left untouched.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Keys are strictly positive; zero marks an unclaimed key cell.
    #[error("keys must be positive, but got {0}")]
    KeyOutOfRange(i32),
    /// Values are strictly positive and below `i32::MAX`; the map reserves
    /// `i32::MAX`, `i32::MIN`, and the sign bit for its own slot states.
    #[error("values must be positive and below i32::MAX, but got {0}")]
    ValueOutOfRange(i32),
}
