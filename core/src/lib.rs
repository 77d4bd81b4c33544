// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Fundamental structs and traits for musical-time bookkeeping.

use thiserror::Error;

/// The [structure] module holds the Section/Phrase hierarchy and the song-level
/// queries over it.
pub mod structure;
/// The [time] module handles meter, tempo derivation, and beat-grid
/// quantization.
pub mod time;
/// The [traits] module describes the seams between the engine and its external
/// collaborators (transport, clock).
pub mod traits;

/// Use [ParameterType] for tempo- and time-valued quantities (BPM, seconds)
/// where a plain f64 would do but a name helps readability.
pub type ParameterType = f64;

/// Things that can go wrong while querying or mutating the song structure.
///
/// Mutations validate their preconditions before touching anything, so a
/// returned error always means the structure is unchanged.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StructureError {
    /// No segment matched the query (empty structure, unknown id, or a time
    /// outside the song).
    #[error("no segment matches the query")]
    NotFound,

    /// A meter or tempo value was zero or negative, which would make the
    /// time/bar conversions divide by zero.
    #[error("meter or tempo value is zero or negative")]
    InvalidMeter,

    /// Applying the operation would leave the structure violating one of its
    /// invariants, e.g. deleting the last remaining section.
    #[error("operation would break a structure invariant: {0}")]
    WouldBreakInvariant(String),
}
