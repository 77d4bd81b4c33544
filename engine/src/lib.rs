// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The live-editing engine: structure mutation, seamless loop scheduling, and
//! tap capture, all driven by a single cooperative [Session] tick.
//!
//! [Session]: crate::session::Session

/// The [capture] module turns raw impact signals into quantized timing events.
pub mod capture;
/// The [editor] module mutates the Section/Phrase hierarchy while preserving
/// its invariants.
pub mod editor;
/// The [looper] module repeats a bounded segment with no audible seam by
/// double-buffering two transport decks.
pub mod looper;
/// The [session] module is the per-tick driver that applies commands, drains
/// the impact queue, and polls the loop scheduler.
pub mod session;
/// The [transport] module provides a deterministic offline transport and
/// clock for simulation and tests.
pub mod transport;
