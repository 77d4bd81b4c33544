// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Chartforge is a beat-accurate chart editing and live-capture engine for
//! rhythm games. It manages a song's musical-time structure, schedules
//! seamless section loops across two playback decks, and captures live taps
//! into quantized timing events.

pub use chartforge_core as core;
pub use chartforge_engine as engine;
pub use chartforge_settings as settings;
