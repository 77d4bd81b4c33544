// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The seams between the engine core and its external collaborators. The core
//! never touches samples; it only issues schedule/seek/stop commands against
//! these traits and polls the clock for deadlines.

use crate::ParameterType;

/// One of the two interchangeable track-sets that a [Transport] can schedule
/// independently. The loop scheduler plays on one deck while pre-arming the
/// other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Deck {
    #[default]
    A,
    B,
}
impl Deck {
    pub fn other(&self) -> Self {
        match self {
            Deck::A => Deck::B,
            Deck::B => Deck::A,
        }
    }
}
impl std::fmt::Display for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Deck::A => write!(f, "A"),
            Deck::B => write!(f, "B"),
        }
    }
}

/// A free-running, monotonic, read-only clock with an arbitrary epoch. In
/// production this is the audio hardware clock; in tests it's a counter.
pub trait Clock: std::fmt::Debug {
    fn now(&self) -> ParameterType;
}

/// The playback transport. It owns audio decoding and mixing; the engine sees
/// only elapsed position, play state, and the deck-scheduling primitives that
/// the loop scheduler uses.
pub trait Transport: std::fmt::Debug {
    fn play(&mut self);

    /// Stops playback. Any armed-but-uncommitted deck schedule is expected to
    /// be cancelled by the caller before this.
    fn stop(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);

    /// Elapsed position in the song, in seconds.
    fn position(&self) -> ParameterType;
    fn seek(&mut self, seconds: ParameterType);

    /// Total duration of the loaded song, in seconds.
    fn duration(&self) -> ParameterType;

    fn is_playing(&self) -> bool;

    /// True when the transport is cycling on its own without a meaningful song
    /// position, e.g. previewing a clip. Captured taps can't be re-homed to a
    /// successor phrase in this mode.
    fn is_free_looping(&self) -> bool {
        false
    }

    /// Tells the deck to begin playing when the clock reaches `clock_time`.
    fn schedule_start(&mut self, deck: Deck, clock_time: ParameterType);

    /// Pre-positions the deck's playback cursor at a song-local offset, to
    /// take effect at its scheduled start.
    fn set_playback_offset(&mut self, deck: Deck, seconds: ParameterType);

    /// Tells the deck to stop playing when the clock reaches `clock_time`.
    fn schedule_end(&mut self, deck: Deck, clock_time: ParameterType);

    /// Stops the deck immediately and clears anything scheduled on it.
    fn stop_deck(&mut self, deck: Deck);
}

#[cfg(test)]
mod tests {
    use super::Deck;

    #[test]
    fn deck_other_swaps() {
        assert_eq!(Deck::A.other(), Deck::B);
        assert_eq!(Deck::B.other(), Deck::A);
        assert_eq!(Deck::A.other().other(), Deck::A);
    }
}
