// Copyright (c) 2023 Mike Tsao. All rights reserved.

use chartforge_core::{
    traits::{Clock, Deck, Transport},
    ParameterType,
};

/// A deterministic clock used for offline simulation. Advances only when
/// told to, by a fixed amount per tick.
#[derive(Debug)]
pub struct OfflineClock {
    now: ParameterType,
    tick_seconds: ParameterType,
}
impl OfflineClock {
    pub fn new_with(tick_seconds: ParameterType) -> Self {
        Self {
            now: 0.0,
            tick_seconds,
        }
    }

    pub fn advance(&mut self) {
        self.now += self.tick_seconds;
    }

    pub fn tick_seconds(&self) -> ParameterType {
        self.tick_seconds
    }
}
impl Clock for OfflineClock {
    fn now(&self) -> ParameterType {
        self.now
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct DeckState {
    offset: ParameterType,
    start_at: Option<ParameterType>,
    end_at: Option<ParameterType>,
    playing: bool,
}

/// [SimulatedTransport] stands in for the real audio transport during offline
/// runs and tests. It honors deck schedules on [advance](Self::advance): when
/// an armed deck's start time comes due, that deck takes over and the song
/// position jumps to the deck's offset.
#[derive(Debug)]
pub struct SimulatedTransport {
    duration: ParameterType,
    position: ParameterType,
    playing: bool,
    paused: bool,
    free_looping: bool,
    decks: [DeckState; 2],
}
impl SimulatedTransport {
    pub fn new_with(duration: ParameterType) -> Self {
        Self {
            duration,
            position: 0.0,
            playing: false,
            paused: false,
            free_looping: false,
            decks: [DeckState::default(); 2],
        }
    }

    fn deck_index(deck: Deck) -> usize {
        match deck {
            Deck::A => 0,
            Deck::B => 1,
        }
    }

    pub fn set_free_looping(&mut self, free_looping: bool) {
        self.free_looping = free_looping;
    }

    pub fn deck_offset(&self, deck: Deck) -> ParameterType {
        self.decks[Self::deck_index(deck)].offset
    }

    pub fn deck_is_armed(&self, deck: Deck) -> bool {
        self.decks[Self::deck_index(deck)].start_at.is_some()
    }

    /// Moves simulated time forward by `dt` and applies any deck schedules
    /// that have come due at `clock_now`.
    pub fn advance(&mut self, dt: ParameterType, clock_now: ParameterType) {
        if self.playing && !self.paused {
            self.position += dt;
        }
        for deck in &mut self.decks {
            if let Some(start_at) = deck.start_at {
                if clock_now >= start_at {
                    deck.start_at = None;
                    deck.playing = true;
                    self.position = deck.offset + (clock_now - start_at);
                    self.playing = true;
                }
            }
            if let Some(end_at) = deck.end_at {
                if clock_now >= end_at {
                    deck.end_at = None;
                    deck.playing = false;
                }
            }
        }
    }
}
impl Transport for SimulatedTransport {
    fn play(&mut self) {
        self.playing = true;
        self.paused = false;
    }
    fn stop(&mut self) {
        self.playing = false;
        self.paused = false;
        for deck in &mut self.decks {
            *deck = DeckState::default();
        }
    }
    fn pause(&mut self) {
        self.paused = true;
    }
    fn resume(&mut self) {
        self.paused = false;
    }
    fn position(&self) -> ParameterType {
        self.position
    }
    fn seek(&mut self, seconds: ParameterType) {
        self.position = seconds;
    }
    fn duration(&self) -> ParameterType {
        self.duration
    }
    fn is_playing(&self) -> bool {
        self.playing && !self.paused
    }
    fn is_free_looping(&self) -> bool {
        self.free_looping
    }
    fn schedule_start(&mut self, deck: Deck, clock_time: ParameterType) {
        self.decks[Self::deck_index(deck)].start_at = Some(clock_time);
    }
    fn set_playback_offset(&mut self, deck: Deck, seconds: ParameterType) {
        self.decks[Self::deck_index(deck)].offset = seconds;
    }
    fn schedule_end(&mut self, deck: Deck, clock_time: ParameterType) {
        self.decks[Self::deck_index(deck)].end_at = Some(clock_time);
    }
    fn stop_deck(&mut self, deck: Deck) {
        self.decks[Self::deck_index(deck)] = DeckState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn clock_advances_by_fixed_ticks() {
        let mut clock = OfflineClock::new_with(0.25);
        assert!(approx_eq!(f64, clock.now(), 0.0, epsilon = 1e-12));
        clock.advance();
        clock.advance();
        assert!(approx_eq!(f64, clock.now(), 0.5, epsilon = 1e-12));
    }

    #[test]
    fn armed_deck_takes_over_at_its_start_time() {
        let mut transport = SimulatedTransport::new_with(60.0);
        transport.play();
        transport.set_playback_offset(Deck::B, 4.0);
        transport.schedule_start(Deck::B, 10.0);

        transport.advance(1.0, 9.0);
        assert!(transport.deck_is_armed(Deck::B));

        transport.advance(1.0, 10.5);
        assert!(!transport.deck_is_armed(Deck::B));
        // Position lands half a second past the deck's offset, because the
        // schedule came due half a second before this poll.
        assert!(approx_eq!(f64, transport.position(), 4.5, epsilon = 1e-9));
    }

    #[test]
    fn stop_clears_deck_schedules() {
        let mut transport = SimulatedTransport::new_with(60.0);
        transport.play();
        transport.schedule_start(Deck::A, 5.0);
        transport.stop();
        assert!(!transport.deck_is_armed(Deck::A));
        assert!(!transport.is_playing());
    }
}
