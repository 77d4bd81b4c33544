// Copyright (c) 2023 Mike Tsao. All rights reserved.

use chartforge_core::{
    structure::SegmentSpan,
    traits::{Deck, Transport},
    ParameterType,
};
use thiserror::Error;

/// Things that can go wrong while arming a loop. Scheduling failures fail
/// safe: they disable the loop, never the transport.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SchedulingError {
    #[error("loop window is zero or negative")]
    ZeroOrNegativeLoopWindow,
}

/// Where the scheduler is in its arm/commit cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    /// The standby deck is scheduled to take over at a future clock deadline.
    Armed,
    /// The deadline passed and the decks swapped roles. Transient: the
    /// scheduler re-arms in the same tick.
    Committed,
}

/// A record of one seam: the clock deadline at which the standby deck took
/// over, and which deck is now active.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopCommit {
    pub at: ParameterType,
    pub now_active: Deck,
}

/// [LoopScheduler] repeats a bounded time span with no audible gap by keeping
/// one deck playing while the other is pre-scheduled to start at the loop's
/// start offset at a precise future clock time. At the deadline the roles
/// swap and the next deadline is derived by adding exactly one loop duration
/// to the previous one, never by re-sampling the clock, so scheduling error
/// does not accumulate across iterations.
#[derive(Debug, Default)]
pub struct LoopScheduler {
    state: LoopState,
    span: SegmentSpan,
    active_deck: Deck,
    armed_deadline: Option<ParameterType>,
}
impl LoopScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }
    pub fn active_deck(&self) -> Deck {
        self.active_deck
    }
    pub fn armed_deadline(&self) -> Option<ParameterType> {
        self.armed_deadline
    }
    pub fn span(&self) -> SegmentSpan {
        self.span
    }

    fn arm(&mut self, transport: &mut dyn Transport, deadline: ParameterType) {
        let standby = self.active_deck.other();
        transport.set_playback_offset(standby, self.span.start);
        transport.schedule_start(standby, deadline);
        transport.schedule_end(self.active_deck, deadline);
        self.armed_deadline = Some(deadline);
        self.state = LoopState::Armed;
    }

    /// Starts looping the given span. The first deadline is measured from the
    /// clock: now plus the time left until the loop's end boundary.
    pub fn enable(
        &mut self,
        span: SegmentSpan,
        transport: &mut dyn Transport,
        clock_now: ParameterType,
    ) -> Result<(), SchedulingError> {
        if span.duration() <= 0.0 {
            self.disable(transport);
            return Err(SchedulingError::ZeroOrNegativeLoopWindow);
        }
        let remaining = span.end - transport.position();
        self.span = span;
        self.arm(transport, clock_now + remaining);
        Ok(())
    }

    /// Re-points an armed standby deck at a new target without disturbing the
    /// committed active deck. A target whose end boundary has already passed
    /// is never armed: arming is abandoned and the standby deck stopped.
    pub fn retarget(
        &mut self,
        span: SegmentSpan,
        transport: &mut dyn Transport,
        clock_now: ParameterType,
    ) -> Result<(), SchedulingError> {
        if self.state != LoopState::Armed {
            return self.enable(span, transport, clock_now);
        }
        let remaining = span.end - transport.position();
        if span.duration() <= 0.0 || remaining <= 0.0 {
            transport.stop_deck(self.active_deck.other());
            self.armed_deadline = None;
            self.state = LoopState::Idle;
            return Err(SchedulingError::ZeroOrNegativeLoopWindow);
        }
        self.span = span;
        self.arm(transport, clock_now + remaining);
        Ok(())
    }

    /// Polls the clock once. At most one commit fires per tick: a missed
    /// deadline produces a late swap on this poll, never a catch-up
    /// multi-swap.
    pub fn tick(
        &mut self,
        transport: &mut dyn Transport,
        clock_now: ParameterType,
    ) -> Option<LoopCommit> {
        if self.state != LoopState::Armed {
            return None;
        }
        let deadline = self.armed_deadline?;
        if clock_now < deadline {
            return None;
        }
        self.state = LoopState::Committed;
        self.active_deck = self.active_deck.other();
        let commit = LoopCommit {
            at: deadline,
            now_active: self.active_deck,
        };
        self.arm(transport, deadline + self.span.duration());
        Some(commit)
    }

    /// Stops looping: the standby deck is stopped immediately and both
    /// deadlines cleared. The active deck keeps playing.
    pub fn disable(&mut self, transport: &mut dyn Transport) {
        transport.stop_deck(self.active_deck.other());
        self.armed_deadline = None;
        self.state = LoopState::Idle;
    }
}
