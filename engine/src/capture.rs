// Copyright (c) 2023 Mike Tsao. All rights reserved.

use chartforge_core::{
    structure::SongStructure,
    time::BeatAddress,
    traits::Transport,
    ParameterType,
};
use rustc_hash::FxHashMap;
use strum_macros::{Display, EnumIter};
use thiserror::Error;

/// Impacts from different limbs closer together than this are one rhythmic
/// event, not two.
pub const COALESCE_WINDOW_SECONDS: f64 = 0.01;

/// The body part that produced an impact.
#[derive(Clone, Copy, Debug, Display, EnumIter, Eq, Hash, PartialEq)]
pub enum Limb {
    LeftHand,
    RightHand,
    LeftFoot,
    RightFoot,
}

/// Things that can go wrong while capturing a tap. A capture error aborts
/// that one capture; no event is created and prior events are untouched.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CaptureError {
    #[error("no phrase covers the current transport position")]
    NoActivePhrase,

    #[error("tap overflows its phrase and no successor phrase can take it")]
    OverflowWithNoSuccessor,

    #[error("the transport is not playing")]
    NotPlaying,
}

/// One captured rhythmic event. `start_time` is phrase-relative and keeps
/// full precision; `address` is its quantized position on the beat grid.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingEvent {
    /// Unique within the owning sequence.
    pub id: usize,
    pub start_time: ParameterType,
    pub duration: Option<ParameterType>,
    /// All limbs that contributed, first striker first.
    pub limbs: Vec<Limb>,
    pub address: Option<BeatAddress>,
}

/// The per-phrase list of timing events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimingSequence {
    pub events: Vec<TimingEvent>,
}
impl TimingSequence {
    /// Ids only ever grow: one past the largest id ever handed out here.
    pub fn next_event_id(&self) -> usize {
        self.events.iter().map(|e| e.id).max().map_or(0, |id| id + 1)
    }

    pub fn event(&self, id: usize) -> Option<&TimingEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    fn event_mut(&mut self, id: usize) -> Option<&mut TimingEvent> {
        self.events.iter_mut().find(|e| e.id == id)
    }
}

/// The gameplay payload riding on a timing event. Alignment with the timing
/// sequence is by shared event id, not by list position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GameplayNote {
    pub event_id: usize,
    pub limb: Limb,
}

/// The per-phrase list of gameplay payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GameplayPattern {
    pub notes: Vec<GameplayNote>,
}

/// What a successful capture did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureOutcome {
    /// A new event was opened in the given phrase's sequence.
    New { phrase_id: usize, event_id: usize },
    /// The impact folded into the already-open event as an extra limb hint.
    Coalesced { phrase_id: usize, event_id: usize },
}

/// [CaptureEngine] converts raw elapsed-time taps into quantized timing
/// events: near-simultaneous impacts from different limbs coalesce into one
/// event, and taps that land past their phrase's end are re-homed into the
/// successor phrase.
#[derive(Debug, Default)]
pub struct CaptureEngine {
    last_impact_time: Option<ParameterType>,
    last_limb: Option<Limb>,
    /// Smallest gap ever observed between consecutive impacts, per limb.
    /// Telemetry only; it never affects classification.
    min_gap_per_limb: FxHashMap<Limb, ParameterType>,
    /// (phrase id, event id) of the event a coalescible impact would join.
    open_event: Option<(usize, usize)>,
    sequences: FxHashMap<usize, TimingSequence>,
    patterns: FxHashMap<usize, GameplayPattern>,
}
impl CaptureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self, phrase_id: usize) -> Option<&TimingSequence> {
        self.sequences.get(&phrase_id)
    }

    pub fn pattern(&self, phrase_id: usize) -> Option<&GameplayPattern> {
        self.patterns.get(&phrase_id)
    }

    pub fn min_observed_gap(&self, limb: Limb) -> Option<ParameterType> {
        self.min_gap_per_limb.get(&limb).copied()
    }

    /// Handles one impact at the transport's current elapsed position.
    pub fn record_impact(
        &mut self,
        limb: Limb,
        transport: &dyn Transport,
        structure: &SongStructure,
    ) -> Result<CaptureOutcome, CaptureError> {
        if !transport.is_playing() {
            return Err(CaptureError::NotPlaying);
        }
        let position = transport.position();

        if let Some(previous) = self.last_impact_time {
            let gap = position - previous;
            if gap >= 0.0 {
                let entry = self.min_gap_per_limb.entry(limb).or_insert(gap);
                if gap < *entry {
                    *entry = gap;
                }
            }
        }

        // Different limb inside the window: this is the same rhythmic event,
        // not a new one.
        if let (Some(previous), Some(previous_limb), Some((open_phrase, open_id))) =
            (self.last_impact_time, self.last_limb, self.open_event)
        {
            // A backwards seek makes the gap negative; that is never the same
            // rhythmic event.
            let gap = position - previous;
            if (0.0..=COALESCE_WINDOW_SECONDS).contains(&gap) && limb != previous_limb {
                if let Some(event) = self
                    .sequences
                    .get_mut(&open_phrase)
                    .and_then(|s| s.event_mut(open_id))
                {
                    if !event.limbs.contains(&limb) {
                        event.limbs.push(limb);
                    }
                    self.last_impact_time = Some(position);
                    self.last_limb = Some(limb);
                    return Ok(CaptureOutcome::Coalesced {
                        phrase_id: open_phrase,
                        event_id: open_id,
                    });
                }
            }
        }

        let (si, pi) = structure
            .find_phrase_at(position)
            .map_err(|_| CaptureError::NoActivePhrase)?;
        let phrase = &structure.sections[si].phrases[pi];
        let mut target_phrase_id = phrase.phrase_id;
        let mut relative = position - phrase.start_time;
        let mut address =
            BeatAddress::from_phrase_relative(relative, phrase.bpm, phrase.time_signature)
                .map_err(|_| CaptureError::NoActivePhrase)?;

        // A tap at or past the phrase's end belongs to the successor phrase,
        // under a freshly minted id there.
        if relative >= phrase.duration_seconds || address.bar >= phrase.duration_bars {
            if transport.is_free_looping() {
                return Err(CaptureError::OverflowWithNoSuccessor);
            }
            let next = structure
                .phrase_after(phrase.phrase_id)
                .ok_or(CaptureError::OverflowWithNoSuccessor)?;
            target_phrase_id = next.phrase_id;
            relative = (position - next.start_time).max(0.0);
            address = BeatAddress::from_phrase_relative(relative, next.bpm, next.time_signature)
                .map_err(|_| CaptureError::NoActivePhrase)?;
        }

        let sequence = self.sequences.entry(target_phrase_id).or_default();
        let event_id = sequence.next_event_id();
        sequence.events.push(TimingEvent {
            id: event_id,
            start_time: relative,
            duration: None,
            limbs: vec![limb],
            address: Some(address),
        });
        self.patterns
            .entry(target_phrase_id)
            .or_default()
            .notes
            .push(GameplayNote { event_id, limb });

        self.open_event = Some((target_phrase_id, event_id));
        self.last_impact_time = Some(position);
        self.last_limb = Some(limb);
        Ok(CaptureOutcome::New {
            phrase_id: target_phrase_id,
            event_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedTransport;
    use chartforge_core::{structure::SongStructure, time::TimeSignature, traits::Transport};
    use float_cmp::approx_eq;
    use more_asserts::assert_le;

    fn playing_transport(position: f64) -> SimulatedTransport {
        let mut transport = SimulatedTransport::new_with(120.0);
        transport.play();
        transport.seek(position);
        transport
    }

    fn song() -> SongStructure {
        SongStructure::new_spanning(120.0, 120.0, TimeSignature::default()).unwrap()
    }

    #[test]
    fn stopped_transport_rejects_impacts() {
        let mut capture = CaptureEngine::new();
        let transport = SimulatedTransport::new_with(120.0);
        assert_eq!(
            capture.record_impact(Limb::LeftHand, &transport, &song()),
            Err(CaptureError::NotPlaying)
        );
    }

    #[test]
    fn different_limbs_in_window_coalesce() {
        let mut capture = CaptureEngine::new();
        let structure = song();
        let mut transport = playing_transport(4.0);
        capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        transport.seek(4.005);
        let outcome = capture
            .record_impact(Limb::RightHand, &transport, &structure)
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Coalesced { .. }));

        let sequence = capture.sequence(0).unwrap();
        assert_eq!(sequence.events.len(), 1);
        assert_eq!(
            sequence.events[0].limbs,
            vec![Limb::LeftHand, Limb::RightHand]
        );
    }

    #[test]
    fn same_limb_in_window_stays_separate() {
        let mut capture = CaptureEngine::new();
        let structure = song();
        let mut transport = playing_transport(4.0);
        capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        transport.seek(4.005);
        let outcome = capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::New { .. }));
        assert_eq!(capture.sequence(0).unwrap().events.len(), 2);
    }

    #[test]
    fn events_get_increasing_ids_and_aligned_payloads() {
        let mut capture = CaptureEngine::new();
        let structure = song();
        let mut transport = playing_transport(1.0);
        for (i, limb) in [Limb::LeftFoot, Limb::LeftFoot, Limb::RightFoot]
            .into_iter()
            .enumerate()
        {
            transport.seek(1.0 + i as f64);
            capture.record_impact(limb, &transport, &structure).unwrap();
        }
        let sequence = capture.sequence(0).unwrap();
        let pattern = capture.pattern(0).unwrap();
        assert_eq!(sequence.events.len(), 3);
        assert_eq!(pattern.notes.len(), 3);
        for (event, note) in sequence.events.iter().zip(pattern.notes.iter()) {
            assert_eq!(event.id, note.event_id);
        }
        assert_eq!(sequence.next_event_id(), 3);
    }

    #[test]
    fn quantization_keeps_raw_time_alongside_the_address() {
        let mut capture = CaptureEngine::new();
        let structure = song();
        // 120 BPM 4/4: 5.13s is bar 2, beat 2, and a bit.
        let transport = playing_transport(5.13);
        capture
            .record_impact(Limb::RightHand, &transport, &structure)
            .unwrap();
        let event = &capture.sequence(0).unwrap().events[0];
        assert!(approx_eq!(f64, event.start_time, 5.13, epsilon = 1e-9));
        let address = event.address.unwrap();
        assert_eq!(address.bar, 2);
        assert_eq!(address.beat, 2);
    }

    #[test]
    fn overflow_rehomes_into_next_phrase() {
        // Two phrases, [0, 8) and [8, 120). A tap at 8.001, found in the
        // first phrase only by boundary drift, belongs to the second.
        let mut structure = song();
        let section = &mut structure.sections[0];
        let mut second = section.phrases[0].clone();
        section.phrases[0].set_end_time_keep_start_time(8.0);
        section.phrases[0].recalculate_bars().unwrap();
        second.set_start_time_keep_end_time(8.0);
        second.recalculate_bars().unwrap();
        second.name = "Phrase 2".to_string();
        section.phrases.push(second);
        structure.renumber_phrases();

        // Lie about the first phrase's bar count so a late tap quantizes past
        // its final bar, as tempo drift produces in practice.
        structure.sections[0].phrases[0].duration_bars = 3;

        let mut capture = CaptureEngine::new();
        let transport = playing_transport(7.5);
        let outcome = capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        // Bar 3 of a 3-bar phrase: re-homed under a fresh id in phrase 1.
        assert_eq!(
            outcome,
            CaptureOutcome::New {
                phrase_id: 1,
                event_id: 0
            }
        );
        assert!(capture.sequence(0).is_none());
        assert_eq!(capture.pattern(1).unwrap().notes.len(), 1);
    }

    #[test]
    fn overflow_without_successor_is_an_error() {
        let structure = song();
        // The single phrase claims fewer bars than its span holds.
        let mut structure = structure;
        structure.sections[0].phrases[0].duration_bars = 2;
        let mut capture = CaptureEngine::new();
        let transport = playing_transport(5.0);
        assert_eq!(
            capture.record_impact(Limb::LeftHand, &transport, &structure),
            Err(CaptureError::OverflowWithNoSuccessor)
        );
        assert!(capture.sequence(0).is_none());
    }

    #[test]
    fn free_loop_mode_drops_overflow() {
        let mut structure = song();
        structure.sections[0].phrases[0].duration_bars = 2;
        let mut capture = CaptureEngine::new();
        let mut transport = playing_transport(5.0);
        transport.set_free_looping(true);
        assert_eq!(
            capture.record_impact(Limb::LeftHand, &transport, &structure),
            Err(CaptureError::OverflowWithNoSuccessor)
        );
    }

    #[test]
    fn tap_after_backwards_seek_never_coalesces() {
        let mut capture = CaptureEngine::new();
        let structure = song();
        let mut transport = playing_transport(10.0);
        capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        // Rewind far behind the open event and tap a different limb.
        transport.seek(2.0);
        let outcome = capture
            .record_impact(Limb::RightHand, &transport, &structure)
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::New { .. }));
        let sequence = capture.sequence(0).unwrap();
        assert_eq!(sequence.events.len(), 2);
        assert_eq!(sequence.events[0].limbs, vec![Limb::LeftHand]);
        assert!(approx_eq!(f64, sequence.events[1].start_time, 2.0));
    }

    #[test]
    fn min_gap_telemetry_tracks_smallest_gap() {
        let mut capture = CaptureEngine::new();
        let structure = song();
        let mut transport = playing_transport(1.0);
        capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        transport.seek(1.5);
        capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        transport.seek(1.6);
        capture
            .record_impact(Limb::LeftHand, &transport, &structure)
            .unwrap();
        let gap = capture.min_observed_gap(Limb::LeftHand).unwrap();
        assert_le!(gap, 0.1 + 1e-9);
        assert!(capture.min_observed_gap(Limb::RightFoot).is_none());
    }
}
