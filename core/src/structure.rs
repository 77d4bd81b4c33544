// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    time::{bpm_for_duration, seconds_per_bar, TimeSignature},
    ParameterType, StructureError,
};
#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Adjacent segments are allowed to disagree about their shared boundary by up
/// to this much before we call it a gap or an overlap.
pub const CONTIGUITY_EPSILON: f64 = 1e-4;

/// [Phrase] is the leaf time unit. It carries its own tempo and meter, and it
/// is the only level of the hierarchy that stores explicit times; everything a
/// [Section] reports is derived from its phrases.
///
/// `phrase_id` is dense (0..N-1 across the whole song, in time order) and is
/// reassigned after every structural edit. It is the only identifier that
/// other tracks (timing sequences, gameplay patterns) may reference.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct Phrase {
    pub phrase_id: usize,
    pub name: String,
    pub start_time: ParameterType,
    pub duration_seconds: ParameterType,
    pub start_bar: usize,
    pub duration_bars: usize,
    pub time_signature: TimeSignature,
    pub bpm: ParameterType,
}
impl Phrase {
    pub fn new_with(
        name: &str,
        start_time: ParameterType,
        duration_seconds: ParameterType,
        bpm: ParameterType,
        time_signature: TimeSignature,
    ) -> Result<Self, StructureError> {
        let bar = seconds_per_bar(bpm, time_signature)?;
        let duration_bars = ((duration_seconds / bar).round() as usize).max(1);
        Ok(Self {
            phrase_id: 0,
            name: name.to_string(),
            start_time,
            duration_seconds,
            start_bar: 0,
            duration_bars,
            time_signature,
            bpm,
        })
    }

    pub fn end_time(&self) -> ParameterType {
        self.start_time + self.duration_seconds
    }

    /// Moves the start bound, keeping the end bound where it is.
    pub fn set_start_time_keep_end_time(&mut self, start_time: ParameterType) {
        let end = self.end_time();
        self.start_time = start_time;
        self.duration_seconds = end - start_time;
    }

    /// Moves the end bound, keeping the start bound where it is.
    pub fn set_end_time_keep_start_time(&mut self, end_time: ParameterType) {
        self.duration_seconds = end_time - self.start_time;
    }

    pub fn seconds_per_bar(&self) -> Result<ParameterType, StructureError> {
        seconds_per_bar(self.bpm, self.time_signature)
    }

    /// Re-derives tempo from the stored duration and bar count.
    pub fn recalculate_bpm(&mut self) -> Result<(), StructureError> {
        self.bpm = bpm_for_duration(self.duration_seconds, self.duration_bars, self.time_signature)?;
        Ok(())
    }

    /// Re-derives duration from the stored bar count and tempo.
    pub fn recalculate_duration(&mut self) -> Result<(), StructureError> {
        self.duration_seconds = self.duration_bars as f64 * self.seconds_per_bar()?;
        Ok(())
    }

    /// Re-derives the bar count from the stored duration and tempo, never
    /// letting it drop below one.
    pub fn recalculate_bars(&mut self) -> Result<(), StructureError> {
        let bar = self.seconds_per_bar()?;
        self.duration_bars = ((self.duration_seconds / bar).round() as usize).max(1);
        Ok(())
    }
}

/// [Section] is an ordered, non-empty run of [Phrase]s. All of its properties
/// are derived from its first and last phrases.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct Section {
    pub name: String,
    pub phrases: Vec<Phrase>,
}
impl Section {
    pub fn new_with(name: &str, phrase: Phrase) -> Self {
        Self {
            name: name.to_string(),
            phrases: vec![phrase],
        }
    }

    pub fn start_time(&self) -> ParameterType {
        self.phrases.first().map_or(0.0, |p| p.start_time)
    }
    pub fn end_time(&self) -> ParameterType {
        self.phrases.last().map_or(0.0, |p| p.end_time())
    }
    pub fn duration_seconds(&self) -> ParameterType {
        self.end_time() - self.start_time()
    }
    pub fn duration_bars(&self) -> usize {
        self.phrases.iter().map(|p| p.duration_bars).sum()
    }
    pub fn bpm(&self) -> ParameterType {
        self.phrases.first().map_or(0.0, |p| p.bpm)
    }
    pub fn time_signature(&self) -> TimeSignature {
        self.phrases
            .first()
            .map_or_else(TimeSignature::default, |p| p.time_signature)
    }
}

/// A handle to either hierarchy level. Derived properties are pure functions
/// resolved by pattern match; there is no virtual dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    Section(usize),
    Phrase { section: usize, phrase: usize },
}

/// A resolved [start, end) span in song time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SegmentSpan {
    pub start: ParameterType,
    pub end: ParameterType,
}
impl SegmentSpan {
    pub fn duration(&self) -> ParameterType {
        self.end - self.start
    }
}

/// [SongStructure] is the whole hierarchy plus the song-level facts that the
/// hierarchy must agree with: the total duration and the `keep_tempo` mode
/// flag (true: duration is derived from bars x tempo; false: tempo is derived
/// from duration / bars).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct SongStructure {
    pub sections: Vec<Section>,
    pub keep_tempo: bool,
    pub duration_seconds: ParameterType,
}
impl SongStructure {
    /// The lifecycle starting point: one section holding one phrase that spans
    /// the entire song.
    pub fn new_spanning(
        duration_seconds: ParameterType,
        bpm: ParameterType,
        time_signature: TimeSignature,
    ) -> Result<Self, StructureError> {
        if duration_seconds <= 0.0 {
            return Err(StructureError::InvalidMeter);
        }
        let phrase = Phrase::new_with("Phrase 1", 0.0, duration_seconds, bpm, time_signature)?;
        Ok(Self {
            sections: vec![Section::new_with("Section 1", phrase)],
            keep_tempo: false,
            duration_seconds,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn phrase_count(&self) -> usize {
        self.sections.iter().map(|s| s.phrases.len()).sum()
    }

    /// All phrases in time order.
    pub fn phrases(&self) -> impl Iterator<Item = &Phrase> {
        self.sections.iter().flat_map(|s| s.phrases.iter())
    }

    /// Finds the (section, phrase) indices of a phrase id.
    pub fn locate(&self, phrase_id: usize) -> Option<(usize, usize)> {
        for (si, section) in self.sections.iter().enumerate() {
            for (pi, phrase) in section.phrases.iter().enumerate() {
                if phrase.phrase_id == phrase_id {
                    return Some((si, pi));
                }
            }
        }
        None
    }

    pub fn phrase(&self, phrase_id: usize) -> Option<&Phrase> {
        self.phrases().find(|p| p.phrase_id == phrase_id)
    }

    /// The phrase immediately following the given one in time order. Ids are
    /// dense and position-ordered, so this is just id + 1.
    pub fn phrase_after(&self, phrase_id: usize) -> Option<&Phrase> {
        self.phrase(phrase_id + 1)
    }

    /// Resolves a segment handle to its time span.
    pub fn span(&self, segment: Segment) -> Result<SegmentSpan, StructureError> {
        match segment {
            Segment::Section(si) => {
                let section = self.sections.get(si).ok_or(StructureError::NotFound)?;
                Ok(SegmentSpan {
                    start: section.start_time(),
                    end: section.end_time(),
                })
            }
            Segment::Phrase { section, phrase } => {
                let phrase = self
                    .sections
                    .get(section)
                    .and_then(|s| s.phrases.get(phrase))
                    .ok_or(StructureError::NotFound)?;
                Ok(SegmentSpan {
                    start: phrase.start_time,
                    end: phrase.end_time(),
                })
            }
        }
    }

    pub fn segment_duration_bars(&self, segment: Segment) -> Result<usize, StructureError> {
        match segment {
            Segment::Section(si) => Ok(self
                .sections
                .get(si)
                .ok_or(StructureError::NotFound)?
                .duration_bars()),
            Segment::Phrase { section, phrase } => Ok(self
                .sections
                .get(section)
                .and_then(|s| s.phrases.get(phrase))
                .ok_or(StructureError::NotFound)?
                .duration_bars),
        }
    }

    /// Finds the section covering `time`.
    ///
    /// A segment's effective end is `max(its end, next segment's start)` so
    /// that sub-epsilon float drift between neighbors never opens a crack that
    /// no segment claims; the last segment's effective end is the song
    /// duration.
    pub fn find_section_at(&self, time: ParameterType) -> Result<usize, StructureError> {
        if self.sections.is_empty() {
            return Err(StructureError::NotFound);
        }
        for si in 0..self.sections.len() {
            let start = self.sections[si].start_time();
            let effective_end = if si + 1 < self.sections.len() {
                self.sections[si]
                    .end_time()
                    .max(self.sections[si + 1].start_time())
            } else {
                self.duration_seconds
            };
            if time >= start && time < effective_end {
                return Ok(si);
            }
        }
        Err(StructureError::NotFound)
    }

    /// Finds the phrase covering `time`, with the same effective-end policy as
    /// [find_section_at](Self::find_section_at).
    pub fn find_phrase_at(&self, time: ParameterType) -> Result<(usize, usize), StructureError> {
        let flat: Vec<(usize, usize)> = self
            .sections
            .iter()
            .enumerate()
            .flat_map(|(si, s)| (0..s.phrases.len()).map(move |pi| (si, pi)))
            .collect();
        if flat.is_empty() {
            return Err(StructureError::NotFound);
        }
        for (i, &(si, pi)) in flat.iter().enumerate() {
            let phrase = &self.sections[si].phrases[pi];
            let effective_end = if let Some(&(nsi, npi)) = flat.get(i + 1) {
                phrase
                    .end_time()
                    .max(self.sections[nsi].phrases[npi].start_time)
            } else {
                self.duration_seconds
            };
            if time >= phrase.start_time && time < effective_end {
                return Ok((si, pi));
            }
        }
        Err(StructureError::NotFound)
    }

    /// The first section starting strictly after `time`.
    pub fn find_section_after(&self, time: ParameterType) -> Result<usize, StructureError> {
        self.sections
            .iter()
            .position(|s| s.start_time() > time)
            .ok_or(StructureError::NotFound)
    }

    /// The first phrase starting strictly after `time`.
    pub fn find_phrase_after(&self, time: ParameterType) -> Result<&Phrase, StructureError> {
        self.phrases()
            .find(|p| p.start_time > time)
            .ok_or(StructureError::NotFound)
    }

    /// Restores time ordering at both levels. Every structural mutation ends
    /// with this followed by [renumber_phrases](Self::renumber_phrases).
    pub fn sort_segments(&mut self) {
        for section in &mut self.sections {
            section
                .phrases
                .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        }
        self.sections
            .sort_by(|a, b| a.start_time().total_cmp(&b.start_time()));
    }

    /// Reassigns dense, position-ordered phrase ids and running start bars.
    pub fn renumber_phrases(&mut self) {
        let mut next_id = 0;
        let mut next_bar = 0;
        for section in &mut self.sections {
            for phrase in &mut section.phrases {
                phrase.phrase_id = next_id;
                phrase.start_bar = next_bar;
                next_id += 1;
                next_bar += phrase.duration_bars;
            }
        }
    }

    /// The standalone invariant check. Structural operations keep these true;
    /// tests call this directly.
    pub fn validate(&self) -> Result<(), StructureError> {
        if self.sections.is_empty() {
            return Err(StructureError::WouldBreakInvariant(
                "structure has no sections".to_string(),
            ));
        }
        for section in &self.sections {
            if section.phrases.is_empty() {
                return Err(StructureError::WouldBreakInvariant(format!(
                    "section '{}' has no phrases",
                    section.name
                )));
            }
        }

        let phrases: Vec<&Phrase> = self.phrases().collect();
        if phrases[0].start_time.abs() > CONTIGUITY_EPSILON {
            return Err(StructureError::WouldBreakInvariant(format!(
                "first phrase starts at {} rather than zero",
                phrases[0].start_time
            )));
        }
        if (phrases[phrases.len() - 1].end_time() - self.duration_seconds).abs()
            > CONTIGUITY_EPSILON
        {
            return Err(StructureError::WouldBreakInvariant(format!(
                "last phrase ends at {} rather than song duration {}",
                phrases[phrases.len() - 1].end_time(),
                self.duration_seconds
            )));
        }
        for pair in phrases.windows(2) {
            if (pair[0].end_time() - pair[1].start_time).abs() > CONTIGUITY_EPSILON {
                return Err(StructureError::WouldBreakInvariant(format!(
                    "gap or overlap between phrase {} end {} and phrase {} start {}",
                    pair[0].phrase_id,
                    pair[0].end_time(),
                    pair[1].phrase_id,
                    pair[1].start_time
                )));
            }
        }
        for (expected_id, phrase) in phrases.iter().enumerate() {
            if phrase.phrase_id != expected_id {
                return Err(StructureError::WouldBreakInvariant(format!(
                    "phrase ids are not dense: expected {expected_id}, found {}",
                    phrase.phrase_id
                )));
            }
            if phrase.duration_bars < 1 {
                return Err(StructureError::WouldBreakInvariant(format!(
                    "phrase {} has zero bars",
                    phrase.phrase_id
                )));
            }
            let bar = phrase.seconds_per_bar()?;
            if phrase.duration_seconds < bar - CONTIGUITY_EPSILON {
                return Err(StructureError::WouldBreakInvariant(format!(
                    "phrase {} is shorter than one bar ({} < {})",
                    phrase.phrase_id, phrase.duration_seconds, bar
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use more_asserts::assert_gt;

    fn two_section_song() -> SongStructure {
        // [0, 60) and [60, 120), each one phrase, 120 BPM 4/4.
        let ts = TimeSignature::default();
        let mut structure = SongStructure {
            sections: vec![
                Section::new_with(
                    "Section 1",
                    Phrase::new_with("Phrase 1", 0.0, 60.0, 120.0, ts).unwrap(),
                ),
                Section::new_with(
                    "Section 2",
                    Phrase::new_with("Phrase 2", 60.0, 60.0, 120.0, ts).unwrap(),
                ),
            ],
            keep_tempo: false,
            duration_seconds: 120.0,
        };
        structure.renumber_phrases();
        structure
    }

    #[test]
    fn spanning_structure_matches_scenario_a() {
        // 120 seconds at 120 BPM 4/4: a bar is 2.0s, so 60 bars exactly fill
        // the song.
        let structure =
            SongStructure::new_spanning(120.0, 120.0, TimeSignature::default()).unwrap();
        assert_eq!(structure.sections.len(), 1);
        let phrase = structure.phrases().next().unwrap();
        assert!(approx_eq!(
            f64,
            phrase.seconds_per_bar().unwrap(),
            2.0,
            epsilon = 1e-9
        ));
        assert_eq!(phrase.duration_bars, 60);
        assert!(structure.validate().is_ok());
    }

    #[test]
    fn bound_setters_keep_the_other_bound() {
        let ts = TimeSignature::default();
        let mut phrase = Phrase::new_with("p", 10.0, 8.0, 120.0, ts).unwrap();
        phrase.set_start_time_keep_end_time(12.0);
        assert!(approx_eq!(f64, phrase.start_time, 12.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, phrase.end_time(), 18.0, epsilon = 1e-9));
        phrase.set_end_time_keep_start_time(20.0);
        assert!(approx_eq!(f64, phrase.start_time, 12.0, epsilon = 1e-9));
        assert!(approx_eq!(
            f64,
            phrase.duration_seconds,
            8.0,
            epsilon = 1e-9
        ));
    }

    #[test]
    fn find_tolerates_sub_epsilon_drift() {
        let mut structure = two_section_song();
        // Shave a hair off the first section's end so the two sections no
        // longer meet exactly. The effective-end rule should still hand the
        // gap to the first section.
        structure.sections[0].phrases[0].duration_seconds -= 5e-5;
        assert_eq!(structure.find_section_at(59.99999).unwrap(), 0);
        assert_eq!(structure.find_section_at(60.0).unwrap(), 1);
        // The last section's effective end is the song duration.
        assert_eq!(structure.find_section_at(119.9999).unwrap(), 1);
        assert_eq!(
            structure.find_section_at(120.0),
            Err(StructureError::NotFound)
        );
    }

    #[test]
    fn find_on_empty_structure_is_not_found() {
        let structure = SongStructure::default();
        assert_eq!(structure.find_section_at(0.0), Err(StructureError::NotFound));
        assert_eq!(structure.find_phrase_at(0.0), Err(StructureError::NotFound));
    }

    #[test]
    fn phrase_after_follows_dense_ids() {
        let structure = two_section_song();
        assert_eq!(structure.phrase_after(0).unwrap().phrase_id, 1);
        assert!(structure.phrase_after(1).is_none());
    }

    #[test]
    fn find_after_is_strictly_after() {
        let structure = two_section_song();
        // A query on a boundary skips the segment starting exactly there.
        assert_eq!(structure.find_section_after(0.0).unwrap(), 1);
        assert_eq!(structure.find_section_after(59.9).unwrap(), 1);
        assert_eq!(structure.find_section_after(60.0), Err(StructureError::NotFound));
        assert_eq!(structure.find_phrase_after(0.0).unwrap().phrase_id, 1);
        assert_eq!(
            structure.find_phrase_after(60.0).err(),
            Some(StructureError::NotFound)
        );
    }

    #[test]
    fn segment_bars_sum_over_sections() {
        let structure = two_section_song();
        // Each 60s phrase at 120 BPM 4/4 is 30 bars.
        assert_eq!(
            structure.segment_duration_bars(Segment::Section(0)).unwrap(),
            30
        );
        assert_eq!(
            structure
                .segment_duration_bars(Segment::Phrase {
                    section: 1,
                    phrase: 0
                })
                .unwrap(),
            30
        );
        assert_eq!(
            structure.segment_duration_bars(Segment::Section(9)),
            Err(StructureError::NotFound)
        );
    }

    #[test]
    fn renumber_assigns_running_bars() {
        let structure = two_section_song();
        let phrases: Vec<&Phrase> = structure.phrases().collect();
        assert_eq!(phrases[0].start_bar, 0);
        assert_gt!(phrases[1].start_bar, 0);
        assert_eq!(phrases[1].start_bar, phrases[0].duration_bars);
    }

    #[test]
    fn validate_catches_gaps() {
        let mut structure = two_section_song();
        assert!(structure.validate().is_ok());
        structure.sections[1].phrases[0].start_time += 0.5;
        structure.sections[1].phrases[0].duration_seconds -= 0.5;
        assert!(matches!(
            structure.validate(),
            Err(StructureError::WouldBreakInvariant(_))
        ));
    }

    #[test]
    fn validate_catches_sub_bar_phrases() {
        let mut structure = two_section_song();
        // 1.0s is shorter than the 2.0s bar at 120 BPM 4/4.
        structure.sections[1].phrases[0].set_start_time_keep_end_time(119.0);
        structure.sections[0].phrases[0].set_end_time_keep_start_time(119.0);
        assert!(matches!(
            structure.validate(),
            Err(StructureError::WouldBreakInvariant(_))
        ));
    }
}
