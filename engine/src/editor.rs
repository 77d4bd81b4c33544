// Copyright (c) 2023 Mike Tsao. All rights reserved.

use chartforge_core::{
    structure::{Phrase, Section, Segment, SongStructure, CONTIGUITY_EPSILON},
    time::TimeSignature,
    ParameterType, StructureError,
};

const DEFAULT_BPM: ParameterType = 120.0;

/// [StructureEditor] owns a [SongStructure] and is the only thing allowed to
/// mutate it. Every operation validates its preconditions first (a returned
/// error means nothing changed), and every successful operation ends with a
/// re-sort and a dense phrase renumbering.
#[derive(Debug)]
pub struct StructureEditor {
    structure: SongStructure,
    section_counter: usize,
    phrase_counter: usize,
}
impl StructureEditor {
    pub fn new_with(structure: SongStructure) -> Self {
        let section_counter = structure.sections.len();
        let phrase_counter = structure.phrase_count();
        Self {
            structure,
            section_counter,
            phrase_counter,
        }
    }

    pub fn structure(&self) -> &SongStructure {
        &self.structure
    }

    pub fn into_structure(self) -> SongStructure {
        self.structure
    }

    /// Swaps in a structure wholesale, as when rolling back a failed edit.
    pub fn replace_structure(&mut self, structure: SongStructure) {
        self.structure = structure;
    }

    fn next_section_name(&mut self) -> String {
        self.section_counter += 1;
        format!("Section {}", self.section_counter)
    }

    fn next_phrase_name(&mut self) -> String {
        self.phrase_counter += 1;
        format!("Phrase {}", self.phrase_counter)
    }

    /// Whether a name looks like one of our counter-generated names. Merge
    /// operations use this to decide which of two names the user actually
    /// chose.
    fn is_auto_name(name: &str) -> bool {
        for prefix in ["Section ", "Phrase "] {
            if let Some(rest) = name.strip_prefix(prefix) {
                if rest.parse::<usize>().is_ok() {
                    return true;
                }
            }
        }
        false
    }

    fn finish(&mut self) {
        self.structure.sort_segments();
        self.structure.renumber_phrases();
    }

    /// Inserts a new section boundary at time `t`. The section previously
    /// covering `t` is truncated to end there, and the new section runs from
    /// `t` to the next existing section boundary. Phrases of the old section
    /// that lie past `t` move with the span they occupy. The first-ever
    /// insertion into an empty structure spans the entire song.
    pub fn add_section(&mut self, t: ParameterType) -> Result<Segment, StructureError> {
        if self.structure.is_empty() {
            let name = self.next_phrase_name();
            let phrase = Phrase::new_with(
                &name,
                0.0,
                self.structure.duration_seconds,
                DEFAULT_BPM,
                TimeSignature::default(),
            )?;
            let name = self.next_section_name();
            self.structure.sections.push(Section::new_with(&name, phrase));
            self.finish();
            return Ok(Segment::Section(0));
        }

        let (si, pi) = self.structure.find_phrase_at(t)?;
        let covering_start = self.structure.sections[si].phrases[pi].start_time;
        let section_start = self.structure.sections[si].start_time();
        if (t - section_start).abs() <= CONTIGUITY_EPSILON {
            return Err(StructureError::WouldBreakInvariant(
                "a section already starts at this time".to_string(),
            ));
        }

        let new_phrase_name = self.next_phrase_name();
        let new_section_name = self.next_section_name();
        let section = &mut self.structure.sections[si];
        let mut moved = if (t - covering_start).abs() <= CONTIGUITY_EPSILON {
            // Splitting exactly on a phrase boundary: no truncation needed.
            section.phrases.split_off(pi)
        } else {
            let mut moved = section.phrases.split_off(pi + 1);
            let covering = &mut section.phrases[pi];
            let covering_end = covering.end_time();
            covering.set_end_time_keep_start_time(t);
            covering.recalculate_bars()?;
            let split = Phrase::new_with(
                &new_phrase_name,
                t,
                covering_end - t,
                covering.bpm,
                covering.time_signature,
            )?;
            moved.insert(0, split);
            moved
        };

        let first = moved.remove(0);
        let mut new_section = Section::new_with(&new_section_name, first);
        new_section.phrases.append(&mut moved);
        self.structure.sections.insert(si + 1, new_section);
        self.finish();
        Ok(Segment::Section(si + 1))
    }

    /// Inserts a new phrase boundary at time `t` inside the given section.
    /// The phrase previously covering `t` is truncated to end there; the new
    /// phrase runs from `t` to that phrase's old end.
    pub fn add_phrase(
        &mut self,
        section_index: usize,
        t: ParameterType,
    ) -> Result<Segment, StructureError> {
        let section = self
            .structure
            .sections
            .get(section_index)
            .ok_or(StructureError::NotFound)?;
        let pi = section
            .phrases
            .iter()
            .position(|p| t >= p.start_time && t < p.end_time())
            .ok_or(StructureError::NotFound)?;
        if (t - section.phrases[pi].start_time).abs() <= CONTIGUITY_EPSILON {
            return Err(StructureError::WouldBreakInvariant(
                "a phrase already starts at this time".to_string(),
            ));
        }

        let name = self.next_phrase_name();
        let section = &mut self.structure.sections[section_index];
        let covering = &mut section.phrases[pi];
        let covering_end = covering.end_time();
        covering.set_end_time_keep_start_time(t);
        covering.recalculate_bars()?;
        let split = Phrase::new_with(
            &name,
            t,
            covering_end - t,
            covering.bpm,
            covering.time_signature,
        )?;
        section.phrases.insert(pi + 1, split);
        self.finish();
        Ok(Segment::Phrase {
            section: section_index,
            phrase: pi + 1,
        })
    }

    /// Promotes a phrase to a top-level section. Three cases by position:
    /// the parent's first phrase shrinks the parent's start, its last phrase
    /// shrinks the parent's end, and an interior phrase splits the parent in
    /// two, since removing it would otherwise break contiguity. The resulting
    /// sections' spans concatenate exactly to the original parent's span.
    pub fn convert_phrase_into_section(
        &mut self,
        phrase_id: usize,
    ) -> Result<Segment, StructureError> {
        let (si, pi) = self
            .structure
            .locate(phrase_id)
            .ok_or(StructureError::NotFound)?;
        let phrase_count = self.structure.sections[si].phrases.len();
        if phrase_count == 1 {
            return Err(StructureError::WouldBreakInvariant(
                "phrase is already its section's whole span".to_string(),
            ));
        }

        let new_index = if pi == 0 {
            let phrase = self.structure.sections[si].phrases.remove(0);
            let name = phrase.name.clone();
            self.structure
                .sections
                .insert(si, Section::new_with(&name, phrase));
            si
        } else if pi == phrase_count - 1 {
            let phrase = self.structure.sections[si].phrases.remove(pi);
            let name = phrase.name.clone();
            self.structure
                .sections
                .insert(si + 1, Section::new_with(&name, phrase));
            si + 1
        } else {
            let tail_name = self.next_section_name();
            let tail = self.structure.sections[si].phrases.split_off(pi + 1);
            let phrase = self.structure.sections[si].phrases.remove(pi);
            let name = phrase.name.clone();
            self.structure
                .sections
                .insert(si + 1, Section::new_with(&name, phrase));
            self.structure.sections.insert(
                si + 2,
                Section {
                    name: tail_name,
                    phrases: tail,
                },
            );
            si + 1
        };
        self.finish();
        Ok(Segment::Section(new_index))
    }

    /// Transfers a section's first phrase to the previous section. Illegal for
    /// any other phrase, and for the song's first phrase overall.
    pub fn move_to_prev_section(&mut self, phrase_id: usize) -> Result<(), StructureError> {
        let (si, pi) = self
            .structure
            .locate(phrase_id)
            .ok_or(StructureError::NotFound)?;
        if pi != 0 {
            return Err(StructureError::WouldBreakInvariant(
                "only a section's first phrase can move to the previous section".to_string(),
            ));
        }
        if si == 0 {
            return Err(StructureError::WouldBreakInvariant(
                "the song's first phrase cannot leave the first section".to_string(),
            ));
        }
        let phrase = self.structure.sections[si].phrases.remove(0);
        self.structure.sections[si - 1].phrases.push(phrase);
        if self.structure.sections[si].phrases.is_empty() {
            self.structure.sections.remove(si);
        }
        self.finish();
        Ok(())
    }

    /// Transfers a section's last phrase to the next section. Illegal for any
    /// other phrase, and for the song's last phrase overall.
    pub fn move_to_next_section(&mut self, phrase_id: usize) -> Result<(), StructureError> {
        let (si, pi) = self
            .structure
            .locate(phrase_id)
            .ok_or(StructureError::NotFound)?;
        if pi + 1 != self.structure.sections[si].phrases.len() {
            return Err(StructureError::WouldBreakInvariant(
                "only a section's last phrase can move to the next section".to_string(),
            ));
        }
        if si + 1 == self.structure.sections.len() {
            return Err(StructureError::WouldBreakInvariant(
                "the song's last phrase cannot leave the last section".to_string(),
            ));
        }
        let phrase = self.structure.sections[si].phrases.remove(pi);
        self.structure.sections[si + 1].phrases.insert(0, phrase);
        if self.structure.sections[si].phrases.is_empty() {
            self.structure.sections.remove(si);
        }
        self.finish();
        Ok(())
    }

    /// Deletes a section by merging its phrases into the previous section (or
    /// the next, when deleting the first). Refuses to delete the last
    /// remaining section. If the survivor consisted of a single auto-named
    /// phrase, it takes the deleted section's name, since that's the one a
    /// user actually chose.
    pub fn delete_section(&mut self, section_index: usize) -> Result<(), StructureError> {
        if section_index >= self.structure.sections.len() {
            return Err(StructureError::NotFound);
        }
        if self.structure.sections.len() == 1 {
            return Err(StructureError::WouldBreakInvariant(
                "cannot delete the last remaining section".to_string(),
            ));
        }
        let deleted = self.structure.sections.remove(section_index);
        let survivor_index = section_index.saturating_sub(1);
        let survivor = &mut self.structure.sections[survivor_index];
        let survivor_was_placeholder =
            survivor.phrases.len() == 1 && Self::is_auto_name(&survivor.phrases[0].name);
        if section_index == 0 {
            let mut phrases = deleted.phrases;
            phrases.append(&mut survivor.phrases);
            survivor.phrases = phrases;
        } else {
            survivor.phrases.extend(deleted.phrases);
        }
        if survivor_was_placeholder {
            survivor.name = deleted.name;
        }
        self.finish();
        Ok(())
    }

    /// Deletes a phrase; a neighboring phrase in the same section absorbs the
    /// freed span (bars add, tempo re-derived). Deleting a section's only
    /// phrase delegates to section deletion.
    pub fn delete_phrase(&mut self, phrase_id: usize) -> Result<(), StructureError> {
        let (si, pi) = self
            .structure
            .locate(phrase_id)
            .ok_or(StructureError::NotFound)?;
        if self.structure.sections[si].phrases.len() == 1 {
            return self.delete_section(si);
        }
        let deleted = self.structure.sections[si].phrases.remove(pi);
        let absorber = if pi > 0 {
            let neighbor = &mut self.structure.sections[si].phrases[pi - 1];
            neighbor.set_end_time_keep_start_time(deleted.end_time());
            neighbor
        } else {
            let neighbor = &mut self.structure.sections[si].phrases[0];
            neighbor.set_start_time_keep_end_time(deleted.start_time);
            neighbor
        };
        absorber.duration_bars += deleted.duration_bars;
        absorber.recalculate_bpm()?;
        self.finish();
        Ok(())
    }

    /// The single point that restores every invariant after arbitrary edits or
    /// after loading externally-supplied numbers that don't add up exactly.
    ///
    /// Walks each phrase in order: per `keep_tempo`, duration is derived from
    /// bars x tempo or tempo from duration / bars; phrases shorter than one
    /// bar are clamped up to exactly one bar with their tempo recomputed;
    /// segments starting past the song's end are dropped, spans overshooting
    /// it are truncated at it, and anything pushed wholly past it by earlier
    /// phrases is dropped; the final phrase is force-extended to end exactly
    /// at the song duration; and phrase ids are renumbered. Calling it twice
    /// changes nothing.
    pub fn fix_inconsistencies(&mut self) -> Result<(), StructureError> {
        self.structure.sort_segments();
        let song_end = self.structure.duration_seconds;
        for section in &mut self.structure.sections {
            section.phrases.retain(|p| {
                let keep = p.start_time < song_end - CONTIGUITY_EPSILON;
                if !keep {
                    log::debug!(
                        "dropping phrase '{}' starting at {} past song end {}",
                        p.name,
                        p.start_time,
                        song_end
                    );
                }
                keep
            });
        }
        self.structure.sections.retain(|s| !s.phrases.is_empty());
        if self.structure.sections.is_empty() {
            return Ok(());
        }

        let keep_tempo = self.structure.keep_tempo;
        let mut cursor = 0.0;
        for section in &mut self.structure.sections {
            let mut kept = Vec::with_capacity(section.phrases.len());
            for mut phrase in section.phrases.drain(..) {
                // Earlier phrases may already cover the whole song; anything
                // the cursor pushes to the end or beyond is dropped.
                if cursor >= song_end - CONTIGUITY_EPSILON {
                    log::debug!(
                        "dropping phrase '{}': cursor {} has reached song end {}",
                        phrase.name,
                        cursor,
                        song_end
                    );
                    continue;
                }
                phrase.start_time = cursor;
                if phrase.duration_bars == 0 {
                    phrase.duration_bars = 1;
                }
                if keep_tempo {
                    phrase.recalculate_duration()?;
                }
                // Stored or derived durations can overshoot the song; no
                // phrase is allowed to end past it.
                if phrase.end_time() > song_end {
                    phrase.set_end_time_keep_start_time(song_end);
                    if keep_tempo {
                        phrase.recalculate_bars()?;
                    }
                }

                let bar = phrase.seconds_per_bar()?;
                if phrase.duration_seconds < bar - CONTIGUITY_EPSILON {
                    phrase.duration_bars = 1;
                    phrase.recalculate_bpm()?;
                } else if !keep_tempo {
                    phrase.recalculate_bpm()?;
                }

                cursor = phrase.end_time();
                kept.push(phrase);
            }
            section.phrases = kept;
        }
        self.structure.sections.retain(|s| !s.phrases.is_empty());

        // The final phrase absorbs any remaining undershoot so the song stays
        // covered end to end.
        if let Some(phrase) = self
            .structure
            .sections
            .last_mut()
            .and_then(|s| s.phrases.last_mut())
        {
            phrase.set_end_time_keep_start_time(song_end);
            if keep_tempo {
                phrase.recalculate_bars()?;
            }
            let bar = phrase.seconds_per_bar()?;
            if phrase.duration_seconds < bar - CONTIGUITY_EPSILON {
                phrase.duration_bars = 1;
            }
            phrase.recalculate_bpm()?;
        }
        self.structure.renumber_phrases();
        Ok(())
    }
}
