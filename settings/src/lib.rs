// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The `chartforge-settings` crate manages serialization. Chart files should
//! stay readable and stable even when the engine's model structs change, so
//! the serialized structs live here, apart from the model, and are converted
//! at the boundary.

use anyhow::Result;
use chartforge_core::{
    structure::{Phrase, Section, SongStructure},
    time::TimeSignature,
    ParameterType,
};
use chartforge_engine::editor::StructureEditor;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct TimeSignatureSettings {
    pub top: usize,
    pub bottom: usize,
}
impl Default for TimeSignatureSettings {
    fn default() -> Self {
        Self { top: 4, bottom: 4 }
    }
}
impl TimeSignatureSettings {
    fn instantiate(&self) -> Result<TimeSignature> {
        Ok(TimeSignature::new_with(self.top, self.bottom)?)
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct PhraseSettings {
    pub name: String,

    /// Elapsed seconds from the start of the song.
    pub start_time: ParameterType,

    pub duration_seconds: ParameterType,

    #[serde(default = "default_duration_bars")]
    pub duration_bars: usize,

    #[serde(default)]
    pub time_signature: TimeSignatureSettings,

    #[serde(default = "default_bpm")]
    pub bpm: ParameterType,
}

fn default_duration_bars() -> usize {
    1
}

fn default_bpm() -> ParameterType {
    120.0
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct SectionSettings {
    pub name: String,
    pub phrases: Vec<PhraseSettings>,
}

/// The on-disk shape of a chart. Derived fields (phrase ids, bar offsets)
/// are not serialized; they are rebuilt on load.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct ChartSettings {
    /// The user-visible name of this chart
    pub title: Option<String>,

    pub duration_seconds: ParameterType,

    /// When true, edits preserve each phrase's tempo and re-derive durations;
    /// when false, edits preserve durations and re-derive tempos.
    #[serde(default)]
    pub keep_tempo: bool,

    #[serde(default)]
    pub sections: Vec<SectionSettings>,
}

impl ChartSettings {
    pub fn new_from_yaml_file(filename: &str) -> Result<Self> {
        Self::new_from_yaml(std::fs::read_to_string(filename)?.as_str())
    }

    pub fn new_from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Builds an editor over the deserialized structure. Loading runs the
    /// consistency repair once, so a hand-edited file with small gaps or
    /// overlaps still comes up in a valid state.
    pub fn instantiate(&self) -> Result<StructureEditor> {
        let mut structure = if self.sections.is_empty() {
            SongStructure::new_spanning(
                self.duration_seconds,
                default_bpm(),
                TimeSignature::default(),
            )?
        } else {
            let mut structure = SongStructure {
                sections: Vec::default(),
                keep_tempo: self.keep_tempo,
                duration_seconds: self.duration_seconds,
            };
            for section in &self.sections {
                let mut phrases = Vec::default();
                for phrase in &section.phrases {
                    phrases.push(Phrase {
                        phrase_id: 0,
                        name: phrase.name.clone(),
                        start_time: phrase.start_time,
                        duration_seconds: phrase.duration_seconds,
                        start_bar: 0,
                        duration_bars: phrase.duration_bars,
                        time_signature: phrase.time_signature.instantiate()?,
                        bpm: phrase.bpm,
                    });
                }
                structure.sections.push(Section {
                    name: section.name.clone(),
                    phrases,
                });
            }
            structure
        };
        structure.sort_segments();
        structure.renumber_phrases();
        let mut editor = StructureEditor::new_with(structure);
        editor.fix_inconsistencies()?;
        Ok(editor)
    }

    pub fn from_structure(title: Option<String>, structure: &SongStructure) -> Self {
        Self {
            title,
            duration_seconds: structure.duration_seconds,
            keep_tempo: structure.keep_tempo,
            sections: structure
                .sections
                .iter()
                .map(|section| SectionSettings {
                    name: section.name.clone(),
                    phrases: section
                        .phrases
                        .iter()
                        .map(|phrase| PhraseSettings {
                            name: phrase.name.clone(),
                            start_time: phrase.start_time,
                            duration_seconds: phrase.duration_seconds,
                            duration_bars: phrase.duration_bars,
                            time_signature: TimeSignatureSettings {
                                top: phrase.time_signature.top,
                                bottom: phrase.time_signature.bottom,
                            },
                            bpm: phrase.bpm,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
