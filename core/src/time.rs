// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{ParameterType, StructureError};
#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// [TimeSignature] is the meter: the top number is beats per bar, and the
/// bottom is the note value that counts as one beat (4 = quarter note).
///
/// Tempo math throughout the crate expresses durations in quarter-note
/// equivalents, so a bar in X/Y time is `top * 4 / bottom` quarters long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct TimeSignature {
    pub top: usize,
    pub bottom: usize,
}
impl TimeSignature {
    pub fn new_with(top: usize, bottom: usize) -> Result<Self, StructureError> {
        if top == 0 || bottom == 0 {
            Err(StructureError::InvalidMeter)
        } else {
            Ok(Self { top, bottom })
        }
    }

    /// Quarter-note equivalents in one bar of this meter.
    pub fn quarters_per_bar(&self) -> f64 {
        self.top as f64 * 4.0 / self.bottom as f64
    }
}
impl Default for TimeSignature {
    fn default() -> Self {
        Self { top: 4, bottom: 4 }
    }
}
impl Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.top, self.bottom)
    }
}

/// Derives BPM from an observed duration: a span of `seconds` that is known to
/// contain `bars` bars of the given meter.
pub fn bpm_for_duration(
    seconds: ParameterType,
    bars: usize,
    time_signature: TimeSignature,
) -> Result<ParameterType, StructureError> {
    if time_signature.top == 0 || time_signature.bottom == 0 || bars == 0 || seconds <= 0.0 {
        return Err(StructureError::InvalidMeter);
    }
    let quarters = bars as f64 * time_signature.quarters_per_bar();
    Ok(60.0 / (seconds / quarters))
}

/// Duration of one bar at the given tempo and meter.
pub fn seconds_per_bar(
    bpm: ParameterType,
    time_signature: TimeSignature,
) -> Result<ParameterType, StructureError> {
    if bpm <= 0.0 || time_signature.top == 0 || time_signature.bottom == 0 {
        return Err(StructureError::InvalidMeter);
    }
    Ok((60.0 / bpm) * time_signature.quarters_per_bar())
}

/// Duration of one beat at the given tempo and meter.
pub fn seconds_per_beat(
    bpm: ParameterType,
    time_signature: TimeSignature,
) -> Result<ParameterType, StructureError> {
    Ok(seconds_per_bar(bpm, time_signature)? / time_signature.top as f64)
}

/// A nested beat-grid address inside a phrase: which bar, which beat in that
/// bar, and which binary subdivision of that beat, down to a 32nd note.
///
/// Subdivisions are strictly binary; triplets are not representable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct BeatAddress {
    pub bar: usize,
    pub beat: usize,
    pub eighth: usize,
    pub sixteenth: usize,
    pub thirty_second: usize,
}
impl BeatAddress {
    /// Quantizes a phrase-relative elapsed time onto the beat grid by
    /// successive divide/remainder against each subdivision's duration.
    /// The caller keeps the raw time separately if it needs full precision.
    pub fn from_phrase_relative(
        seconds: ParameterType,
        bpm: ParameterType,
        time_signature: TimeSignature,
    ) -> Result<Self, StructureError> {
        if seconds < 0.0 {
            return Err(StructureError::InvalidMeter);
        }
        let bar_duration = seconds_per_bar(bpm, time_signature)?;
        let beat_duration = seconds_per_beat(bpm, time_signature)?;
        let eighth_duration = beat_duration / 2.0;
        let sixteenth_duration = beat_duration / 4.0;
        let thirty_second_duration = beat_duration / 8.0;

        let mut remainder = seconds;
        let bar = (remainder / bar_duration) as usize;
        remainder -= bar as f64 * bar_duration;
        let beat = (remainder / beat_duration) as usize;
        remainder -= beat as f64 * beat_duration;
        let eighth = (remainder / eighth_duration) as usize;
        remainder -= eighth as f64 * eighth_duration;
        let sixteenth = (remainder / sixteenth_duration) as usize;
        remainder -= sixteenth as f64 * sixteenth_duration;
        let thirty_second = (remainder / thirty_second_duration) as usize;

        Ok(Self {
            bar,
            beat,
            eighth,
            sixteenth,
            thirty_second,
        })
    }
}
impl Display for BeatAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.bar, self.beat, self.eighth, self.sixteenth, self.thirty_second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn time_signature_rejects_zeroes() {
        assert_eq!(
            TimeSignature::new_with(0, 4),
            Err(StructureError::InvalidMeter)
        );
        assert_eq!(
            TimeSignature::new_with(4, 0),
            Err(StructureError::InvalidMeter)
        );
        assert!(TimeSignature::new_with(7, 8).is_ok());
    }

    #[test]
    fn bpm_derivation_mainline() {
        // 120 seconds holding 60 bars of 4/4 is exactly 120 BPM.
        let ts = TimeSignature::default();
        let bpm = bpm_for_duration(120.0, 60, ts).unwrap();
        assert!(approx_eq!(f64, bpm, 120.0, epsilon = 1e-9));

        // And a bar at 120 BPM in 4/4 lasts two seconds.
        let bar = seconds_per_bar(bpm, ts).unwrap();
        assert!(approx_eq!(f64, bar, 2.0, epsilon = 1e-9));
    }

    #[test]
    fn bpm_derivation_honors_beat_unit() {
        // 6/8: a bar is three quarter-note equivalents.
        let ts = TimeSignature::new_with(6, 8).unwrap();
        assert!(approx_eq!(f64, ts.quarters_per_bar(), 3.0, epsilon = 1e-9));
        let bpm = bpm_for_duration(1.5, 1, ts).unwrap();
        assert!(approx_eq!(f64, bpm, 120.0, epsilon = 1e-9));
    }

    #[test]
    fn bpm_round_trips_through_duration() {
        let ts = TimeSignature::new_with(3, 4).unwrap();
        let seconds = 47.13;
        let bars = 21;
        let bpm = bpm_for_duration(seconds, bars, ts).unwrap();
        let rederived = bars as f64 * seconds_per_bar(bpm, ts).unwrap();
        assert!(approx_eq!(f64, rederived, seconds, epsilon = 1e-9));
    }

    #[test]
    fn conversions_fail_rather_than_divide_by_zero() {
        let ts = TimeSignature::default();
        assert_eq!(
            bpm_for_duration(10.0, 0, ts),
            Err(StructureError::InvalidMeter)
        );
        assert_eq!(
            bpm_for_duration(0.0, 4, ts),
            Err(StructureError::InvalidMeter)
        );
        assert_eq!(seconds_per_bar(0.0, ts), Err(StructureError::InvalidMeter));
        assert_eq!(
            seconds_per_bar(-90.0, ts),
            Err(StructureError::InvalidMeter)
        );
    }

    #[test]
    fn quantization_walks_the_subdivision_ladder() {
        // 120 BPM 4/4: bar = 2.0s, beat = 0.5s, 8th = 0.25s, 16th = 0.125s,
        // 32nd = 0.0625s.
        let ts = TimeSignature::default();
        let address = BeatAddress::from_phrase_relative(0.0, 120.0, ts).unwrap();
        assert_eq!(address, BeatAddress::default());

        // 2.0 (bar 1) + 0.5 (beat 1) + 0.25 (8th 1) + 0.125 (16th 1) + 0.0625
        let address = BeatAddress::from_phrase_relative(2.9375, 120.0, ts).unwrap();
        assert_eq!(
            address,
            BeatAddress {
                bar: 1,
                beat: 1,
                eighth: 1,
                sixteenth: 1,
                thirty_second: 1
            }
        );

        // Just shy of the next 32nd stays on the current one.
        let address = BeatAddress::from_phrase_relative(0.0624, 120.0, ts).unwrap();
        assert_eq!(address, BeatAddress::default());
    }

    #[test]
    fn quantization_rejects_bad_inputs() {
        let ts = TimeSignature::default();
        assert!(BeatAddress::from_phrase_relative(-0.1, 120.0, ts).is_err());
        assert!(BeatAddress::from_phrase_relative(1.0, 0.0, ts).is_err());
    }
}
