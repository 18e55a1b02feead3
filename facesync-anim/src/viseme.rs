//! Viseme alphabet, amplitude mapping and phoneme mapping

use crate::error::AnimError;
use serde::{Deserialize, Serialize};

/// Mouth shapes, ordered from closed (`X`, rest) to fully open (`A`).
///
/// The declaration order is the index range amplitudes are scaled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Viseme {
    #[serde(rename = "X")]
    Rest,
    #[serde(rename = "M")]
    M,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "P")]
    P,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "V")]
    V,
    #[serde(rename = "S")]
    S,
    #[serde(rename = "TH")]
    Th,
    #[serde(rename = "T")]
    T,
    #[serde(rename = "L")]
    L,
    #[serde(rename = "N")]
    N,
    #[serde(rename = "CH")]
    Ch,
    #[serde(rename = "K")]
    K,
    #[serde(rename = "R")]
    R,
    #[serde(rename = "W")]
    W,
    #[serde(rename = "U")]
    U,
    #[serde(rename = "I")]
    I,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "O")]
    O,
    #[serde(rename = "A")]
    A,
}

impl Viseme {
    pub const ALPHABET: [Viseme; 20] = [
        Viseme::Rest,
        Viseme::M,
        Viseme::B,
        Viseme::P,
        Viseme::F,
        Viseme::V,
        Viseme::S,
        Viseme::Th,
        Viseme::T,
        Viseme::L,
        Viseme::N,
        Viseme::Ch,
        Viseme::K,
        Viseme::R,
        Viseme::W,
        Viseme::U,
        Viseme::I,
        Viseme::E,
        Viseme::O,
        Viseme::A,
    ];

    /// Wire code
    pub fn as_str(&self) -> &'static str {
        match self {
            Viseme::Rest => "X",
            Viseme::M => "M",
            Viseme::B => "B",
            Viseme::P => "P",
            Viseme::F => "F",
            Viseme::V => "V",
            Viseme::S => "S",
            Viseme::Th => "TH",
            Viseme::T => "T",
            Viseme::L => "L",
            Viseme::N => "N",
            Viseme::Ch => "CH",
            Viseme::K => "K",
            Viseme::R => "R",
            Viseme::W => "W",
            Viseme::U => "U",
            Viseme::I => "I",
            Viseme::E => "E",
            Viseme::O => "O",
            Viseme::A => "A",
        }
    }

    /// Position in the closed-to-open ordering
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Index clamped into the alphabet
    pub fn from_index(index: usize) -> Viseme {
        Self::ALPHABET[index.min(Self::ALPHABET.len() - 1)]
    }

    /// Openness in `[0, 1]`
    pub fn openness(&self) -> f64 {
        self.index() as f64 / (Self::ALPHABET.len() - 1) as f64
    }
}

/// One mouth-shape keyframe (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeKeyframe {
    pub time: f64,
    #[serde(rename = "viseme")]
    pub code: Viseme,
    pub intensity: f64,
    pub duration: f64,
}

impl VisemeKeyframe {
    pub fn end(&self) -> f64 {
        self.time + self.duration
    }
}

/// Linear amplitude-to-viseme mapping
#[derive(Debug, Clone, Copy)]
pub struct VisemeMapper {
    gain: f64,
}

impl VisemeMapper {
    pub fn new(gain: f64) -> Self {
        Self { gain }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// `min(amplitude * gain, 1.0)`, clamped to `[0, 1]`. `None` for non-finite input.
    pub fn intensity(&self, amplitude: f64) -> Option<f64> {
        let scaled = amplitude * self.gain;
        if !scaled.is_finite() {
            return None;
        }
        Some(scaled.min(1.0).max(0.0))
    }

    /// Map an RMS amplitude to a code and intensity
    pub fn map(&self, amplitude: f64) -> Option<(Viseme, f64)> {
        let intensity = self.intensity(amplitude)?;
        let last = (Viseme::ALPHABET.len() - 1) as f64;
        let index = (intensity * last).round() as usize;
        Some((Viseme::from_index(index), intensity))
    }
}

/// Phoneme timing supplied by a speech provider (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeTiming {
    pub phoneme: String,
    pub start: f64,
    pub duration: f64,
}

/// ARPABET phoneme to viseme. Stress digits are ignored.
pub fn phoneme_to_viseme(phoneme: &str) -> Viseme {
    let upper = phoneme.trim().to_ascii_uppercase();
    let p = upper.trim_end_matches(['0', '1', '2']);

    match p {
        "" | "SIL" | "SP" | "SPN" => Viseme::Rest,

        // lips together
        "M" | "EM" => Viseme::M,
        "B" => Viseme::B,
        "P" => Viseme::P,

        // teeth on lip
        "F" => Viseme::F,
        "V" => Viseme::V,

        "TH" | "DH" => Viseme::Th,
        "S" | "Z" => Viseme::S,
        "T" | "D" | "DX" => Viseme::T,
        "L" | "EL" => Viseme::L,
        "N" | "NX" | "EN" => Viseme::N,
        "CH" | "JH" | "SH" | "ZH" => Viseme::Ch,
        "K" | "G" | "NG" => Viseme::K,
        "R" | "ER" | "AXR" => Viseme::R,
        "W" | "WH" => Viseme::W,

        // vowels by openness
        "UW" | "UH" => Viseme::U,
        "IY" | "IH" | "Y" | "IX" => Viseme::I,
        "EH" | "EY" | "AE" | "HH" => Viseme::E,
        "OW" | "OY" | "AO" => Viseme::O,
        "AA" | "AH" | "AW" | "AY" | "AX" => Viseme::A,

        _ => Viseme::T,
    }
}

/// Convert provider phoneme timing into visemes, merging adjacent identical codes
pub fn phonemes_to_visemes(
    phonemes: &[PhonemeTiming],
    intensity_floor: f64,
) -> Result<Vec<VisemeKeyframe>, AnimError> {
    if phonemes.is_empty() {
        return Err(AnimError::Validation("Phoneme timing is empty".to_string()));
    }

    let mut result: Vec<VisemeKeyframe> = Vec::with_capacity(phonemes.len());
    let mut previous_start = f64::NEG_INFINITY;

    for (idx, timing) in phonemes.iter().enumerate() {
        if !timing.start.is_finite() || timing.start < 0.0 {
            return Err(AnimError::Validation(format!(
                "Phoneme {} ('{}') has invalid start time {}",
                idx, timing.phoneme, timing.start
            )));
        }
        if !timing.duration.is_finite() || timing.duration < 0.0 {
            return Err(AnimError::Validation(format!(
                "Phoneme {} ('{}') has invalid duration {}",
                idx, timing.phoneme, timing.duration
            )));
        }
        if timing.start < previous_start {
            return Err(AnimError::Validation(format!(
                "Phoneme {} ('{}') starts at {} before the previous phoneme at {}",
                idx, timing.phoneme, timing.start, previous_start
            )));
        }
        previous_start = timing.start;

        let code = phoneme_to_viseme(&timing.phoneme);

        if let Some(last) = result.last_mut() {
            if last.code == code {
                last.duration = (timing.start + timing.duration - last.time).max(last.duration);
                continue;
            }
        }

        result.push(VisemeKeyframe {
            time: timing.start,
            code,
            intensity: code.openness().max(intensity_floor).min(1.0),
            duration: timing.duration,
        });
    }

    Ok(result)
}
