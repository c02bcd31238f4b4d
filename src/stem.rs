//! Songs, stem payloads and name-based stem classification.

use std::sync::Arc;

use crate::pitch::VocalPitchTrack;

/// Where a stem is played.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemKind {
    /// Lead or backing vocals: in-ear bus (optionally also PA)
    Vocal,
    /// Everything else: PA bus
    Backing,
    /// A full mix of the other stems; never played
    Mixdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StemClass {
    pub kind: StemKind,
    /// Carries a melody usable as a pitch reference
    pub melodic: bool,
    /// The name explicitly says so (melody, piano, guitar, ...)
    pub melody_keyword: bool,
}

const MIXDOWN_WORDS: &[&str] = &["mix", "mixdown", "master"];
const MIXDOWN_PHRASES: &[[&str; 2]] = &[["full", "mix"], ["stereo", "mix"]];
const VOCAL_WORDS: &[&str] = &["vocals", "vocal", "voice", "lead", "singing", "vox"];
const RHYTHM_FRAGMENTS: &[&str] = &["drum", "percussion", "perc", "bass"];
const MELODY_WORDS: &[&str] = &["melody", "melodic", "piano", "keys", "guitar", "synth", "strings", "other"];

fn looks_like_extension(ext: &str) -> bool {
    (1..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Lowercased name without extension, split on anything that is not alphanumeric.
fn tokens(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let stem = match lower.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() && looks_like_extension(ext) => base,
        _ => lower.as_str(),
    };
    stem.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Classify a stem by its name.
///
/// Priority: mixdown keywords, then vocal keywords, then backing. Only whole
/// tokens count, so `"Remix Synth"` is not a mixdown.
///
/// ```
/// use stagebus::stem::{classify, StemKind};
///
/// assert_eq!(classify("Lead Vocals.wav").kind, StemKind::Vocal);
/// assert_eq!(classify("Full Mix_master").kind, StemKind::Mixdown);
/// assert!(classify("Other").melodic);
/// assert!(!classify("Drums").melodic);
/// ```
pub fn classify(name: &str) -> StemClass {
    let tokens = tokens(name);
    let has = |words: &[&'static str]| tokens.iter().any(|t| words.iter().any(|w| *w == t.as_str()));

    let mixdown = has(MIXDOWN_WORDS)
        || tokens
            .windows(2)
            .any(|pair| MIXDOWN_PHRASES.iter().any(|phrase| pair[0] == phrase[0] && pair[1] == phrase[1]));
    if mixdown {
        return StemClass {
            kind: StemKind::Mixdown,
            melodic: false,
            melody_keyword: false,
        };
    }

    let vocal = has(VOCAL_WORDS) || tokens.iter().any(|t| t.contains("vocal"));
    if vocal {
        return StemClass {
            kind: StemKind::Vocal,
            melodic: false,
            melody_keyword: false,
        };
    }

    let rhythm = tokens.iter().any(|t| RHYTHM_FRAGMENTS.iter().any(|f| t.contains(f)));
    let melody_keyword = !rhythm && has(MELODY_WORDS);
    StemClass {
        kind: StemKind::Backing,
        melodic: !rhythm,
        melody_keyword,
    }
}

/// Raw stem handed over by the song source. The bytes are consumed by decoding.
#[derive(Clone, Debug)]
pub struct StemPayload {
    pub name: String,
    pub bytes: Vec<u8>,
    pub gain_db: f32,
}

impl StemPayload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            gain_db: 0.0,
        }
    }

    pub fn with_gain_db(mut self, gain_db: f32) -> Self {
        self.gain_db = gain_db;
        self
    }
}

/// A song as supplied by the song source.
#[derive(Clone, Debug, Default)]
pub struct Song {
    pub title: Option<String>,
    pub stems: Vec<StemPayload>,
    pub vocal_pitch: Option<Arc<VocalPitchTrack>>,
}

impl Song {
    pub fn new(stems: Vec<StemPayload>) -> Self {
        Self {
            title: None,
            stems,
            vocal_pitch: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_vocal_pitch(mut self, track: VocalPitchTrack) -> Self {
        self.vocal_pitch = Some(Arc::new(track));
        self
    }
}

/// Index of the stem whose detector feeds the reference tracker: the first
/// backing stem with an explicit melody keyword, else the first melodic one.
pub fn reference_stem<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<usize> {
    let classes: Vec<StemClass> = names.into_iter().map(classify).collect();
    let backing = |c: &StemClass| c.kind == StemKind::Backing && c.melodic;
    classes
        .iter()
        .position(|c| backing(c) && c.melody_keyword)
        .or_else(|| classes.iter().position(backing))
}
