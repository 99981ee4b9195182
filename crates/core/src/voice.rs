use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_VOICE: &str = "es-ES-Standard-A";

/// SSML gender attribute sent alongside the voice name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoiceGender {
    Male,
    Female,
}

impl VoiceGender {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceGender::Male => "MALE",
            VoiceGender::Female => "FEMALE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub name: &'static str,
    pub gender: VoiceGender,
}

impl Voice {
    const fn new(name: &'static str, gender: VoiceGender) -> Self {
        Self { name, gender }
    }

    /// BCP-47 code from the voice name, e.g. `es-ES` for `es-ES-Wavenet-B`.
    pub fn language_code(&self) -> &'static str {
        match self.name.match_indices('-').nth(1) {
            Some((end, _)) => &self.name[..end],
            None => self.name,
        }
    }
}

use VoiceGender::{Female, Male};

pub static SPANISH_VOICES: &[Voice] = &[
    Voice::new("es-ES-Journey-D", Male),
    Voice::new("es-ES-Journey-F", Female),
    Voice::new("es-ES-Journey-O", Female),
    Voice::new("es-ES-Neural2-A", Female),
    Voice::new("es-ES-Neural2-B", Male),
    Voice::new("es-ES-Neural2-C", Female),
    Voice::new("es-ES-Neural2-D", Female),
    Voice::new("es-ES-Neural2-E", Female),
    Voice::new("es-ES-Neural2-F", Male),
    Voice::new("es-ES-Polyglot-1", Male),
    Voice::new("es-ES-Standard-A", Female),
    Voice::new("es-ES-Standard-B", Male),
    Voice::new("es-ES-Standard-C", Female),
    Voice::new("es-ES-Standard-D", Female),
    Voice::new("es-ES-Standard-E", Male),
    Voice::new("es-ES-Standard-F", Female),
    Voice::new("es-ES-Studio-C", Female),
    Voice::new("es-ES-Studio-F", Male),
    Voice::new("es-ES-Wavenet-B", Male),
    Voice::new("es-ES-Wavenet-C", Female),
    Voice::new("es-ES-Wavenet-D", Female),
    Voice::new("es-ES-Wavenet-E", Male),
    Voice::new("es-ES-Wavenet-F", Female),
];

/// Fixed set of voices callers may select by name.
#[derive(Debug, Clone, Copy)]
pub struct VoiceCatalog {
    voices: &'static [Voice],
}

impl VoiceCatalog {
    pub const fn new(voices: &'static [Voice]) -> Self {
        Self { voices }
    }

    pub fn spanish() -> Self {
        Self::new(SPANISH_VOICES)
    }

    pub fn lookup(&self, name: &str) -> Result<&'static Voice, ConfigError> {
        self.voices
            .iter()
            .find(|voice| voice.name == name)
            .ok_or_else(|| ConfigError::UnknownVoice {
                name: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Voice> {
        self.voices.iter()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

impl Default for VoiceCatalog {
    fn default() -> Self {
        Self::spanish()
    }
}
