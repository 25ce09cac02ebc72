//! Page-scoped artifacts produced by the reader pipelines
//!
//! - `PageAudio`: synthesized speech for every sentence on a page
//! - `PageTranslation`: translated text for every sentence on a page

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::MemorySize;

/// Fixed bookkeeping cost charged per clip or sentence
const PER_ITEM_OVERHEAD: u64 = 64;

/// Synthesized audio for one sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClip {
    /// Sentence index within the page
    pub sentence_index: usize,
    /// Encoding of `data` (e.g. "audio/mpeg")
    pub mime_type: String,
    pub duration_ms: u32,
    /// Encoded audio bytes
    pub data: Vec<u8>,
}

/// All audio clips for a page, in reading order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAudio {
    pub clips: Vec<AudioClip>,
}

impl PageAudio {
    /// Total playback time of the page
    pub fn duration_ms(&self) -> u64 {
        self.clips.iter().map(|clip| u64::from(clip.duration_ms)).sum()
    }

    /// Clip for a sentence, if synthesized
    pub fn clip(&self, sentence_index: usize) -> Option<&AudioClip> {
        self.clips
            .iter()
            .find(|clip| clip.sentence_index == sentence_index)
    }
}

impl MemorySize for PageAudio {
    fn memory_size(&self) -> u64 {
        self.clips
            .iter()
            .map(|clip| clip.data.len() as u64 + clip.mime_type.len() as u64 + PER_ITEM_OVERHEAD)
            .sum()
    }
}

/// Translated sentences for a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTranslation {
    /// BCP 47 language tag of the translated text
    pub target_language: String,
    /// Sentence index -> translated text
    pub sentences: BTreeMap<usize, String>,
}

impl PageTranslation {
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
            sentences: BTreeMap::new(),
        }
    }

    pub fn sentence(&self, index: usize) -> Option<&str> {
        self.sentences.get(&index).map(String::as_str)
    }
}

impl MemorySize for PageTranslation {
    fn memory_size(&self) -> u64 {
        let text: u64 = self
            .sentences
            .values()
            .map(|text| text.len() as u64 + PER_ITEM_OVERHEAD)
            .sum();
        text + self.target_language.len() as u64
    }
}
