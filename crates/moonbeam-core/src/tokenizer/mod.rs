//! MIDI tokenizer
//!
//! This module converts Standard MIDI Files into bounded integer token
//! sequences for the model and turns generated token sequences back into
//! notes. Timing is quantized to a fixed grid of `steps_per_quarter` steps.

pub mod midi;
pub mod vocab;

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub use vocab::{MusicToken, BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, VOCAB_SIZE};

/// Token id in the music vocabulary
pub type TokenId = u32;

/// Ordered sequence of token ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSequence {
    ids: Vec<TokenId>,
}

impl TokenSequence {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap ids, checking every id against the vocabulary size
    pub fn from_ids(ids: Vec<TokenId>, vocab_size: usize) -> Result<Self> {
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= vocab_size) {
            return Err(CoreError::invalid_parameter(
                "TOKEN_OUT_OF_VOCAB",
                format!("Token id {} is outside the vocabulary", bad),
                "Token sequence construction",
                "Only use ids produced by the tokenizer or the model",
                "token_id",
                bad.to_string(),
                format!("0 to {}", vocab_size.saturating_sub(1)),
            ));
        }
        Ok(Self { ids })
    }

    /// Append a token
    pub fn push(&mut self, id: TokenId) {
        self.ids.push(id);
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the sequence holds no tokens
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Borrow the ids
    pub fn as_slice(&self) -> &[TokenId] {
        &self.ids
    }

    /// Iterate over the ids
    pub fn iter(&self) -> impl Iterator<Item = &TokenId> {
        self.ids.iter()
    }

    /// Take the ids out
    pub fn into_vec(self) -> Vec<TokenId> {
        self.ids
    }
}

impl From<Vec<TokenId>> for TokenSequence {
    fn from(ids: Vec<TokenId>) -> Self {
        Self { ids }
    }
}

/// A note on the tokenizer's time grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// MIDI key 0..=127
    pub pitch: u8,
    /// MIDI velocity 1..=127
    pub velocity: u8,
    /// Onset, in steps from the start of the piece
    pub start: u32,
    /// Length, in steps
    pub duration: u32,
}

/// Configuration for the MIDI tokenizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Time grid resolution
    pub steps_per_quarter: u32,

    /// Resolution of written MIDI files
    pub output_ticks_per_quarter: u16,

    /// Left-pad prompts shorter than `prompt_len` with padding tokens
    pub left_pad: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            steps_per_quarter: 8,
            output_ticks_per_quarter: 480,
            left_pad: true,
        }
    }
}

impl TokenizerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.steps_per_quarter == 0 || self.steps_per_quarter > 96 {
            return Err(CoreError::invalid_parameter(
                "STEPS_PER_QUARTER_OUT_OF_RANGE",
                "tokenizer.steps_per_quarter is out of range",
                "Tokenizer configuration validation",
                "Use 8 for a 32nd-note grid",
                "tokenizer.steps_per_quarter",
                self.steps_per_quarter.to_string(),
                "1 to 96",
            ));
        }
        if self.output_ticks_per_quarter == 0 || self.output_ticks_per_quarter > 0x7FFF {
            return Err(CoreError::invalid_parameter(
                "OUTPUT_TPQ_OUT_OF_RANGE",
                "tokenizer.output_ticks_per_quarter is out of range",
                "Tokenizer configuration validation",
                "Use 480, the common sequencer resolution",
                "tokenizer.output_ticks_per_quarter",
                self.output_ticks_per_quarter.to_string(),
                "1 to 32767",
            ));
        }
        Ok(())
    }
}

/// Result of encoding a prompt file
#[derive(Debug, Clone)]
pub struct EncodedPrompt {
    /// Exactly `prompt_len` tokens when padding is on
    pub tokens: TokenSequence,
    /// Notes fully contained in the prompt tokens
    pub notes: Vec<Note>,
    /// Notes found in the source file
    pub source_notes: usize,
    /// Microseconds per quarter note of the source
    pub tempo: u32,
}

/// Converts between MIDI files and music token sequences
#[derive(Debug, Clone, Default)]
pub struct MidiTokenizer {
    config: TokenizerConfig,
}

impl MidiTokenizer {
    /// Create a tokenizer with the given configuration
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }

    /// Tokenizer configuration
    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    /// Size of the token vocabulary
    pub fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    /// Token that ends generation
    pub fn eos_token_id(&self) -> TokenId {
        EOS_TOKEN
    }

    /// Read and encode a MIDI file into a prompt of `prompt_len` tokens
    pub fn encode_file<P: AsRef<Path>>(&self, path: P, prompt_len: usize) -> Result<EncodedPrompt> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| CoreError::from(e).with_path(path))?;
        self.encode(&bytes, prompt_len).map_err(|e| e.with_path(path))
    }

    /// Encode MIDI bytes into a prompt of `prompt_len` tokens
    pub fn encode(&self, bytes: &[u8], prompt_len: usize) -> Result<EncodedPrompt> {
        let parsed = midi::parse_midi(bytes)?;
        if parsed.notes.is_empty() {
            return Err(CoreError::malformed_input(
                "MIDI_NO_NOTES",
                "MIDI source contains no note events",
                "Encoding prompt",
                "Use a MIDI file with at least one note",
            ));
        }

        let notes = self.quantize(&parsed);
        let (mut ids, boundaries) = Self::tokens_with_boundaries(&notes, prompt_len);

        let kept_notes = if ids.len() <= prompt_len {
            notes.len()
        } else {
            // Cut on the last whole note that fits, or hard-cut if none does
            match boundaries.iter().rposition(|&end| end <= prompt_len) {
                Some(idx) => {
                    ids.truncate(boundaries[idx]);
                    idx + 1
                }
                None => {
                    ids.truncate(prompt_len);
                    0
                }
            }
        };

        if self.config.left_pad && ids.len() < prompt_len {
            let mut padded = vec![PAD_TOKEN; prompt_len - ids.len()];
            padded.append(&mut ids);
            ids = padded;
        }

        debug!(
            "Encoded prompt: {} tokens, {} of {} notes",
            ids.len(),
            kept_notes,
            notes.len()
        );

        Ok(EncodedPrompt {
            tokens: TokenSequence::from(ids),
            notes: notes[..kept_notes].to_vec(),
            source_notes: notes.len(),
            tempo: parsed.tempo,
        })
    }

    /// Encode grid notes into a full token stream starting with `BOS`
    pub fn notes_to_tokens(&self, notes: &[Note]) -> TokenSequence {
        let mut sorted = notes.to_vec();
        sorted.sort_by_key(|n| (n.start, n.pitch));
        TokenSequence::from(Self::tokens_with_boundaries(&sorted, usize::MAX).0)
    }

    /// Decode tokens into notes, dropping anything that does not form a note
    pub fn decode(&self, tokens: &[TokenId]) -> Vec<Note> {
        struct Pending {
            pitch: u8,
            start: u32,
            velocity: Option<u8>,
        }

        let mut notes = Vec::new();
        let mut cursor: u32 = 0;
        let mut pending: Option<Pending> = None;
        let mut dropped = 0usize;

        for &id in tokens {
            match MusicToken::from_id(id) {
                Some(MusicToken::Eos) => break,
                Some(MusicToken::Pad | MusicToken::Bos) => {}
                Some(MusicToken::TimeShift(steps)) => cursor = cursor.saturating_add(steps),
                Some(MusicToken::Pitch(pitch)) => {
                    if pending.replace(Pending { pitch, start: cursor, velocity: None }).is_some() {
                        dropped += 1;
                    }
                }
                Some(MusicToken::Velocity(bucket)) => match pending.as_mut() {
                    Some(note) => note.velocity = Some(vocab::bucket_to_velocity(bucket)),
                    None => dropped += 1,
                },
                Some(MusicToken::Duration(duration)) => match pending.take() {
                    Some(note) => notes.push(Note {
                        pitch: note.pitch,
                        velocity: note.velocity.unwrap_or(vocab::bucket_to_velocity(20)),
                        start: note.start,
                        duration,
                    }),
                    None => dropped += 1,
                },
                None => dropped += 1,
            }
        }

        if pending.is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Decode dropped {} tokens that did not form notes", dropped);
        }
        notes
    }

    /// Decode tokens and render them as MIDI file bytes
    pub fn decode_to_midi(&self, tokens: &[TokenId], tempo: u32) -> Result<(Vec<u8>, usize)> {
        let notes = self.decode(tokens);
        let bytes = midi::render_midi(
            &notes,
            self.config.steps_per_quarter,
            self.config.output_ticks_per_quarter,
            tempo,
        )?;
        Ok((bytes, notes.len()))
    }

    fn quantize(&self, parsed: &midi::ParsedMidi) -> Vec<Note> {
        let spq = u64::from(self.config.steps_per_quarter);
        let tpq = u64::from(parsed.ticks_per_quarter.max(1));
        let to_step = |tick: u64| ((tick * spq + tpq / 2) / tpq).min(u64::from(u32::MAX)) as u32;

        let mut notes: Vec<Note> = parsed
            .notes
            .iter()
            .map(|n| {
                let start = to_step(n.start_tick);
                let end = to_step(n.end_tick);
                Note {
                    pitch: n.pitch.min(127),
                    velocity: n.velocity.clamp(1, 127),
                    start,
                    duration: end.saturating_sub(start).clamp(1, vocab::MAX_DURATION),
                }
            })
            .collect();
        notes.sort_by_key(|n| (n.start, n.pitch));
        notes
    }

    /// Token stream for sorted notes, plus the stream length after each note
    ///
    /// Emission stops once the stream holds more than `limit` tokens, so a
    /// long silence cannot grow it past `limit + 1`. Boundaries are only
    /// recorded for notes emitted in full.
    fn tokens_with_boundaries(notes: &[Note], limit: usize) -> (Vec<TokenId>, Vec<usize>) {
        let cap = limit.saturating_add(1);
        let mut ids = Vec::with_capacity(notes.len().saturating_mul(4).saturating_add(1).min(cap));
        let mut boundaries = Vec::with_capacity(notes.len());
        ids.push(BOS_TOKEN);

        let mut cursor: u32 = 0;
        'notes: for note in notes {
            let mut gap = note.start.saturating_sub(cursor);
            while gap > 0 {
                if ids.len() >= cap {
                    break 'notes;
                }
                let shift = gap.min(vocab::MAX_TIME_SHIFT);
                ids.push(MusicToken::TimeShift(shift).id());
                gap -= shift;
            }
            cursor = cursor.max(note.start);

            for id in [
                MusicToken::Pitch(note.pitch).id(),
                MusicToken::Velocity(vocab::velocity_to_bucket(note.velocity)).id(),
                MusicToken::Duration(note.duration).id(),
            ] {
                if ids.len() >= cap {
                    break 'notes;
                }
                ids.push(id);
            }
            boundaries.push(ids.len());
        }

        (ids, boundaries)
    }
}
