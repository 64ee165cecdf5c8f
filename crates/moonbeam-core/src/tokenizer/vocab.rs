//! Event vocabulary for symbolic music tokens
//!
//! The vocabulary is a fixed, bounded alphabet split into disjoint sub-ranges
//! per event class, so every token id maps to exactly one event:
//!
//! | ids        | event                 |
//! |------------|-----------------------|
//! | 0          | padding               |
//! | 1          | beginning of sequence |
//! | 2          | end of sequence       |
//! | 3..35      | time shift, 1..=32    |
//! | 35..163    | pitch, 0..=127        |
//! | 163..195   | velocity bucket 0..32 |
//! | 195..259   | duration, 1..=64      |

use super::TokenId;

/// Padding token id
pub const PAD_TOKEN: TokenId = 0;
/// Beginning of sequence token id
pub const BOS_TOKEN: TokenId = 1;
/// End of sequence token id
pub const EOS_TOKEN: TokenId = 2;

/// Longest single time shift, in steps
pub const MAX_TIME_SHIFT: u32 = 32;
/// Number of pitch tokens
pub const NUM_PITCHES: u32 = 128;
/// Number of velocity buckets
pub const NUM_VELOCITY_BUCKETS: u32 = 32;
/// Longest encodable note, in steps
pub const MAX_DURATION: u32 = 64;

const TIME_SHIFT_OFFSET: u32 = 3;
const PITCH_OFFSET: u32 = TIME_SHIFT_OFFSET + MAX_TIME_SHIFT;
const VELOCITY_OFFSET: u32 = PITCH_OFFSET + NUM_PITCHES;
const DURATION_OFFSET: u32 = VELOCITY_OFFSET + NUM_VELOCITY_BUCKETS;

/// Total number of token ids
pub const VOCAB_SIZE: usize = (DURATION_OFFSET + MAX_DURATION) as usize;

/// MIDI velocities covered by one bucket
const VELOCITY_BUCKET_WIDTH: u32 = 128 / NUM_VELOCITY_BUCKETS;

/// A decoded vocabulary entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MusicToken {
    Pad,
    Bos,
    Eos,
    /// Advance the time cursor by 1..=32 steps
    TimeShift(u32),
    /// MIDI key 0..=127
    Pitch(u8),
    /// Velocity bucket 0..32
    Velocity(u8),
    /// Note length, 1..=64 steps
    Duration(u32),
}

impl MusicToken {
    /// Map this event to its token id
    pub fn id(self) -> TokenId {
        match self {
            Self::Pad => PAD_TOKEN,
            Self::Bos => BOS_TOKEN,
            Self::Eos => EOS_TOKEN,
            Self::TimeShift(steps) => TIME_SHIFT_OFFSET + steps.clamp(1, MAX_TIME_SHIFT) - 1,
            Self::Pitch(pitch) => PITCH_OFFSET + u32::from(pitch.min(127)),
            Self::Velocity(bucket) => {
                VELOCITY_OFFSET + u32::from(bucket).min(NUM_VELOCITY_BUCKETS - 1)
            }
            Self::Duration(steps) => DURATION_OFFSET + steps.clamp(1, MAX_DURATION) - 1,
        }
    }

    /// Map a token id back to its event, `None` if it is outside the vocabulary
    pub fn from_id(id: TokenId) -> Option<Self> {
        match id {
            PAD_TOKEN => Some(Self::Pad),
            BOS_TOKEN => Some(Self::Bos),
            EOS_TOKEN => Some(Self::Eos),
            id if id < PITCH_OFFSET => Some(Self::TimeShift(id - TIME_SHIFT_OFFSET + 1)),
            id if id < VELOCITY_OFFSET => Some(Self::Pitch((id - PITCH_OFFSET) as u8)),
            id if id < DURATION_OFFSET => Some(Self::Velocity((id - VELOCITY_OFFSET) as u8)),
            id if (id as usize) < VOCAB_SIZE => Some(Self::Duration(id - DURATION_OFFSET + 1)),
            _ => None,
        }
    }

    /// Whether this token can only appear as control (not as a note part)
    pub fn is_special(self) -> bool {
        matches!(self, Self::Pad | Self::Bos | Self::Eos)
    }
}

/// Quantize a MIDI velocity into its bucket
pub fn velocity_to_bucket(velocity: u8) -> u8 {
    (u32::from(velocity.min(127)) / VELOCITY_BUCKET_WIDTH) as u8
}

/// Representative MIDI velocity of a bucket (bucket center, never zero)
pub fn bucket_to_velocity(bucket: u8) -> u8 {
    let bucket = u32::from(bucket).min(NUM_VELOCITY_BUCKETS - 1);
    (bucket * VELOCITY_BUCKET_WIDTH + VELOCITY_BUCKET_WIDTH / 2).clamp(1, 127) as u8
}

/// Human-readable token name, used by the CLI token dump
pub fn describe(id: TokenId) -> String {
    match MusicToken::from_id(id) {
        Some(MusicToken::Pad) => "<pad>".to_string(),
        Some(MusicToken::Bos) => "<bos>".to_string(),
        Some(MusicToken::Eos) => "<eos>".to_string(),
        Some(MusicToken::TimeShift(n)) => format!("shift:{}", n),
        Some(MusicToken::Pitch(p)) => format!("pitch:{}", p),
        Some(MusicToken::Velocity(v)) => format!("vel:{}", v),
        Some(MusicToken::Duration(d)) => format!("dur:{}", d),
        None => format!("<unk:{}>", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocab_layout() {
        assert_eq!(VOCAB_SIZE, 259);
        assert_eq!(MusicToken::TimeShift(1).id(), 3);
        assert_eq!(MusicToken::Pitch(0).id(), 35);
        assert_eq!(MusicToken::Velocity(0).id(), 163);
        assert_eq!(MusicToken::Duration(1).id(), 195);
        assert_eq!(MusicToken::Duration(MAX_DURATION).id() as usize, VOCAB_SIZE - 1);
    }

    #[test]
    fn test_every_id_maps_back() {
        for id in 0..VOCAB_SIZE as TokenId {
            let token = MusicToken::from_id(id).expect("id inside vocabulary");
            assert_eq!(token.id(), id);
        }
        assert_eq!(MusicToken::from_id(VOCAB_SIZE as TokenId), None);
    }

    #[test]
    fn test_velocity_buckets() {
        assert_eq!(velocity_to_bucket(0), 0);
        assert_eq!(velocity_to_bucket(127), 31);
        assert_eq!(velocity_to_bucket(bucket_to_velocity(20)), 20);
        assert!(bucket_to_velocity(0) > 0);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(MusicToken::Pitch(60).id()), "pitch:60");
        assert_eq!(describe(9999), "<unk:9999>");
    }
}
