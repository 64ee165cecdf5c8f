//! Standard MIDI File reading and writing.
//!
//! Reading flattens every track and channel into a list of absolute-tick
//! notes by pairing note-on with note-off events (a note-on with velocity 0
//! counts as a note-off). Writing produces a single-track (format 0) file from
//! step-quantized notes.
//!
//! Uses the `midly` crate for parsing and serialization.

use super::Note;
use crate::{CoreError, Result};
use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, trace};

/// Default tempo: 500,000 µs per quarter note = 120 BPM
pub const DEFAULT_TEMPO: u32 = 500_000;

/// A note as found in a source file, in absolute ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceNote {
    pub pitch: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub end_tick: u64,
}

/// The note content of a parsed MIDI file
#[derive(Debug, Clone)]
pub struct ParsedMidi {
    /// Pulses per quarter note (approximated for SMPTE timing)
    pub ticks_per_quarter: u32,
    /// Microseconds per quarter note from the first tempo event
    pub tempo: u32,
    /// All notes of all tracks, ordered by start tick then pitch
    pub notes: Vec<SourceNote>,
}

/// Parse a Standard MIDI File into its notes
pub fn parse_midi(bytes: &[u8]) -> Result<ParsedMidi> {
    let smf = Smf::parse(bytes).map_err(|e| {
        CoreError::malformed_input(
            "MIDI_PARSE_ERROR",
            format!("Failed to parse MIDI data: {}", e),
            "Reading Standard MIDI File",
            "Provide a valid Standard MIDI File (.mid/.midi)",
        )
    })?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(tpq) => u32::from(tpq.as_int()).max(1),
        // SMPTE timing has no quarter note; assume 120 BPM
        Timing::Timecode(fps, subframes) => {
            ((fps.as_f32() * f32::from(subframes)) / 2.0).round().max(1.0) as u32
        }
    };

    let mut tempo = None;
    let mut notes = Vec::new();

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        let mut sounding: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();

        for event in track {
            abs_tick += u64::from(event.delta.as_int());
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                    tempo.get_or_insert(t.as_int());
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            sounding
                                .entry((channel, key.as_int()))
                                .or_default()
                                .push_back((abs_tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let open = sounding
                                .get_mut(&(channel, key.as_int()))
                                .and_then(|queue| queue.pop_front());
                            match open {
                                Some((start_tick, velocity)) => notes.push(SourceNote {
                                    pitch: key.as_int(),
                                    velocity,
                                    start_tick,
                                    end_tick: abs_tick,
                                }),
                                None => trace!(
                                    "Dropping unmatched note-off for key {} on track {}",
                                    key.as_int(),
                                    track_idx
                                ),
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // Notes still sounding at the end of the track end there
        for ((_, pitch), queue) in sounding {
            for (start_tick, velocity) in queue {
                notes.push(SourceNote {
                    pitch,
                    velocity,
                    start_tick,
                    end_tick: abs_tick.max(start_tick),
                });
            }
        }
    }

    notes.sort_by_key(|n| (n.start_tick, n.pitch, n.end_tick));

    debug!(
        "Parsed MIDI: {} tracks, {} notes, {} ticks/quarter",
        smf.tracks.len(),
        notes.len(),
        ticks_per_quarter
    );

    Ok(ParsedMidi {
        ticks_per_quarter,
        tempo: tempo.unwrap_or(DEFAULT_TEMPO),
        notes,
    })
}

/// Render step-quantized notes into an in-memory single-track SMF
pub fn render_midi(
    notes: &[Note],
    steps_per_quarter: u32,
    ticks_per_quarter: u16,
    tempo: u32,
) -> Result<Vec<u8>> {
    let ticks_per_quarter = ticks_per_quarter.clamp(1, 0x7FFF);
    let steps_per_quarter = u64::from(steps_per_quarter.max(1));
    let to_tick = |step: u32| u64::from(step) * u64::from(ticks_per_quarter) / steps_per_quarter;

    // A note re-struck before it ends is cut at the new onset
    let mut ordered: Vec<Note> = notes.to_vec();
    ordered.sort_by_key(|n| (n.start, n.pitch));
    let mut last_by_pitch: HashMap<u8, usize> = HashMap::new();
    for idx in 0..ordered.len() {
        let pitch = ordered[idx].pitch;
        if let Some(prev) = last_by_pitch.insert(pitch, idx) {
            let prev_end = ordered[prev].start + ordered[prev].duration;
            if prev_end > ordered[idx].start {
                ordered[prev].duration = ordered[idx].start - ordered[prev].start;
            }
        }
    }

    // (tick, note-off before note-on, pitch, velocity)
    let mut events: Vec<(u64, u8, u8, u8)> = Vec::with_capacity(ordered.len() * 2);
    for note in ordered.iter().filter(|n| n.duration > 0) {
        events.push((to_tick(note.start), 1, note.pitch.min(127), note.velocity.clamp(1, 127)));
        events.push((to_tick(note.start + note.duration), 0, note.pitch.min(127), 0));
    }
    events.sort_by_key(|&(tick, order, pitch, _)| (tick, order, pitch));

    let channel = u4::new(0);
    let mut track: Track<'static> = Vec::with_capacity(events.len() + 3);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo.clamp(1, 0xFF_FFFF)))),
    });
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Midi {
            channel,
            message: MidiMessage::ProgramChange { program: u7::new(0) },
        },
    });

    let mut last_tick = 0u64;
    for (tick, order, pitch, velocity) in events {
        let delta = (tick - last_tick).min(0x0FFF_FFFF) as u32;
        last_tick = tick;
        let message = if order == 0 {
            MidiMessage::NoteOff { key: u7::new(pitch), vel: u7::new(0) }
        } else {
            MidiMessage::NoteOn { key: u7::new(pitch), vel: u7::new(velocity) }
        };
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(ticks_per_quarter)),
    ));
    smf.tracks.push(track);

    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

/// Write a file so that it either appears complete or not at all
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = std::path::PathBuf::from(partial);

    if let Err(e) = std::fs::write(&partial, bytes) {
        let _ = std::fs::remove_file(&partial);
        return Err(CoreError::from(e).with_path(&partial));
    }
    std::fs::rename(&partial, path).map_err(|e| {
        let _ = std::fs::remove_file(&partial);
        CoreError::from(e).with_path(path)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, start: u32, duration: u32) -> Note {
        Note { pitch, velocity: 80, start, duration }
    }

    #[test]
    fn test_render_then_parse() {
        let notes = vec![note(60, 0, 8), note(64, 8, 4), note(67, 12, 4)];
        let bytes = render_midi(&notes, 8, 480, 600_000).unwrap();
        let parsed = parse_midi(&bytes).unwrap();

        assert_eq!(parsed.ticks_per_quarter, 480);
        assert_eq!(parsed.tempo, 600_000);
        assert_eq!(parsed.notes.len(), 3);
        assert_eq!(parsed.notes[1].pitch, 64);
        assert_eq!(parsed.notes[1].start_tick, 480);
        assert_eq!(parsed.notes[1].end_tick, 720);
    }

    #[test]
    fn test_restruck_pitch_is_cut() {
        let notes = vec![note(60, 0, 16), note(60, 8, 8)];
        let bytes = render_midi(&notes, 8, 480, DEFAULT_TEMPO).unwrap();
        let parsed = parse_midi(&bytes).unwrap();

        assert_eq!(parsed.notes.len(), 2);
        assert_eq!(parsed.notes[0].end_tick, 480);
        assert_eq!(parsed.notes[1].start_tick, 480);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = parse_midi(b"definitely not midi").unwrap_err();
        assert_eq!(err.code(), "MIDI_PARSE_ERROR");
    }

    #[test]
    fn test_atomic_write_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mid");
        write_file_atomic(&path, b"MThd").unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("out.mid.partial").exists());
    }
}
