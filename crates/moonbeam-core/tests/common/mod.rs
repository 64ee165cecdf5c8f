//! Shared fixtures: mock models and prompt files

#![allow(dead_code)]

use moonbeam_core::{
    model::{Model, ModelOutput, ModelState},
    progress::ProgressEvent,
    tokenizer::{midi, vocab::MusicToken, Note, TokenId, EOS_TOKEN, VOCAB_SIZE},
    CoreError, Result,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Route engine logs to the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pitch every generated note uses
pub const GENERATED_PITCH: u8 = 72;

const PEAK: f32 = 12.0;

fn peaked(id: TokenId) -> Vec<f32> {
    let mut logits = vec![0.0; VOCAB_SIZE];
    logits[id as usize] = PEAK;
    logits
}

/// Token the grammar model favors after `last`
fn next_in_grammar(last: Option<TokenId>) -> TokenId {
    match last.and_then(MusicToken::from_id) {
        Some(MusicToken::TimeShift(_)) => MusicToken::Pitch(GENERATED_PITCH).id(),
        Some(MusicToken::Pitch(_)) => MusicToken::Velocity(20).id(),
        Some(MusicToken::Velocity(_)) => MusicToken::Duration(8).id(),
        _ => MusicToken::TimeShift(8).id(),
    }
}

/// Continues with eighth-step notes: shift 8, pitch 72, velocity 20, duration 8
///
/// Strongly peaked, so sampling with top_p below ~0.98 is deterministic.
#[derive(Default)]
pub struct GrammarModel {
    /// Peak on EOS once this many calls have been made
    pub eos_after: Option<usize>,
    /// Calls after which `forward` fails once
    pub fail_on_call: Option<usize>,
    /// Sleep per forward call
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl GrammarModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Model for GrammarModel {
    fn name(&self) -> &str {
        "grammar"
    }

    fn model_type(&self) -> &str {
        "mock"
    }

    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn context_length(&self) -> Option<usize> {
        Some(1024)
    }

    fn forward(&self, input_ids: &[TokenId], _past: Option<&ModelState>) -> Result<ModelOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_on_call == Some(call) {
            return Err(CoreError::inference(
                "MOCK_FAILURE",
                "Mock runtime failure",
                "Mock forward pass",
                "None; this failure is injected",
            ));
        }
        if self.eos_after.is_some_and(|n| call >= n) {
            return Ok(ModelOutput::logits(peaked(EOS_TOKEN)));
        }
        Ok(ModelOutput::logits(peaked(next_in_grammar(input_ids.last().copied()))))
    }
}

/// Nearly flat logits that depend only on the input length
pub struct NoisyModel;

impl Model for NoisyModel {
    fn name(&self) -> &str {
        "noisy"
    }

    fn model_type(&self) -> &str {
        "mock"
    }

    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn context_length(&self) -> Option<usize> {
        None
    }

    fn forward(&self, input_ids: &[TokenId], _past: Option<&ModelState>) -> Result<ModelOutput> {
        let len = input_ids.len();
        let mut logits: Vec<f32> = (0..VOCAB_SIZE)
            .map(|i| ((i * 31 + len * 17) % 13) as f32 * 0.2)
            .collect();
        logits[EOS_TOKEN as usize] = f32::NEG_INFINITY;
        Ok(ModelOutput::logits(logits))
    }
}

/// Four bars of quarter notes at 8 steps per quarter: 16 notes, 64 tokens
pub fn four_bar_notes() -> Vec<Note> {
    (0..16)
        .map(|i| Note {
            pitch: 60 + (i % 12) as u8,
            velocity: 82,
            start: i * 8,
            duration: 8,
        })
        .collect()
}

pub fn write_prompt(dir: &Path, name: &str) -> PathBuf {
    let bytes = midi::render_midi(&four_bar_notes(), 8, 480, midi::DEFAULT_TEMPO).expect("render prompt");
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write prompt");
    path
}

pub fn count_notes(path: &Path) -> usize {
    let bytes = std::fs::read(path).expect("read output");
    midi::parse_midi(&bytes).expect("parse output").notes.len()
}

/// Drain a progress channel through the terminal event
pub async fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}
