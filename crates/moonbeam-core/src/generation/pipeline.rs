//! Autoregressive decoding loop
//!
//! Drives one request through `Encoding -> Decoding(step) -> Finalizing`:
//! the prompt is tokenized, each step runs the model on the current sequence
//! and samples one token, and the finished sequence is decoded and written
//! next to the input. Any error or cancellation leaves no output behind.

use crate::{
    generation::{FinishReason, GenerationRequest, GenerationResult, GenerationStats},
    model::ModelState,
    progress::ProgressEvent,
    sampling::sample,
    session::ModelSession,
    tokenizer::{midi::write_file_atomic, MidiTokenizer, TokenSequence},
    CoreError, Result,
};
use rand::{rngs::StdRng, SeedableRng};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Where a generation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    Idle,
    Encoding,
    Decoding { step: usize },
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

/// In-progress sequence owned by the running loop
#[derive(Debug)]
pub struct DecodeState {
    pub tokens: TokenSequence,
    pub step: usize,
    pub model_state: Option<ModelState>,
    prompt_len: usize,
}

impl DecodeState {
    fn new(prompt: TokenSequence) -> Self {
        Self {
            prompt_len: prompt.len(),
            tokens: prompt,
            step: 0,
            model_state: None,
        }
    }

    /// Tokens appended after the prompt
    pub fn generated(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }
}

/// Generation pipeline over a borrowed session and tokenizer
pub struct GenerationPipeline<'a> {
    session: &'a ModelSession,
    tokenizer: &'a MidiTokenizer,
    max_sequence_length: usize,
    progress_interval: usize,
    phase: DecodePhase,
}

impl<'a> GenerationPipeline<'a> {
    /// Create a new generation pipeline
    pub fn new(
        session: &'a ModelSession,
        tokenizer: &'a MidiTokenizer,
        max_sequence_length: usize,
        progress_interval: usize,
    ) -> Self {
        Self {
            session,
            tokenizer,
            max_sequence_length,
            progress_interval: progress_interval.max(1),
            phase: DecodePhase::Idle,
        }
    }

    /// Current phase
    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    /// Run a request to completion
    ///
    /// Info events go to `emit` as they happen; the outcome is returned and
    /// turned into the terminal event by the caller.
    pub fn run(
        &mut self,
        job_id: Uuid,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        emit: &mut dyn FnMut(ProgressEvent),
    ) -> Result<GenerationResult> {
        let result = self.run_inner(job_id, request, cancel, emit);
        self.set_phase(match &result {
            Ok(_) => DecodePhase::Done,
            Err(CoreError::Cancelled { .. }) => DecodePhase::Cancelled,
            Err(_) => DecodePhase::Failed,
        });
        result
    }

    fn run_inner(
        &mut self,
        job_id: Uuid,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        emit: &mut dyn FnMut(ProgressEvent),
    ) -> Result<GenerationResult> {
        let started = Instant::now();

        self.set_phase(DecodePhase::Encoding);
        emit(ProgressEvent::info(job_id, format!("Temperature: {}", request.temperature)));
        emit(ProgressEvent::info(job_id, format!("Top-p: {}", request.top_p)));
        emit(ProgressEvent::info(job_id, format!("Prompt length: {}", request.prompt_len)));
        emit(ProgressEvent::info(job_id, format!("Max generation length: {}", request.max_gen_len)));
        emit(ProgressEvent::info(
            job_id,
            format!("Reading MIDI file: {}", request.midi_path.display()),
        ));

        let prompt = self.tokenizer.encode_file(&request.midi_path, request.prompt_len)?;
        emit(ProgressEvent::info(
            job_id,
            format!(
                "Encoded {} prompt tokens from {} of {} notes",
                prompt.tokens.len(),
                prompt.notes.len(),
                prompt.source_notes
            ),
        ));

        let mut state = DecodeState::new(prompt.tokens);
        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let params = request.sampling_params();
        let eos = self.tokenizer.eos_token_id();
        let mut finish_reason = FinishReason::MaxTokens;
        let mut first_token_at = None;

        emit(ProgressEvent::info(job_id, "Running inference..."));

        for step in 0..request.max_gen_len {
            if cancel.is_cancelled() {
                return Err(CoreError::cancelled(Some(step)));
            }
            if state.tokens.len() >= self.max_sequence_length {
                finish_reason = FinishReason::ContextLimit;
                break;
            }

            self.set_phase(DecodePhase::Decoding { step });
            state.step = step;

            let output = self
                .session
                .infer(state.tokens.as_slice(), state.model_state.as_ref())
                .map_err(|e| e.at_step(step))?;
            let next = sample(&output.logits, &params, &mut rng).map_err(|e| e.at_step(step))?;
            state.model_state = output.state;
            first_token_at.get_or_insert_with(|| started.elapsed());

            if next == eos {
                finish_reason = FinishReason::EndOfSequence;
                debug!("End of sequence at step {}", step);
                break;
            }
            state.tokens.push(next);

            if (step + 1) % self.progress_interval == 0 {
                emit(ProgressEvent::info(
                    job_id,
                    format!("Generated {}/{} tokens", step + 1, request.max_gen_len),
                ));
            }
        }

        if cancel.is_cancelled() {
            return Err(CoreError::cancelled(Some(state.step + 1)));
        }

        self.set_phase(DecodePhase::Finalizing);
        let generated = state.generated();
        let tokens = TokenSequence::from_ids(
            std::mem::take(&mut state.tokens).into_vec(),
            self.tokenizer.vocab_size(),
        )?;
        let (bytes, notes_written) = self.tokenizer.decode_to_midi(tokens.as_slice(), prompt.tempo)?;
        let output_path = request.output_path();
        emit(ProgressEvent::info(
            job_id,
            format!("Writing {} notes ({} new tokens)", notes_written, generated),
        ));
        write_file_atomic(&output_path, &bytes)?;

        let total = started.elapsed();
        let decode_secs = first_token_at
            .map(|first| total.saturating_sub(first).as_secs_f64())
            .unwrap_or(0.0);
        let stats = GenerationStats {
            time_to_first_token_ms: first_token_at.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0),
            total_time_ms: total.as_secs_f64() * 1000.0,
            tokens_per_second: if decode_secs > 0.0 { generated as f64 / decode_secs } else { 0.0 },
            notes_written,
        };

        info!(
            "Generation {} finished ({:?}): {} tokens, {} notes -> {}",
            job_id,
            finish_reason,
            generated,
            notes_written,
            output_path.display()
        );

        Ok(GenerationResult {
            output_path,
            prompt_tokens: state.prompt_len,
            generated_tokens: generated,
            tokens,
            finish_reason,
            stats,
        })
    }

    fn set_phase(&mut self, phase: DecodePhase) {
        trace!("Decode phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Model, ModelOutput},
        progress::ProgressKind,
        session::SessionConfig,
        tokenizer::{midi, vocab::MusicToken, Note, TokenId, EOS_TOKEN, VOCAB_SIZE},
    };
    use std::path::Path;
    use std::sync::Arc;

    /// Peaks on a fixed token
    struct Constant(TokenId);

    impl Model for Constant {
        fn name(&self) -> &str {
            "constant"
        }
        fn model_type(&self) -> &str {
            "test"
        }
        fn vocab_size(&self) -> usize {
            VOCAB_SIZE
        }
        fn context_length(&self) -> Option<usize> {
            None
        }
        fn forward(&self, _input_ids: &[TokenId], _past: Option<&ModelState>) -> Result<ModelOutput> {
            let mut logits = vec![0.0; VOCAB_SIZE];
            logits[self.0 as usize] = 20.0;
            Ok(ModelOutput::logits(logits))
        }
    }

    fn write_prompt(dir: &Path) -> std::path::PathBuf {
        let notes: Vec<Note> = (0..4)
            .map(|i| Note { pitch: 60 + i as u8, velocity: 80, start: i * 8, duration: 8 })
            .collect();
        let path = dir.join("seed.mid");
        std::fs::write(&path, midi::render_midi(&notes, 8, 480, midi::DEFAULT_TEMPO).unwrap()).unwrap();
        path
    }

    fn run(model: TokenId, request: &GenerationRequest, max_seq: usize) -> (Result<GenerationResult>, Vec<ProgressEvent>) {
        let session = ModelSession::from_model(Arc::new(Constant(model)), SessionConfig::default()).unwrap();
        let tokenizer = MidiTokenizer::default();
        let mut pipeline = GenerationPipeline::new(&session, &tokenizer, max_seq, 4);
        let mut events = Vec::new();
        let result = pipeline.run(Uuid::nil(), request, &CancellationToken::new(), &mut |e| events.push(e));
        (result, events)
    }

    #[test]
    fn test_eos_stops_without_appending() {
        let dir = tempfile::tempdir().unwrap();
        let request = GenerationRequest::new(write_prompt(dir.path())).with_prompt_len(32).with_max_gen_len(10);

        let (result, events) = run(EOS_TOKEN, &request, 2048);
        let result = result.unwrap();

        assert_eq!(result.finish_reason, FinishReason::EndOfSequence);
        assert_eq!(result.generated_tokens, 0);
        assert_eq!(result.tokens.len(), 32);
        assert_eq!(result.stats.notes_written, 4);
        assert!(result.output_path.exists());
        assert!(events.iter().all(|e| e.kind == ProgressKind::Info));
        assert!(events.iter().any(|e| e.message == "Running inference..."));
    }

    #[test]
    fn test_max_gen_len_bounds_steps() {
        let dir = tempfile::tempdir().unwrap();
        let request = GenerationRequest::new(write_prompt(dir.path())).with_prompt_len(32).with_max_gen_len(8);

        let (result, events) = run(MusicToken::TimeShift(4).id(), &request, 2048);
        let result = result.unwrap();

        assert_eq!(result.finish_reason, FinishReason::MaxTokens);
        assert_eq!(result.generated_tokens, 8);
        let progress: Vec<_> = events.iter().filter(|e| e.message.starts_with("Generated ")).collect();
        assert_eq!(progress.len(), 2);
    }

    #[test]
    fn test_context_limit_stops_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let request = GenerationRequest::new(write_prompt(dir.path())).with_prompt_len(32).with_max_gen_len(100);

        let (result, _) = run(MusicToken::TimeShift(4).id(), &request, 40);
        let result = result.unwrap();

        assert_eq!(result.finish_reason, FinishReason::ContextLimit);
        assert_eq!(result.tokens.len(), 40);
        assert_eq!(result.generated_tokens, 8);
    }

    #[test]
    fn test_cancelled_before_first_step_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let request = GenerationRequest::new(write_prompt(dir.path())).with_prompt_len(32);

        let session = ModelSession::from_model(Arc::new(Constant(EOS_TOKEN)), SessionConfig::default()).unwrap();
        let tokenizer = MidiTokenizer::default();
        let mut pipeline = GenerationPipeline::new(&session, &tokenizer, 2048, 16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.run(Uuid::nil(), &request, &cancel, &mut |_| {}).unwrap_err();
        assert_eq!(err.code(), "GENERATION_CANCELLED");
        assert_eq!(pipeline.phase(), DecodePhase::Cancelled);
        assert!(!request.output_path().exists());
    }

    #[test]
    fn test_malformed_prompt_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mid");
        std::fs::write(&path, b"junk").unwrap();
        let request = GenerationRequest::new(&path);

        let (result, _) = run(EOS_TOKEN, &request, 2048);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MalformedInput);
        assert!(!request.output_path().exists());
    }
}
