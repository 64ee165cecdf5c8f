//! Next-token selection with temperature and nucleus (top-p) filtering

use crate::{tokenizer::TokenId, CoreError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Temperatures at or below this are treated as greedy decoding
pub const TEMPERATURE_EPSILON: f32 = 1e-5;

/// Parameters for a single sampling call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Divides logits before normalization; values near 0 approach arg-max
    pub temperature: f32,
    /// Cumulative probability mass kept by nucleus filtering; 1.0 disables it
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self { temperature: 1.0, top_p: 1.0 }
    }
}

/// Select the next token id from raw model logits
///
/// Non-finite logits never get selected. Range checks on the parameters
/// belong to request validation; here a negative temperature just behaves
/// like zero.
pub fn sample<R: Rng + ?Sized>(logits: &[f32], params: &SamplingParams, rng: &mut R) -> Result<TokenId> {
    if logits.is_empty() {
        return Err(CoreError::inference(
            "EMPTY_LOGITS",
            "Cannot sample from empty logits",
            "Token sampling",
            "Check that the model forward pass produces one logit per vocabulary entry",
        ));
    }

    if params.temperature <= TEMPERATURE_EPSILON {
        return greedy(logits);
    }

    let scaled: Vec<f32> = logits.iter().map(|&l| l / params.temperature).collect();
    let probs = softmax(&scaled)?;
    let kept = nucleus(&probs, params.top_p);
    draw(&probs, &kept, rng)
}

/// Arg-max over finite logits, lowest id on ties
pub fn greedy(logits: &[f32]) -> Result<TokenId> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &logit) in logits.iter().enumerate() {
        if !logit.is_finite() {
            continue;
        }
        match best {
            Some((_, value)) if logit <= value => {}
            _ => best = Some((idx, logit)),
        }
    }

    best.map(|(idx, _)| idx as TokenId).ok_or_else(all_masked)
}

/// Max-subtracted softmax; non-finite logits get zero probability
pub fn softmax(logits: &[f32]) -> Result<Vec<f32>> {
    let max_logit = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max_logit.is_finite() {
        return Err(all_masked());
    }

    let exps: Vec<f32> = logits
        .iter()
        .map(|&l| if l.is_finite() { (l - max_logit).exp() } else { 0.0 })
        .collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(all_masked());
    }

    Ok(exps.into_iter().map(|e| e / sum).collect())
}

/// Indices kept by nucleus filtering, most probable first
///
/// Ties are ordered by lowest id, and at least one index is always kept.
pub fn nucleus(probs: &[f32], top_p: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probs.len()).filter(|&i| probs[i] > 0.0).collect();
    // Stable sort keeps ascending ids within equal probabilities
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(Ordering::Equal));

    if top_p >= 1.0 {
        return order;
    }

    let mut cumulative = 0.0f32;
    let mut cutoff = order.len();
    for (rank, &idx) in order.iter().enumerate() {
        cumulative += probs[idx];
        if cumulative >= top_p {
            cutoff = rank + 1;
            break;
        }
    }
    order.truncate(cutoff.max(1));
    order
}

fn draw<R: Rng + ?Sized>(probs: &[f32], kept: &[usize], rng: &mut R) -> Result<TokenId> {
    let (&last, _) = kept.split_last().ok_or_else(all_masked)?;

    // Renormalize over the kept mass
    let mass: f32 = kept.iter().map(|&i| probs[i]).sum();
    let target = rng.gen::<f32>() * mass;

    let mut cumulative = 0.0f32;
    for &idx in kept {
        cumulative += probs[idx];
        if target < cumulative {
            return Ok(idx as TokenId);
        }
    }
    Ok(last as TokenId)
}

fn all_masked() -> CoreError {
    CoreError::inference(
        "NO_SAMPLEABLE_TOKEN",
        "Every logit is masked or non-finite",
        "Token sampling",
        "Check the model output for NaN or infinite values",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn params(temperature: f32, top_p: f32) -> SamplingParams {
        SamplingParams { temperature, top_p }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_masks_non_finite() {
        let probs = softmax(&[f32::NAN, 1.0, f32::NEG_INFINITY, f32::INFINITY]).unwrap();
        assert_eq!(probs[0], 0.0);
        assert_eq!(probs[2], 0.0);
        assert_eq!(probs[3], 0.0);
        assert!((probs[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_full_nucleus_reaches_every_token() {
        let logits = vec![0.0, 0.0, 0.0, 0.0, f32::NEG_INFINITY];
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = [0usize; 5];
        for _ in 0..2000 {
            seen[sample(&logits, &params(1.0, 1.0), &mut rng).unwrap() as usize] += 1;
        }
        assert!(seen[..4].iter().all(|&n| n > 0), "seen: {:?}", seen);
        assert_eq!(seen[4], 0);
    }

    #[test]
    fn test_tiny_top_p_is_argmax_with_lowest_id_tie() {
        // ids 2 and 5 tie for the maximum
        let logits = vec![0.1, 0.5, 3.0, 1.0, -2.0, 3.0];
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(sample(&logits, &params(1.0, 1e-6), &mut rng).unwrap(), 2);
            assert_eq!(sample(&logits, &params(0.7, 0.0), &mut rng).unwrap(), 2);
        }
    }

    #[test]
    fn test_epsilon_temperature_is_argmax() {
        let logits = vec![0.3, -1.0, 2.5, 2.4, 0.0];
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(sample(&logits, &params(TEMPERATURE_EPSILON, 0.95), &mut rng).unwrap(), 2);
            assert_eq!(sample(&logits, &params(0.0, 1.0), &mut rng).unwrap(), 2);
        }
    }

    #[test]
    fn test_nucleus_cutoff() {
        let probs = vec![0.1, 0.6, 0.3];
        assert_eq!(nucleus(&probs, 0.5), vec![1]);
        assert_eq!(nucleus(&probs, 0.8), vec![1, 2]);
        assert_eq!(nucleus(&probs, 1.0), vec![1, 2, 0]);
    }

    #[test]
    fn test_nucleus_never_draws_outside_kept() {
        let logits = vec![2.0, 1.9, -4.0, -4.0];
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let id = sample(&logits, &params(1.0, 0.9), &mut rng).unwrap();
            assert!(id < 2);
        }
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let logits: Vec<f32> = (0..32).map(|i| (i % 7) as f32 * 0.3).collect();
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..64)
                .map(|_| sample(&logits, &params(0.99, 0.95), &mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_empty_or_masked_logits_fail() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = sample(&[], &params(1.0, 1.0), &mut rng).unwrap_err();
        assert_eq!(err.code(), "EMPTY_LOGITS");

        let masked = vec![f32::NAN, f32::NEG_INFINITY];
        let err = sample(&masked, &params(1.0, 1.0), &mut rng).unwrap_err();
        assert_eq!(err.code(), "NO_SAMPLEABLE_TOKEN");
        assert!(greedy(&masked).is_err());
    }
}
