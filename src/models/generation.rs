//! Beam search decoding with optional sampling, for any causal LM that can score
//! a batch of equal-length sequences.

use candle_core::{DType, Device, Result, Tensor};
use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};

pub trait CausalLm {
    /// `input_ids` is `(batch, seq)` u32; returns next-token logits `(batch, vocab)`.
    fn next_token_logits(&self, input_ids: &Tensor) -> Result<Tensor>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Upper bound on the full sequence, prompt included.
    pub max_length: usize,
    pub num_beams: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub length_penalty: f32,
    pub do_sample: bool,
    pub early_stopping: bool,
    pub eos_token_id: u32,
}

impl GenerationConfig {
    /// Settings used for every caption.
    pub fn captioning(eos_token_id: u32) -> Self {
        Self {
            max_length: 50,
            num_beams: 5,
            temperature: 0.7,
            top_p: 0.9,
            repetition_penalty: 1.2,
            length_penalty: 1.0,
            do_sample: true,
            early_stopping: true,
            eos_token_id,
        }
    }
}

/// Decodes a continuation of `prompt`. The returned ids start with the prompt
/// and never include the end-of-sequence token.
pub fn beam_sample<M, R>(
    model: &M,
    prompt: &[u32],
    cfg: &GenerationConfig,
    device: &Device,
    rng: &mut R,
) -> Result<Vec<u32>>
where
    M: CausalLm + ?Sized,
    R: Rng + ?Sized,
{
    if prompt.is_empty() {
        candle_core::bail!("cannot decode from an empty prompt");
    }
    let num_beams = cfg.num_beams.max(1);

    let mut beams: Vec<Vec<u32>> = vec![prompt.to_vec(); num_beams];
    // only the first copy of the prompt competes on the first step
    let mut beam_scores: Vec<f32> = (0..num_beams)
        .map(|i| if i == 0 { 0.0 } else { -1e9 })
        .collect();
    let mut finished = Hypotheses::new(num_beams, cfg.length_penalty, cfg.early_stopping);
    let mut done = false;

    while !done && beams.first().is_some_and(|beam| beam.len() < cfg.max_length) {
        let cur_len = beams[0].len();
        let flat_ids: Vec<u32> = beams.concat();
        let input_ids = Tensor::from_vec(flat_ids, (beams.len(), cur_len), device)?;
        let logits: Vec<Vec<f32>> = model
            .next_token_logits(&input_ids)?
            .to_dtype(DType::F32)?
            .to_vec2()?;
        let vocab = logits.first().map(Vec::len).unwrap_or_default();
        if vocab == 0 {
            candle_core::bail!("model returned empty logits");
        }

        let mut scores = Vec::with_capacity(beams.len() * vocab);
        for ((mut row, beam), beam_score) in logits.into_iter().zip(&beams).zip(&beam_scores) {
            apply_repetition_penalty(&mut row, beam, cfg.repetition_penalty);
            log_softmax(&mut row);
            for score in row.iter_mut() {
                *score += beam_score;
            }
            if cfg.do_sample {
                for score in row.iter_mut() {
                    *score /= cfg.temperature;
                }
                let min_keep = if num_beams > 1 { 2 } else { 1 };
                apply_top_p(&mut row, cfg.top_p, min_keep);
            }
            scores.extend(row);
        }

        let candidates = if cfg.do_sample {
            sample_candidates(&scores, 2 * num_beams, rng)
        } else {
            top_candidates(&scores, 2 * num_beams)
        };

        let mut next_beams = Vec::with_capacity(num_beams);
        let mut next_scores = Vec::with_capacity(num_beams);
        for (rank, (index, score)) in candidates.into_iter().enumerate() {
            let (beam, token) = (index / vocab, (index % vocab) as u32);
            if token == cfg.eos_token_id {
                if rank < num_beams {
                    finished.add(beams[beam].clone(), score);
                }
            } else {
                let mut extended = beams[beam].clone();
                extended.push(token);
                next_beams.push(extended);
                next_scores.push(score);
            }
            if next_beams.len() == num_beams {
                break;
            }
        }

        done = finished.is_done(next_scores.first().copied(), cur_len + 1);
        beams = next_beams;
        beam_scores = next_scores;
    }

    // open beams only compete when decoding ran out of length
    if !done {
        for (beam, score) in beams.into_iter().zip(beam_scores) {
            finished.add(beam, score);
        }
    }

    Ok(finished.best().unwrap_or_else(|| prompt.to_vec()))
}

struct Hypotheses {
    capacity: usize,
    length_penalty: f32,
    early_stopping: bool,
    items: Vec<(f32, Vec<u32>)>,
}

impl Hypotheses {
    fn new(capacity: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            capacity,
            length_penalty,
            early_stopping,
            items: Vec::with_capacity(capacity + 1),
        }
    }

    fn normalized(&self, sum_logprobs: f32, len: usize) -> f32 {
        sum_logprobs / (len.max(1) as f32).powf(self.length_penalty)
    }

    fn worst(&self) -> Option<f32> {
        self.items.iter().map(|(s, _)| *s).reduce(f32::min)
    }

    fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32) {
        let score = self.normalized(sum_logprobs, tokens.len());
        if self.items.len() < self.capacity || self.worst().is_some_and(|w| score > w) {
            self.items.push((score, tokens));
            if self.items.len() > self.capacity {
                let worst = self
                    .items
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
                    .map(|(i, _)| i);
                if let Some(i) = worst {
                    self.items.swap_remove(i);
                }
            }
        }
    }

    /// Whether no open beam can still improve the finished set.
    fn is_done(&self, best_open: Option<f32>, cur_len: usize) -> bool {
        if self.items.len() < self.capacity {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        match (best_open, self.worst()) {
            (Some(best), Some(worst)) => worst >= self.normalized(best, cur_len),
            _ => true,
        }
    }

    fn best(self) -> Option<Vec<u32>> {
        self.items
            .into_iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, tokens)| tokens)
    }
}

/// Penalizes tokens already in the sequence: positive logits are divided,
/// negative ones multiplied.
pub fn apply_repetition_penalty(logits: &mut [f32], seen: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let mut seen = seen.to_vec();
    seen.sort_unstable();
    seen.dedup();
    for token in seen {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit = if *logit < 0.0 {
                *logit * penalty
            } else {
                *logit / penalty
            };
        }
    }
}

pub fn log_softmax(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits.iter().map(|l| (l - max).exp()).sum();
    let log_sum = max + sum.ln();
    for logit in logits.iter_mut() {
        *logit -= log_sum;
    }
}

/// Nucleus filtering: keeps the smallest set of highest-scoring tokens whose
/// probability mass reaches `top_p` (at least `min_keep`), the rest become `-inf`.
pub fn apply_top_p(scores: &mut [f32], top_p: f32, min_keep: usize) {
    if top_p >= 1.0 {
        return;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let max = scores[order[0]];
    let weights: Vec<f32> = order.iter().map(|&i| (scores[i] - max).exp()).collect();
    let total: f32 = weights.iter().sum();

    let mut cumulative = 0.0;
    let mut keep = 0;
    for weight in &weights {
        if cumulative >= top_p * total && keep >= min_keep {
            break;
        }
        cumulative += weight;
        keep += 1;
    }

    for &i in &order[keep.max(min_keep).min(order.len())..] {
        scores[i] = f32::NEG_INFINITY;
    }
}

/// Draws up to `n` distinct indices with probability `softmax(scores)`, sorted by
/// descending score.
fn sample_candidates<R: Rng + ?Sized>(scores: &[f32], n: usize, rng: &mut R) -> Vec<(usize, f32)> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut pool: Vec<(usize, f32)> = scores
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| {
            let weight = (s - max).exp();
            (weight > 0.0).then_some((i, weight))
        })
        .collect();

    let mut picked = Vec::with_capacity(n);
    while picked.len() < n && !pool.is_empty() {
        let Ok(dist) = WeightedIndex::new(pool.iter().map(|(_, w)| *w)) else {
            break;
        };
        let (index, _) = pool.swap_remove(dist.sample(rng));
        picked.push((index, scores[index]));
    }

    picked.sort_by(|a, b| b.1.total_cmp(&a.1));
    picked
}

fn top_candidates(scores: &[f32], n: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(n);
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOCAB: usize = 8;
    const EOS: u32 = 7;

    /// Prefers token 3 until the sequence reaches `eos_from`, then end-of-sequence.
    struct ScriptedLm {
        eos_from: usize,
    }

    impl CausalLm for ScriptedLm {
        fn next_token_logits(&self, input_ids: &Tensor) -> Result<Tensor> {
            let (batch, seq) = input_ids.dims2()?;
            let mut row = vec![0f32; VOCAB];
            if seq >= self.eos_from {
                row[EOS as usize] = 10.0;
            } else {
                row[3] = 5.0;
                row[EOS as usize] = -100.0;
            }
            let data: Vec<f32> = row.iter().copied().cycle().take(batch * VOCAB).collect();
            Tensor::from_vec(data, (batch, VOCAB), input_ids.device())
        }
    }

    fn config(max_length: usize, do_sample: bool) -> GenerationConfig {
        GenerationConfig {
            max_length,
            do_sample,
            ..GenerationConfig::captioning(EOS)
        }
    }

    #[test]
    fn repetition_penalty_respects_sign() {
        let mut logits = vec![2.4, -1.0, 3.0];
        apply_repetition_penalty(&mut logits, &[0, 1, 1], 1.2);
        assert!((logits[0] - 2.0).abs() < 1e-6);
        assert!((logits[1] + 1.2).abs() < 1e-6);
        assert_eq!(logits[2], 3.0);
    }

    #[test]
    fn log_softmax_normalizes() {
        let mut logits = vec![1.0, 2.0, 3.0];
        log_softmax(&mut logits);
        let total: f32 = logits.iter().map(|l| l.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn top_p_keeps_the_nucleus_and_the_minimum() {
        let mut scores: Vec<f32> = [0.5f32, 0.3, 0.15, 0.05].iter().map(|p| p.ln()).collect();
        apply_top_p(&mut scores, 0.7, 1);
        assert!(scores[0].is_finite() && scores[1].is_finite());
        assert!(scores[2].is_infinite() && scores[3].is_infinite());

        let mut peaked: Vec<f32> = [0.99f32, 0.005, 0.005].iter().map(|p| p.ln()).collect();
        apply_top_p(&mut peaked, 0.9, 2);
        assert_eq!(peaked.iter().filter(|s| s.is_finite()).count(), 2);
    }

    #[test]
    fn greedy_beams_follow_the_best_token_to_max_length() {
        let lm = ScriptedLm { eos_from: usize::MAX };
        let mut rng = rand::thread_rng();
        let out = beam_sample(&lm, &[1, 2], &config(10, false), &Device::Cpu, &mut rng).unwrap();
        assert_eq!(out, vec![1, 2, 3, 3, 3, 3, 3, 3, 3, 3]);
    }

    #[test]
    fn sampled_decoding_never_exceeds_max_length() {
        let lm = ScriptedLm { eos_from: usize::MAX };
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let out = beam_sample(&lm, &[1, 2], &config(12, true), &Device::Cpu, &mut rng).unwrap();
            assert_eq!(out.len(), 12);
            assert_eq!(&out[..2], &[1, 2]);
            assert!(!out.contains(&EOS));
        }
    }

    #[test]
    fn early_stopping_ends_before_max_length() {
        let lm = ScriptedLm { eos_from: 5 };
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let out = beam_sample(&lm, &[1, 2], &config(30, true), &Device::Cpu, &mut rng).unwrap();
            assert!(out.len() < 30, "{out:?}");
            assert_eq!(&out[..2], &[1, 2]);
            assert!(!out.contains(&EOS));
        }
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let lm = ScriptedLm { eos_from: 3 };
        let mut rng = rand::thread_rng();
        assert!(beam_sample(&lm, &[], &config(10, true), &Device::Cpu, &mut rng).is_err());
    }
}
