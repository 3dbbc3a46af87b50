//! GPT-2 causal language model on candle.
//!
//! Loads the weights published for `GPT2LMHeadModel`. The projection layers are
//! stored as `Conv1D`, i.e. `(in, out)` weight matrices, and the LM head is tied to
//! the token embedding.

use crate::models::generation::CausalLm;
use candle_core::{DType, Device, IndexOp, Module, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

impl Gpt2Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

struct Conv1D {
    weight: Tensor,
    bias: Tensor,
}

impl Conv1D {
    fn new(nx: usize, nf: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get((nx, nf), "weight")?,
            bias: vb.get(nf, "bias")?,
        })
    }
}

impl Module for Conv1D {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.broadcast_matmul(&self.weight)?.broadcast_add(&self.bias)
    }
}

struct Attention {
    c_attn: Conv1D,
    c_proj: Conv1D,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn new(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            c_attn: Conv1D::new(cfg.n_embd, 3 * cfg.n_embd, vb.pp("c_attn"))?,
            c_proj: Conv1D::new(cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?,
            n_head: cfg.n_head,
            head_dim: cfg.n_embd / cfg.n_head,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, t, c) = xs.dims3()?;
        let qkv = self.c_attn.forward(xs)?;
        let heads = |i: usize| -> Result<Tensor> {
            qkv.narrow(D::Minus1, i * c, c)?
                .reshape((b, t, self.n_head, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let (q, k, v) = (heads(0)?, heads(1)?, heads(2)?);

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let att = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let att = masked_fill(&att, &mask.broadcast_as(att.shape())?, f32::NEG_INFINITY)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;

        let ys = att
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, c))?;
        self.c_proj.forward(&ys)
    }
}

struct Mlp {
    c_fc: Conv1D,
    c_proj: Conv1D,
}

impl Mlp {
    fn new(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            c_fc: Conv1D::new(cfg.n_embd, 4 * cfg.n_embd, vb.pp("c_fc"))?,
            c_proj: Conv1D::new(4 * cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // tanh approximation, which is what GPT-2 was trained with
        self.c_proj.forward(&self.c_fc.forward(xs)?.gelu()?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn new(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let eps = cfg.layer_norm_epsilon;
        Ok(Self {
            ln_1: layer_norm(cfg.n_embd, eps, vb.pp("ln_1"))?,
            attn: Attention::new(cfg, vb.pp("attn"))?,
            ln_2: layer_norm(cfg.n_embd, eps, vb.pp("ln_2"))?,
            mlp: Mlp::new(cfg, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let xs = (xs + self.attn.forward(&self.ln_1.forward(xs)?, mask)?)?;
        &xs + self.mlp.forward(&self.ln_2.forward(&xs)?)?
    }
}

pub struct Gpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    n_positions: usize,
    device: Device,
}

impl Gpt2 {
    pub fn load(weights: impl AsRef<Path>, cfg: &Gpt2Config, device: &Device) -> Result<Self> {
        let tensors = candle_core::safetensors::load(weights, device)?;
        Self::new(cfg, VarBuilder::from_tensors(tensors, DType::F32, device))
    }

    pub fn new(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        // checkpoints saved from the LM head wrapper carry a `transformer.` prefix
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let wte = embedding(cfg.vocab_size, cfg.n_embd, vb.pp("wte"))?;
        let wpe = embedding(cfg.n_positions, cfg.n_embd, vb.pp("wpe"))?;
        let blocks = (0..cfg.n_layer)
            .map(|i| Block::new(cfg, vb.pp(format!("h.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_f"))?;
        let lm_head = Linear::new(wte.embeddings().clone(), None);

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            n_positions: cfg.n_positions,
            device: vb.device().clone(),
        })
    }

    /// Logits for the last position of every sequence, shape `(batch, vocab)`.
    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_b, t) = input_ids.dims2()?;
        if t == 0 || t > self.n_positions {
            candle_core::bail!("sequence length {t} outside 1..={}", self.n_positions);
        }

        let positions = Tensor::arange(0u32, t as u32, &self.device)?;
        let mut xs = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = causal_mask(t, &self.device)?;
        for block in &self.blocks {
            xs = block.forward(&xs, &mask)?;
        }

        let last = self.ln_f.forward(&xs)?.i((.., t - 1, ..))?.contiguous()?;
        self.lm_head.forward(&last)
    }
}

impl CausalLm for Gpt2 {
    fn next_token_logits(&self, input_ids: &Tensor) -> Result<Tensor> {
        self.forward(input_ids)
    }
}

fn causal_mask(t: usize, device: &Device) -> Result<Tensor> {
    let mask: Vec<u8> = (0..t)
        .flat_map(|i| (0..t).map(move |j| u8::from(j > i)))
        .collect();
    Tensor::from_slice(&mask, (t, t), device)
}

fn masked_fill(on_false: &Tensor, mask: &Tensor, on_true: f32) -> Result<Tensor> {
    let on_true = Tensor::new(on_true, on_false.device())?.broadcast_as(mask.shape().dims())?;
    mask.where_cond(&on_true, on_false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Gpt2Config {
        Gpt2Config {
            vocab_size: 16,
            n_positions: 8,
            n_embd: 8,
            n_layer: 2,
            n_head: 2,
            layer_norm_epsilon: 1e-5,
        }
    }

    #[test]
    fn parses_hub_config() {
        let cfg: Gpt2Config = serde_json::from_str(
            r#"{
                "vocab_size": 50257,
                "n_positions": 1024,
                "n_embd": 768,
                "n_layer": 12,
                "n_head": 12,
                "activation_function": "gelu_new"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.n_embd, 768);
        assert_eq!(cfg.layer_norm_epsilon, 1e-5);
    }

    #[test]
    fn returns_last_position_logits_per_sequence() {
        let device = Device::Cpu;
        let model = Gpt2::new(&tiny(), VarBuilder::zeros(DType::F32, &device)).unwrap();
        let input = Tensor::new(&[[1u32, 2, 3], [4, 5, 6]], &device).unwrap();

        let logits = model.forward(&input).unwrap();
        assert_eq!(logits.dims(), &[2, 16]);
    }

    #[test]
    fn rejects_sequences_past_the_context_window() {
        let device = Device::Cpu;
        let model = Gpt2::new(&tiny(), VarBuilder::zeros(DType::F32, &device)).unwrap();
        let input = Tensor::zeros((1, 9), DType::U32, &device).unwrap();
        assert!(model.forward(&input).is_err());
    }

    #[test]
    fn mask_hides_future_positions() {
        let mask: Vec<Vec<u8>> = causal_mask(3, &Device::Cpu).unwrap().to_vec2().unwrap();
        assert_eq!(mask, vec![vec![0, 1, 1], vec![0, 0, 1], vec![0, 0, 0]]);
    }
}
