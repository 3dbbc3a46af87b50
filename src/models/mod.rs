pub mod clip;
pub mod generation;
pub mod gpt2;

use crate::{
    captioner::{finish_caption, placeholder_confidence, Caption, CaptionError, Captioner},
    config::Config,
    download::ArtifactStore,
    styles::Style,
};
use anyhow::anyhow;
use candle_core::Device;
use clip::VisionEncoder;
use generation::GenerationConfig;
use gpt2::{Gpt2, Gpt2Config};
use image::DynamicImage;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokenizers::{PaddingParams, Tokenizer};
use tracing::{debug, info};

const EOS_TOKEN: &str = "<|endoftext|>";

/// CUDA, then Metal, then CPU. Accelerators are only reachable when the crate is
/// built with the matching feature.
pub fn select_device() -> Device {
    if candle_core::utils::cuda_is_available() {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }
    if candle_core::utils::metal_is_available() {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }
    Device::Cpu
}

pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Vision encoder, language model and tokenizer, loaded once at startup.
pub struct ModelBundle {
    vision: VisionEncoder,
    text: TextDecoder,
}

/// Continues a seed phrase with the language model.
struct TextDecoder {
    language: Gpt2,
    tokenizer: Tokenizer,
    generation: GenerationConfig,
    device: Device,
}

impl TextDecoder {
    fn complete<R: Rng + ?Sized>(&self, seed: &str, rng: &mut R) -> Result<String, CaptionError> {
        let encoding = self
            .tokenizer
            .encode(seed, false)
            .map_err(|e| CaptionError::Tokenizer(e.to_string()))?;

        let ids = generation::beam_sample(
            &self.language,
            encoding.get_ids(),
            &self.generation,
            &self.device,
            rng,
        )?;

        let text = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| CaptionError::Tokenizer(e.to_string()))?;
        Ok(finish_caption(&text))
    }
}

/// Loads the tokenizer and pads with end-of-sequence, returning its id.
fn load_tokenizer(path: &Path) -> anyhow::Result<(Tokenizer, u32)> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow!("failed to initialize tokenizer: {e}"))?;
    let eos_token_id = tokenizer
        .token_to_id(EOS_TOKEN)
        .ok_or_else(|| anyhow!("tokenizer has no {EOS_TOKEN} token"))?;
    // GPT-2 has no pad token, reuse end-of-sequence
    tokenizer.with_padding(Some(PaddingParams {
        pad_id: eos_token_id,
        pad_token: EOS_TOKEN.to_string(),
        ..Default::default()
    }));
    Ok((tokenizer, eos_token_id))
}

struct ArtifactPaths {
    vision_weights: PathBuf,
    language_weights: PathBuf,
    language_config: PathBuf,
    tokenizer: PathBuf,
}

impl ModelBundle {
    /// Fetches any missing artifacts into the model cache and loads them on `device`.
    pub async fn load(config: &Config, device: Device) -> anyhow::Result<Self> {
        let store = ArtifactStore::new(config.hub_url.clone(), config.model_cache_dir.clone())?;

        info!("Loading vision model {}...", config.vision_model.repo);
        let vision_weights = store
            .download_if_not_exists(&config.vision_model, "model.safetensors")
            .await?;

        info!("Loading language model {}...", config.language_model.repo);
        let language_weights = store
            .download_if_not_exists(&config.language_model, "model.safetensors")
            .await?;
        let language_config = store
            .download_if_not_exists(&config.language_model, "config.json")
            .await?;
        let tokenizer = store
            .download_if_not_exists(&config.language_model, "tokenizer.json")
            .await?;

        let paths = ArtifactPaths {
            vision_weights,
            language_weights,
            language_config,
            tokenizer,
        };
        tokio::task::spawn_blocking(move || Self::from_files(paths, device)).await?
    }

    fn from_files(paths: ArtifactPaths, device: Device) -> anyhow::Result<Self> {
        let vision = VisionEncoder::load(&paths.vision_weights, &device)?;

        let language_config = Gpt2Config::from_file(&paths.language_config)?;
        let language = Gpt2::load(&paths.language_weights, &language_config, &device)?;

        let (tokenizer, eos_token_id) = load_tokenizer(&paths.tokenizer)?;

        Ok(Self {
            vision,
            text: TextDecoder {
                language,
                tokenizer,
                generation: GenerationConfig::captioning(eos_token_id),
                device,
            },
        })
    }
}

impl Captioner for ModelBundle {
    fn caption(&self, image: &DynamicImage, style: Style) -> Result<Caption, CaptionError> {
        let image = image.to_rgb8();

        // The embedding does not condition decoding yet: the language model has no
        // trained projection from CLIP space, so only the seed phrase drives it.
        let embedding = self.vision.embed(&image)?;
        debug!(dims = ?embedding.dims(), "image embedding computed");

        let mut rng = rand::thread_rng();
        let text = self.text.complete(style.seed_phrase(), &mut rng)?;

        Ok(Caption {
            text,
            confidence: placeholder_confidence(&mut rng),
        })
    }
}
