use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use image::RgbImage;
use std::path::Path;

pub const TARGET_IMAGE_SIZE: u32 = 224;

const MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const STD: [f32; 3] = [0.26862954, 0.261_302_6, 0.275_777_1];

/// CLIP ViT-B/32 image tower.
pub struct VisionEncoder {
    model: ClipModel,
    device: Device,
}

impl VisionEncoder {
    pub fn load(weights: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let tensors = candle_core::safetensors::load(weights, device)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let model = ClipModel::new(vb, &ClipConfig::vit_base_patch32())?;

        Ok(Self {
            model,
            device: device.clone(),
        })
    }

    /// Projected image embedding, shape `(1, projection_dim)`.
    pub fn embed(&self, image: &RgbImage) -> Result<Tensor> {
        let pixel_values = preprocess(image)?.to_device(&self.device)?;
        self.model.get_image_features(&pixel_values)
    }
}

/// Center crop to a square, resize to 224 and CLIP normalization.
///
/// Cropping before resizing keeps the intermediate buffer bounded by the input,
/// whatever the aspect ratio. Returns a `(1, 3, 224, 224)` f32 tensor on the CPU.
pub fn preprocess(image: &RgbImage) -> Result<Tensor> {
    let (w, h) = image.dimensions();
    let side = w.min(h);
    let square = image::imageops::crop_imm(image, (w - side) / 2, (h - side) / 2, side, side)
        .to_image();

    let resized = image::imageops::resize(
        &square,
        TARGET_IMAGE_SIZE,
        TARGET_IMAGE_SIZE,
        image::imageops::FilterType::CatmullRom,
    );

    let size = TARGET_IMAGE_SIZE as usize;
    let data = Tensor::from_vec(resized.into_raw(), (size, size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?;
    let mean = Tensor::new(&MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&STD, &Device::Cpu)?.reshape((3, 1, 1))?;

    (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?
        .unsqueeze(0)
}
