//! Image-to-image generation.
//!
//! A pretrained Pix2Pix generator is loaded once at startup. When it is
//! missing, or no backend for its format was compiled in, the service keeps
//! running and the "generated" image is a byte-for-byte copy of the upload.

pub mod tensor;

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "torchscript")]
mod torchscript;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, ImageFormat, RgbImage};
use thiserror::Error;

use crate::storage::{detect_image_format, ImageStore, StorageError, ACCEPTED_FORMATS};

#[cfg(feature = "onnx")]
pub use onnx::OnnxTranslator;
#[cfg(feature = "torchscript")]
pub use torchscript::TorchScriptTranslator;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Unsupported model file (expected .pt, .pth or .onnx): {0}")]
    UnsupportedModel(PathBuf),

    #[error("Built without the `{backend}` feature, cannot load {path}")]
    BackendUnavailable {
        backend: &'static str,
        path: PathBuf,
    },

    #[error("Model initialization: {0}")]
    ModelInit(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unexpected output shape: {0:?}")]
    OutputShape(Vec<usize>),

    #[error("Image decode failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Image encode failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Generation task failed: {0}")]
    Task(String),
}

/// A pretrained image-to-image model treated as a black box.
pub trait ImageTranslator: Send + Sync {
    /// Short label for logs and the health endpoint.
    fn name(&self) -> &str;

    /// Run one forward pass and return the generated image.
    fn translate(&self, image: &DynamicImage) -> Result<RgbImage, InferenceError>;
}

/// Serialized model formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    TorchScript,
    Onnx,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pt" | "pth" => Some(ModelFormat::TorchScript),
            "onnx" => Some(ModelFormat::Onnx),
            _ => None,
        }
    }
}

/// Load the generator at `path`, or `None` to run in pass-through mode.
///
/// Never fails: any problem is logged and the service degrades.
pub fn load_translator(path: &Path) -> Option<Arc<dyn ImageTranslator>> {
    match try_load_translator(path) {
        Ok(translator) => {
            tracing::info!(
                model = translator.name(),
                path = %path.display(),
                "Loaded image translation model"
            );
            Some(translator)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Pix2Pix model not found or failed to load");
            tracing::warn!(
                "Place a model at '{}' to enable generation; uploads are copied to outputs meanwhile",
                path.display()
            );
            None
        }
    }
}

fn try_load_translator(path: &Path) -> Result<Arc<dyn ImageTranslator>, InferenceError> {
    if !path.is_file() {
        return Err(InferenceError::ModelNotFound(path.to_path_buf()));
    }
    match ModelFormat::from_path(path) {
        Some(ModelFormat::TorchScript) => load_torchscript(path),
        Some(ModelFormat::Onnx) => load_onnx(path),
        None => Err(InferenceError::UnsupportedModel(path.to_path_buf())),
    }
}

#[cfg(feature = "torchscript")]
fn load_torchscript(path: &Path) -> Result<Arc<dyn ImageTranslator>, InferenceError> {
    Ok(Arc::new(TorchScriptTranslator::load(path)?))
}

#[cfg(not(feature = "torchscript"))]
fn load_torchscript(path: &Path) -> Result<Arc<dyn ImageTranslator>, InferenceError> {
    Err(InferenceError::BackendUnavailable {
        backend: "torchscript",
        path: path.to_path_buf(),
    })
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path) -> Result<Arc<dyn ImageTranslator>, InferenceError> {
    Ok(Arc::new(OnnxTranslator::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path) -> Result<Arc<dyn ImageTranslator>, InferenceError> {
    Err(InferenceError::BackendUnavailable {
        backend: "onnx",
        path: path.to_path_buf(),
    })
}

// ═══════════════════════════════════════════════════════════
// Generator: what the upload handler calls
// ═══════════════════════════════════════════════════════════

/// Produces the output image for a stored upload.
#[derive(Clone, Default)]
pub struct Generator {
    translator: Option<Arc<dyn ImageTranslator>>,
}

impl Generator {
    pub fn new(translator: Option<Arc<dyn ImageTranslator>>) -> Self {
        Self { translator }
    }

    pub fn passthrough() -> Self {
        Self { translator: None }
    }

    pub fn is_passthrough(&self) -> bool {
        self.translator.is_none()
    }

    pub fn model_name(&self) -> &str {
        self.translator
            .as_deref()
            .map(|t| t.name())
            .unwrap_or("passthrough")
    }

    /// Generate `<output_dir>/<name>` from `<upload_dir>/<name>`.
    ///
    /// Decoding, the forward pass and encoding are blocking work and run on
    /// tokio's blocking pool.
    pub async fn generate(&self, store: &ImageStore, name: &str) -> Result<PathBuf, InferenceError> {
        let translator = self.translator.clone();
        let store = store.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || generate_blocking(translator.as_deref(), &store, &name))
            .await
            .map_err(|e| InferenceError::Task(e.to_string()))?
    }
}

fn generate_blocking(
    translator: Option<&dyn ImageTranslator>,
    store: &ImageStore,
    name: &str,
) -> Result<PathBuf, InferenceError> {
    let Some(translator) = translator else {
        return Ok(store.copy_to_output(name)?);
    };

    let started = Instant::now();
    let bytes = store.load_upload(name)?;
    let input = image::load_from_memory(&bytes).map_err(InferenceError::Decode)?;
    let generated = translator.translate(&input)?;

    let output_path = store.output_path(name);
    let format = output_format(&output_path, &bytes);
    generated
        .save_with_format(&output_path, format)
        .map_err(InferenceError::Encode)?;

    tracing::info!(
        filename = %name,
        model = translator.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Generated image"
    );
    Ok(output_path)
}

/// Encode in the format the output name implies, else the upload's own format.
fn output_format(output_path: &Path, input_bytes: &[u8]) -> ImageFormat {
    ImageFormat::from_path(output_path)
        .ok()
        .filter(|format| ACCEPTED_FORMATS.contains(format))
        .or_else(|| detect_image_format(input_bytes))
        .unwrap_or(ImageFormat::Png)
}

/// Inverts colours through the same tensor path a real backend uses.
#[cfg(test)]
pub(crate) struct InvertTranslator;

#[cfg(test)]
impl ImageTranslator for InvertTranslator {
    fn name(&self) -> &str {
        "invert"
    }

    fn translate(&self, image: &DynamicImage) -> Result<RgbImage, InferenceError> {
        let (data, shape) = tensor::to_input_tensor(image);
        let inverted: Vec<f32> = data.iter().map(|v| 1.0 - v).collect();
        tensor::from_output_tensor(&inverted, &shape)
    }
}

#[cfg(test)]
pub(crate) fn encode_test_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
