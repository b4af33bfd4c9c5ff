use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{DynamicImage, RgbImage};
use ort::session::Session;
use ort::value::TensorRef;

use super::tensor::{from_output_tensor, to_input_tensor};
use super::{ImageTranslator, InferenceError};

/// Pix2Pix generator exported with `torch.onnx.export`, run through ONNX Runtime.
///
/// `Session::run` needs `&mut self`, so the session sits behind a Mutex to
/// satisfy the `&self` trait method.
pub struct OnnxTranslator {
    session: Mutex<Session>,
    path: PathBuf,
}

impl OnnxTranslator {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        if !path.exists() {
            return Err(InferenceError::ModelNotFound(path.to_path_buf()));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| InferenceError::ModelInit(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e: ort::Error| InferenceError::ModelInit(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e: ort::Error| InferenceError::ModelInit(format!("ONNX load failed: {e}")))?;

        tracing::info!("ONNX generator loaded from {}", path.display());

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
        })
    }
}

impl ImageTranslator for OnnxTranslator {
    fn name(&self) -> &str {
        "onnx"
    }

    fn translate(&self, image: &DynamicImage) -> Result<RgbImage, InferenceError> {
        let (data, [n, c, h, w]) = to_input_tensor(image);

        let input = ndarray::Array4::from_shape_vec((n, c, h, w), data)
            .map_err(|e| InferenceError::Inference(e.to_string()))?;
        let input_tensor = TensorRef::from_array_view(&input)
            .map_err(|e| InferenceError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Inference("Session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| InferenceError::Inference(format!("ONNX inference failed: {e}")))?;

        // Multi-output graphs: the generated image is the first output
        let (shape, output_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Inference(format!("Output extraction: {e}")))?;

        let dims = shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<Vec<usize>, _>>()
            .map_err(|_| InferenceError::Inference(format!("Negative output dim: {shape:?}")))?;

        tracing::debug!(model = %self.path.display(), shape = ?dims, "ONNX forward pass");
        from_output_tensor(output_data, &dims)
    }
}
