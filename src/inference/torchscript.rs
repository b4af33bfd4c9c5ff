use std::path::Path;
use std::sync::Mutex;

use image::{DynamicImage, RgbImage};
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::tensor::{from_output_tensor, to_input_tensor};
use super::{ImageTranslator, InferenceError};

/// Pix2Pix generator saved with `torch.jit.save`, run through libtorch.
///
/// Runs on the first CUDA device when one is available, else on CPU.
pub struct TorchScriptTranslator {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchScriptTranslator {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        if !path.exists() {
            return Err(InferenceError::ModelNotFound(path.to_path_buf()));
        }

        let device = Device::cuda_if_available();
        let mut module = CModule::load_on_device(path, device)
            .map_err(|e| InferenceError::ModelInit(format!("TorchScript load failed: {e}")))?;
        module.set_eval();

        tracing::info!(device = ?device, "TorchScript generator loaded from {}", path.display());

        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl ImageTranslator for TorchScriptTranslator {
    fn name(&self) -> &str {
        "torchscript"
    }

    fn translate(&self, image: &DynamicImage) -> Result<RgbImage, InferenceError> {
        let (data, shape) = to_input_tensor(image);
        let dims = shape.map(|d| d as i64);
        let input = Tensor::from_slice(data.as_slice()).reshape(dims).to_device(self.device);

        let module = self
            .module
            .lock()
            .map_err(|_| InferenceError::Inference("Module lock poisoned".to_string()))?;

        let output = tch::no_grad(|| module.forward_is(&[IValue::Tensor(input)]))
            .map_err(|e| InferenceError::Inference(format!("TorchScript forward failed: {e}")))?;
        drop(module);

        let output = first_tensor(output)?
            .to_device(Device::Cpu)
            .to_kind(Kind::Float);

        let dims = output
            .size()
            .into_iter()
            .map(usize::try_from)
            .collect::<Result<Vec<usize>, _>>()
            .map_err(|_| InferenceError::Inference("Negative output dim".to_string()))?;

        let flat = output.contiguous().flatten(0, -1);
        let values = Vec::<f32>::try_from(&flat)
            .map_err(|e| InferenceError::Inference(format!("Output extraction: {e}")))?;

        from_output_tensor(&values, &dims)
    }
}

/// Some generators return `(image, extras...)`; the image is always first.
fn first_tensor(output: IValue) -> Result<Tensor, InferenceError> {
    match output {
        IValue::Tensor(tensor) => Ok(tensor),
        IValue::Tuple(items) | IValue::GenericList(items) => match items.into_iter().next() {
            Some(first) => first_tensor(first),
            None => Err(InferenceError::Inference("Model returned an empty tuple".to_string())),
        },
        IValue::TensorList(tensors) => tensors
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::Inference("Model returned an empty list".to_string())),
        other => Err(InferenceError::Inference(format!(
            "Model returned a non-tensor value: {other:?}"
        ))),
    }
}
