use std::path::Path;

use ndarray::Array4;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
    value::{TensorRef, ValueType},
};
use parking_lot::Mutex;

use crate::{
    errors::{Result, SegMaskError},
    traits::{InferenceAdapter, InferenceSession},
    types::{InputTensor, MaskField, ModelContract, ModelOverrides},
};

/// ONNX Runtime backed [`InferenceAdapter`].
#[derive(Debug, Clone, Default)]
pub struct OrtInference {
    overrides: ModelOverrides,
    device_id: i32,
}

impl OrtInference {
    pub const fn new(overrides: ModelOverrides, device_id: i32) -> Self {
        Self {
            overrides,
            device_id,
        }
    }
}

impl InferenceAdapter for OrtInference {
    type Session = OrtSession;

    fn load(&mut self, model_path: &Path) -> Result<OrtSession> {
        OrtSession::new(model_path, &self.overrides, self.device_id)
    }
}

pub struct OrtSession {
    contract: ModelContract,
    output_names: Vec<String>,
    session: Mutex<Session>,
}

impl OrtSession {
    pub fn new(model_path: &Path, overrides: &ModelOverrides, device_id: i32) -> Result<Self> {
        tracing::info!("Loading model from {}", model_path.display());

        let mut session = SessionBuilder::new()
            .map_err(|e| SegMaskError::inference("session builder init", e))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| SegMaskError::inference("execution provider setup", e))?
            .with_memory_pattern(true)
            .map_err(|e| SegMaskError::inference("memory pattern setup", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                SegMaskError::inference(format!("model load: {}", model_path.display()), e)
            })?;

        let inputs: Vec<(String, Option<Vec<i64>>)> = session
            .inputs
            .iter()
            .map(|input| {
                let shape = match &input.input_type {
                    ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
                    _ => None,
                };
                (input.name.clone(), shape)
            })
            .collect();
        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        let contract = resolve_contract(&inputs, &output_names, overrides)?;
        tracing::info!(
            "Model contract: input `{}` {}x{}, output `{}`",
            contract.input_name,
            contract.width,
            contract.height,
            contract.output_name
        );

        // warm up
        let zeros = Array4::<f32>::zeros((1, contract.height as usize, contract.width as usize, 3));
        session
            .run(ort::inputs![
                contract.input_name.as_str() => TensorRef::from_array_view(zeros.view())
                    .map_err(|e| SegMaskError::inference("warm-up tensor creation", e))?
            ])
            .map_err(|e| SegMaskError::inference("warm-up run", e))?;

        Ok(Self {
            contract,
            output_names,
            session: Mutex::new(session),
        })
    }
}

impl InferenceSession for OrtSession {
    fn contract(&self) -> &ModelContract {
        &self.contract
    }

    fn run(&self, inputs: &[(&str, &InputTensor)]) -> Result<Vec<(String, MaskField)>> {
        let _span = tracing::debug_span!("inference").entered();

        let [(name, tensor)] = inputs else {
            return Err(SegMaskError::validation(
                "inputs",
                format!("expected exactly one named input, got {}", inputs.len()),
            ));
        };

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                *name => TensorRef::from_array_view(tensor.view())
                    .map_err(|e| SegMaskError::inference("input tensor creation", e))?
            ])
            .map_err(|e| SegMaskError::inference(format!("run with input `{}`", name), e))?;

        let expected = self.contract.width as usize * self.contract.height as usize;
        let mut named = Vec::with_capacity(self.output_names.len());
        for output_name in &self.output_names {
            let (_, data) = outputs[output_name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    SegMaskError::inference(format!("extract output `{}`", output_name), e)
                })?;
            if *output_name == self.contract.output_name && data.len() != expected {
                return Err(SegMaskError::inference(
                    format!("output `{}` size check", output_name),
                    format!(
                        "mask has {} values, expected {}x{}",
                        data.len(),
                        self.contract.width,
                        self.contract.height
                    ),
                ));
            }
            named.push((output_name.clone(), data.to_vec()));
        }
        Ok(named)
    }
}

/// Pick binding names and input resolution from what the model declares.
///
/// The input tensor is `[1, H, W, 3]`. Overrides always win; a dynamic dimension
/// without an override cannot be resolved.
pub fn resolve_contract(
    inputs: &[(String, Option<Vec<i64>>)],
    outputs: &[String],
    overrides: &ModelOverrides,
) -> Result<ModelContract> {
    let (input_name, shape) = match &overrides.input_name {
        Some(wanted) => inputs
            .iter()
            .find(|(name, _)| name == wanted)
            .ok_or_else(|| SegMaskError::Configuration {
                message: format!(
                    "model has no input named `{}` (declared: {})",
                    wanted,
                    join_names(inputs.iter().map(|(name, _)| name.as_str()))
                ),
            })?,
        None => inputs.first().ok_or_else(|| SegMaskError::Configuration {
            message: "model declares no inputs".to_string(),
        })?,
    };

    let output_name = match &overrides.output_name {
        Some(wanted) => outputs
            .iter()
            .find(|name| *name == wanted)
            .ok_or_else(|| SegMaskError::Configuration {
                message: format!(
                    "model has no output named `{}` (declared: {})",
                    wanted,
                    join_names(outputs.iter().map(String::as_str))
                ),
            })?,
        None => outputs.first().ok_or_else(|| SegMaskError::Configuration {
            message: "model declares no outputs".to_string(),
        })?,
    };

    let declared = |axis: usize| -> Option<u32> {
        let dims = shape.as_ref()?;
        if dims.len() != 4 {
            return None;
        }
        u32::try_from(dims[axis]).ok().filter(|&d| d > 0)
    };

    let height = overrides
        .height
        .or_else(|| declared(1))
        .ok_or_else(|| SegMaskError::Configuration {
            message: format!(
                "input `{}` has no fixed height (shape {:?}); set the model height explicitly",
                input_name, shape
            ),
        })?;
    let width = overrides
        .width
        .or_else(|| declared(2))
        .ok_or_else(|| SegMaskError::Configuration {
            message: format!(
                "input `{}` has no fixed width (shape {:?}); set the model width explicitly",
                input_name, shape
            ),
        })?;

    Ok(ModelContract {
        input_name: input_name.clone(),
        output_name: output_name.clone(),
        width,
        height,
    })
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nhwc(name: &str, h: i64, w: i64) -> (String, Option<Vec<i64>>) {
        (name.to_string(), Some(vec![1, h, w, 3]))
    }

    #[test]
    fn test_contract_from_declared_shape() -> Result<()> {
        let contract = resolve_contract(
            &[nhwc("input_7", 128, 224)],
            &["sigmoid".to_string()],
            &ModelOverrides::default(),
        )?;
        assert_eq!(contract.input_name, "input_7");
        assert_eq!(contract.output_name, "sigmoid");
        assert_eq!((contract.width, contract.height), (224, 128));
        Ok(())
    }

    #[test]
    fn test_binding_names_are_looked_up_not_assumed() -> Result<()> {
        for name in ["input_1", "input_4", "input_7"] {
            let contract = resolve_contract(
                &[nhwc(name, 256, 256)],
                &["out".to_string()],
                &ModelOverrides::default(),
            )?;
            assert_eq!(contract.input_name, name);
        }
        Ok(())
    }

    #[test]
    fn test_overrides_win() -> Result<()> {
        let overrides = ModelOverrides {
            width: Some(256),
            height: Some(256),
            input_name: Some("input_4".to_string()),
            output_name: Some("second".to_string()),
        };
        let contract = resolve_contract(
            &[nhwc("input_1", 128, 224), nhwc("input_4", 128, 224)],
            &["first".to_string(), "second".to_string()],
            &overrides,
        )?;
        assert_eq!(contract.input_name, "input_4");
        assert_eq!(contract.output_name, "second");
        assert_eq!((contract.width, contract.height), (256, 256));
        Ok(())
    }

    #[test]
    fn test_dynamic_dims_need_override() {
        let inputs = vec![("input".to_string(), Some(vec![-1, -1, -1, 3]))];
        let outputs = vec!["mask".to_string()];

        let err = resolve_contract(&inputs, &outputs, &ModelOverrides::default()).unwrap_err();
        assert!(matches!(err, SegMaskError::Configuration { .. }));

        let overrides = ModelOverrides {
            width: Some(224),
            height: Some(128),
            ..ModelOverrides::default()
        };
        let contract = resolve_contract(&inputs, &outputs, &overrides).unwrap();
        assert_eq!((contract.width, contract.height), (224, 128));
    }

    #[test]
    fn test_unknown_override_name_rejected() {
        let overrides = ModelOverrides {
            input_name: Some("input_9".to_string()),
            ..ModelOverrides::default()
        };
        let err = resolve_contract(&[nhwc("input_1", 1, 1)], &["o".to_string()], &overrides)
            .unwrap_err();
        assert!(err.to_string().contains("input_9"));
    }
}
