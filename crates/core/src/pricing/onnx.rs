//! ONNX residual models executed with tract.
//!
//! Exported pipelines declare one `[1, 1]` tensor per feature: strings for
//! the categorical inputs and `f32` for the numeric ones. A model with a
//! single input takes the fixed-order numeric vector as a `[1, n]` tensor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tract_onnx::prelude::*;

use crate::errors::{ArtifactError, InferenceError};
use crate::pricing::features::NUMERIC_VECTOR_WIDTH;
use crate::pricing::model::{
    kind_label, InferenceSession, ModelInput, ModelInputKind, ModelLoader, ModelOutputs,
    ModelValue, CATEGORICAL_INPUTS,
};

type OnnxPlan = TypedRunnableModel<TypedModel>;

#[derive(Clone, Copy, Debug, Default)]
pub struct OnnxModelLoader;

#[async_trait]
impl ModelLoader for OnnxModelLoader {
    async fn load(&self, path: &Path) -> Result<Arc<dyn InferenceSession>, ArtifactError> {
        let owned = path.to_path_buf();
        let session = tokio::task::spawn_blocking(move || OnnxSession::load(&owned))
            .await
            .map_err(|error| model_error(path, error))??;
        Ok(Arc::new(session))
    }
}

pub struct OnnxSession {
    path: PathBuf,
    inputs: Vec<ModelInput>,
    outputs: Vec<String>,
    plan: OnnxPlan,
}

impl std::fmt::Debug for OnnxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSession")
            .field("path", &self.path)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl OnnxSession {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let mut model =
            tract_onnx::onnx().model_for_path(path).map_err(|error| model_error(path, error))?;

        let names: Vec<String> = model
            .input_outlets()
            .map_err(|error| model_error(path, error))?
            .iter()
            .map(|outlet| model.node(outlet.node).name.clone())
            .collect();
        let inputs: Vec<ModelInput> = names
            .iter()
            .map(|name| ModelInput { name: name.clone(), kind: input_kind(name, names.len()) })
            .collect();

        for (index, input) in inputs.iter().enumerate() {
            model = model
                .with_input_fact(index, input_fact(input.kind))
                .map_err(|error| model_error(path, error))?;
        }

        let outputs: Vec<String> = model
            .output_outlets()
            .map_err(|error| model_error(path, error))?
            .iter()
            .map(|outlet| {
                model
                    .outlet_label(*outlet)
                    .map(str::to_string)
                    .unwrap_or_else(|| model.node(outlet.node).name.clone())
            })
            .collect();

        let plan = model
            .into_optimized()
            .and_then(|optimized| optimized.into_runnable())
            .map_err(|error| model_error(path, error))?;

        Ok(Self { path: path.to_path_buf(), inputs, outputs, plan })
    }
}

#[async_trait]
impl InferenceSession for OnnxSession {
    fn inputs(&self) -> &[ModelInput] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    async fn run(&self, feeds: Vec<(String, ModelValue)>) -> Result<ModelOutputs, InferenceError> {
        let mut tensors: TVec<TValue> = TVec::new();
        for input in &self.inputs {
            let value = feeds
                .iter()
                .find(|(name, _)| name == &input.name)
                .map(|(_, value)| value)
                .ok_or_else(|| InferenceError::MissingInput(input.name.clone()))?;
            tensors.push(to_tensor(input, value)?.into());
        }

        let results = self.plan.run(tensors).map_err(engine_error)?;

        let mut outputs = ModelOutputs::new();
        for (name, value) in self.outputs.iter().zip(results.iter()) {
            let values = value
                .cast_to::<f32>()
                .and_then(|cast| Ok(cast.as_slice::<f32>()?.to_vec()))
                .map_err(engine_error)?;
            outputs.insert(name.clone(), values);
        }
        Ok(outputs)
    }
}

fn input_kind(name: &str, input_count: usize) -> ModelInputKind {
    if input_count == 1 {
        ModelInputKind::FloatVector
    } else if CATEGORICAL_INPUTS.contains(&name) {
        ModelInputKind::Text
    } else {
        ModelInputKind::Float
    }
}

fn input_fact(kind: ModelInputKind) -> InferenceFact {
    match kind {
        ModelInputKind::Text => InferenceFact::dt_shape(DatumType::String, tvec!(1, 1)),
        ModelInputKind::Float => InferenceFact::dt_shape(DatumType::F32, tvec!(1, 1)),
        ModelInputKind::FloatVector => {
            InferenceFact::dt_shape(DatumType::F32, tvec!(1, NUMERIC_VECTOR_WIDTH))
        }
    }
}

fn to_tensor(input: &ModelInput, value: &ModelValue) -> Result<Tensor, InferenceError> {
    match (input.kind, value) {
        (ModelInputKind::Text, ModelValue::Text(text)) => {
            Ok(Tensor::from(tract_ndarray::arr2(&[[text.clone()]])))
        }
        (ModelInputKind::Float, ModelValue::Float(number)) => {
            Ok(Tensor::from(tract_ndarray::arr2(&[[*number]])))
        }
        (ModelInputKind::FloatVector, ModelValue::Vector(vector)) => {
            if vector.len() != NUMERIC_VECTOR_WIDTH {
                return Err(InferenceError::VectorWidth {
                    expected: NUMERIC_VECTOR_WIDTH,
                    received: vector.len(),
                });
            }
            tract_ndarray::Array2::from_shape_vec((1, vector.len()), vector.clone())
                .map(Tensor::from)
                .map_err(|error| InferenceError::Engine(error.to_string()))
        }
        (expected, received) => Err(InferenceError::InputKind {
            name: input.name.clone(),
            expected: kind_label(expected),
            received: received.kind_name(),
        }),
    }
}

fn model_error(path: &Path, error: impl std::fmt::Display) -> ArtifactError {
    ArtifactError::Model { path: path.to_path_buf(), message: format!("{error:#}") }
}

fn engine_error(error: TractError) -> InferenceError {
    InferenceError::Engine(format!("{error:#}"))
}
