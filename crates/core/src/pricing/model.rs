//! Learned residual model adapter.
//!
//! The model is reached through two seams: [`ModelLoader`] turns an artifact
//! path into an [`InferenceSession`], and the session declares its inputs and
//! outputs. The calling convention is fixed once at load time from the
//! declared input count and recorded as a [`ModelInputStyle`]:
//!
//! - several inputs: each feature is fed as its own named scalar
//! - one input: a fixed-order numeric vector (legacy models)
//! - no inputs: nothing can be fed, the model always abstains
//!
//! [`ArtifactModelLoader`] is the production loader: ONNX exports run on
//! tract, and `.json` files are read as [`LinearResidualModel`]s (intercept,
//! numeric coefficients, one-hot categorical weights), the format the
//! artifact builder writes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{ArtifactError, InferenceError};
use crate::pricing::artifacts::parse_json_artifact;
use crate::pricing::features::ResidualFeatures;

pub type ModelOutputs = HashMap<String, Vec<f32>>;

/// Text inputs of the named calling convention, in export order.
pub const CATEGORICAL_INPUTS: [&str; 5] =
    ["service_type", "timeframe", "channel", "postcode_area", "customer_interaction_channel"];

/// Float inputs of the named calling convention, in export order.
pub const NUMERIC_INPUTS: [&str; 4] =
    ["qty_sum", "line_count", "customer_satisfaction", "customer_total_purchases"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelInputKind {
    Text,
    Float,
    FloatVector,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInput {
    pub name: String,
    pub kind: ModelInputKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelValue {
    Text(String),
    Float(f32),
    Vector(Vec<f32>),
}

impl ModelValue {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Float(_) => "float",
            Self::Vector(_) => "float_vector",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelInputStyle {
    NamedMultiInput,
    SingleVector,
    Unavailable,
}

impl ModelInputStyle {
    pub fn from_input_count(count: usize) -> Self {
        match count {
            0 => Self::Unavailable,
            1 => Self::SingleVector,
            _ => Self::NamedMultiInput,
        }
    }
}

#[async_trait]
pub trait InferenceSession: Send + Sync {
    fn inputs(&self) -> &[ModelInput];

    fn outputs(&self) -> &[String];

    async fn run(&self, feeds: Vec<(String, ModelValue)>) -> Result<ModelOutputs, InferenceError>;
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Arc<dyn InferenceSession>, ArtifactError>;
}

/// A loaded session together with the calling convention chosen for it.
#[derive(Clone)]
pub struct ModelHandle {
    session: Arc<dyn InferenceSession>,
    style: ModelInputStyle,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("style", &self.style)
            .field("inputs", &self.session.inputs())
            .field("outputs", &self.session.outputs())
            .finish()
    }
}

impl ModelHandle {
    pub fn new(session: Arc<dyn InferenceSession>) -> Self {
        let style = ModelInputStyle::from_input_count(session.inputs().len());
        Self { session, style }
    }

    pub fn style(&self) -> ModelInputStyle {
        self.style
    }

    /// Residual estimate for the blend, clamped to be non-negative.
    pub async fn estimate(&self, features: &ResidualFeatures) -> Option<f64> {
        let raw = match self.style {
            ModelInputStyle::NamedMultiInput => self.infer(named_feeds(features)).await,
            ModelInputStyle::SingleVector => {
                self.infer(self.vector_feed(features.numeric_vector())?).await
            }
            ModelInputStyle::Unavailable => None,
        }?;
        Some(raw.max(0.0))
    }

    /// Raw, unclamped prediction for single-input models fed a fixed-order
    /// numeric vector. Abstains for any other input shape.
    pub async fn predict_vector(&self, vector: &[f32]) -> Option<f64> {
        if self.style != ModelInputStyle::SingleVector {
            return None;
        }
        self.infer(self.vector_feed(vector.to_vec())?).await
    }

    fn vector_feed(&self, vector: Vec<f32>) -> Option<Vec<(String, ModelValue)>> {
        let input = self.session.inputs().first()?;
        Some(vec![(input.name.clone(), ModelValue::Vector(vector))])
    }

    async fn infer(&self, feeds: Vec<(String, ModelValue)>) -> Option<f64> {
        let Some(output_name) = self.session.outputs().first() else {
            warn!(
                event_name = "pricing.model.no_outputs",
                "model declares no outputs; model estimator abstains"
            );
            return None;
        };

        let outputs = match self.session.run(feeds).await {
            Ok(outputs) => outputs,
            Err(error) => {
                warn!(
                    event_name = "pricing.model.inference_failed",
                    error = %error,
                    "model inference failed; model estimator abstains"
                );
                return None;
            }
        };

        let value = outputs.get(output_name).and_then(|values| values.first()).copied();
        match value.map(f64::from).filter(|value| value.is_finite()) {
            Some(value) => Some(value),
            None => {
                warn!(
                    event_name = "pricing.model.inference_failed",
                    error = %InferenceError::MissingOutput(output_name.clone()),
                    "model returned no usable value; model estimator abstains"
                );
                None
            }
        }
    }
}

fn named_feeds(features: &ResidualFeatures) -> Vec<(String, ModelValue)> {
    let text = |name: &str, value: &str| (name.to_string(), ModelValue::Text(value.to_string()));
    let float = |name: &str, value: f64| (name.to_string(), ModelValue::Float(value as f32));

    let [service_type, timeframe, channel, postcode_area, interaction] = CATEGORICAL_INPUTS;
    let [qty_sum, line_count, satisfaction, total_purchases] = NUMERIC_INPUTS;

    vec![
        text(service_type, features.service_type.as_str()),
        text(timeframe, features.timeframe.as_str()),
        text(channel, features.channel.as_str()),
        text(postcode_area, &features.postcode_area),
        text(interaction, &features.customer_interaction_channel),
        float(qty_sum, features.qty_sum),
        float(line_count, f64::from(features.line_count)),
        float(satisfaction, features.customer_satisfaction),
        float(total_purchases, features.customer_total_purchases as f64),
    ]
}

/// Linear residual model exported as JSON: `intercept + Σ numeric + Σ one-hot`
/// for named inputs, or `intercept + vector · coefficients` for a single
/// vector input. Unknown categories contribute nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearResidualModel {
    pub version: f64,
    #[serde(default)]
    pub inputs: Vec<ModelInput>,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default)]
    pub numeric: HashMap<String, f64>,
    #[serde(default)]
    pub categorical: HashMap<String, HashMap<String, f64>>,
    #[serde(default)]
    pub vector: Vec<f64>,
}

fn default_outputs() -> Vec<String> {
    vec!["variable".to_string()]
}

impl LinearResidualModel {
    pub const REQUIRED_FIELDS: [&'static str; 1] = ["version"];

    fn score_named(&self, feeds: &[(String, ModelValue)]) -> Result<f64, InferenceError> {
        let mut total = self.intercept;
        for input in &self.inputs {
            let value = feeds
                .iter()
                .find(|(name, _)| name == &input.name)
                .map(|(_, value)| value)
                .ok_or_else(|| InferenceError::MissingInput(input.name.clone()))?;

            total += match (input.kind, value) {
                (ModelInputKind::Text, ModelValue::Text(category)) => self
                    .categorical
                    .get(&input.name)
                    .and_then(|weights| weights.get(category))
                    .copied()
                    .unwrap_or(0.0),
                (ModelInputKind::Float, ModelValue::Float(number)) => {
                    self.numeric.get(&input.name).copied().unwrap_or(0.0) * f64::from(*number)
                }
                (expected, received) => {
                    return Err(InferenceError::InputKind {
                        name: input.name.clone(),
                        expected: kind_label(expected),
                        received: received.kind_name(),
                    })
                }
            };
        }
        Ok(total)
    }

    fn score_vector(&self, vector: &[f32]) -> Result<f64, InferenceError> {
        if vector.len() != self.vector.len() {
            return Err(InferenceError::VectorWidth {
                expected: self.vector.len(),
                received: vector.len(),
            });
        }
        let dot: f64 =
            self.vector.iter().zip(vector).map(|(weight, x)| weight * f64::from(*x)).sum();
        Ok(self.intercept + dot)
    }
}

pub(crate) fn kind_label(kind: ModelInputKind) -> &'static str {
    match kind {
        ModelInputKind::Text => "text",
        ModelInputKind::Float => "float",
        ModelInputKind::FloatVector => "float_vector",
    }
}

#[async_trait]
impl InferenceSession for LinearResidualModel {
    fn inputs(&self) -> &[ModelInput] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    async fn run(&self, feeds: Vec<(String, ModelValue)>) -> Result<ModelOutputs, InferenceError> {
        let score = match (self.inputs.as_slice(), feeds.as_slice()) {
            ([single], [(_, ModelValue::Vector(vector))])
                if single.kind == ModelInputKind::FloatVector =>
            {
                self.score_vector(vector)?
            }
            _ => self.score_named(&feeds)?,
        };

        let score = score as f32;
        if !score.is_finite() {
            return Err(InferenceError::NonFinite);
        }

        Ok(self.outputs.iter().map(|name| (name.clone(), vec![score])).collect())
    }
}

/// Chooses the backend from the artifact's extension.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArtifactModelLoader;

#[async_trait]
impl ModelLoader for ArtifactModelLoader {
    async fn load(&self, path: &Path) -> Result<Arc<dyn InferenceSession>, ArtifactError> {
        let linear = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if linear {
            return LinearModelLoader.load(path).await;
        }

        tokio::fs::metadata(path).await.map_err(|source| ArtifactError::from_io(path, source))?;
        load_onnx(path).await
    }
}

#[cfg(feature = "onnx")]
async fn load_onnx(path: &Path) -> Result<Arc<dyn InferenceSession>, ArtifactError> {
    crate::pricing::onnx::OnnxModelLoader.load(path).await
}

#[cfg(not(feature = "onnx"))]
async fn load_onnx(path: &Path) -> Result<Arc<dyn InferenceSession>, ArtifactError> {
    Err(ArtifactError::Model {
        path: path.to_path_buf(),
        message: "built without the `onnx` feature".to_string(),
    })
}

/// Loads [`LinearResidualModel`] artifacts from disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearModelLoader;

#[async_trait]
impl ModelLoader for LinearModelLoader {
    async fn load(&self, path: &Path) -> Result<Arc<dyn InferenceSession>, ArtifactError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ArtifactError::from_io(path, source))?;
        let model: LinearResidualModel =
            parse_json_artifact(path, &raw, &LinearResidualModel::REQUIRED_FIELDS)?;
        Ok(Arc::new(model))
    }
}
