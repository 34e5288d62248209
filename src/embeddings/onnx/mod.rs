//! Local ONNX sentence encoders (feature `onnx`).

mod model;
mod tokenize;

use std::path::Path;

pub use model::{EmbedModel, ModelError};
pub use tokenize::{EmbedTokenizer, TokenizedInput, TokenizerError};

use super::{OnnxModel, VectorEncoder};
use crate::error::{EncodeError, RetrievalError};

pub struct OnnxEncoder {
    model: OnnxModel,
    inner: EmbedModel,
    model_id: String,
}

impl OnnxEncoder {
    pub fn from_dir(model: OnnxModel, dir: &Path) -> Result<Self, RetrievalError> {
        let inner = EmbedModel::from_dir(model, dir).map_err(|e| {
            RetrievalError::config(format!("cannot load {model} from {}: {e}", dir.display()))
        })?;
        tracing::info!(model = %model, hf_id = model.hf_model_id(), "onnx model loaded");
        Ok(Self {
            model,
            inner,
            model_id: model.to_string(),
        })
    }
}

impl VectorEncoder for OnnxEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.model.dimensions()
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        self.inner
            .embed(text)
            .map_err(|e| EncodeError::Failed(e.to_string()))
    }
}
