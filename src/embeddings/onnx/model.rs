// retrieval-core/src/embeddings/onnx/model.rs
//
// ONNX model inference via tract

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Axis, Ix3};
use thiserror::Error;
use tract_onnx::prelude::*;

use super::tokenize::{EmbedTokenizer, TokenizedInput, TokenizerError};
use crate::embeddings::config::{OnnxModel, PoolingStrategy};
use crate::index::distance::normalized;

/// Type alias for the tract typed model
type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model load failed: {0}")]
    LoadFailed(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    #[error("shape error: {0}")]
    Shape(String),
}

/// Loaded embedding model ready for inference
pub struct EmbedModel {
    plan: Arc<TractModel>,
    tokenizer: EmbedTokenizer,
    pooling: PoolingStrategy,
    /// Whether the graph takes `token_type_ids` as its third input
    wants_type_ids: bool,
}

impl EmbedModel {
    /// Load `model.onnx` and `tokenizer.json` from `dir`
    pub fn from_dir(model: OnnxModel, dir: &Path) -> Result<Self, ModelError> {
        let plan = tract_onnx::onnx()
            .model_for_path(dir.join("model.onnx"))
            .map_err(|e| ModelError::LoadFailed(e.to_string()))?
            .into_optimized()
            .map_err(|e| ModelError::LoadFailed(e.to_string()))?
            .into_runnable()
            .map_err(|e| ModelError::LoadFailed(e.to_string()))?;

        let wants_type_ids = plan.model().inputs.len() >= 3;
        let tokenizer = EmbedTokenizer::from_file(&dir.join("tokenizer.json"), model.max_length())?;

        Ok(Self {
            plan: Arc::new(plan),
            tokenizer,
            pooling: model.pooling(),
            wants_type_ids,
        })
    }

    /// Embed one text into a normalized sentence vector
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let input = self.tokenizer.encode(text)?;
        let seq_len = input.input_ids.len();

        let mut inputs: TVec<TValue> = tvec![
            input_tensor(&input.input_ids, seq_len)?.into(),
            input_tensor(&input.attention_mask, seq_len)?.into(),
        ];
        if self.wants_type_ids {
            inputs.push(input_tensor(&input.token_type_ids, seq_len)?.into());
        }

        let outputs = self
            .plan
            .run(inputs)
            .map_err(|e| ModelError::InferenceFailed(e.to_string()))?;

        // (batch, seq_len, hidden)
        let hidden = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| ModelError::Shape(e.to_string()))?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .map_err(|e| ModelError::Shape(format!("expected rank 3 output: {e}")))?;

        let embedding = pool(&hidden.index_axis(Axis(0), 0).to_owned(), &input, self.pooling);
        Ok(normalized(&embedding))
    }
}

fn input_tensor(values: &[i64], seq_len: usize) -> Result<Tensor, ModelError> {
    Tensor::from_shape(&[1, seq_len], values).map_err(|e| ModelError::Shape(e.to_string()))
}

/// Reduce token embeddings `(seq_len, hidden)` to one vector
fn pool(tokens: &Array2<f32>, input: &TokenizedInput, strategy: PoolingStrategy) -> Vec<f32> {
    let hidden_size = tokens.shape()[1];
    let active = input.attention_mask.iter().enumerate().filter(|(_, m)| **m > 0).map(|(j, _)| j);

    match strategy {
        PoolingStrategy::Mean => {
            let mut sum = vec![0.0f32; hidden_size];
            let mut count = 0.0f32;
            for j in active {
                for (k, val) in tokens.row(j).iter().enumerate() {
                    sum[k] += val;
                }
                count += 1.0;
            }
            if count > 0.0 {
                sum.iter_mut().for_each(|v| *v /= count);
            }
            sum
        }
        PoolingStrategy::Cls => tokens.row(0).to_vec(),
        PoolingStrategy::Max => {
            let mut max_vals = vec![f32::NEG_INFINITY; hidden_size];
            for j in active {
                for (k, val) in tokens.row(j).iter().enumerate() {
                    max_vals[k] = max_vals[k].max(*val);
                }
            }
            max_vals
        }
    }
}
