//! Weight snapshot serialization (feature: `serde`).
//!
//! A versioned JSON format for a [`WeightSet`], independent of the in-memory
//! representation. Deserialization validates shapes, finiteness and that the
//! three matrices agree on the rank.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::{Dims, Error, Linear, Result, WeightSet};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedWeights {
    pub format_version: u32,
    pub dims: Dims,
    pub rank: usize,
    /// Row-major `(rank, m*n)`.
    pub w1a: Vec<f64>,
    /// Row-major `(rank, n*k)`.
    pub w1b: Vec<f64>,
    /// Row-major `(m*k, rank)`.
    pub w2: Vec<f64>,
}

impl SerializedWeights {
    pub fn new(dims: Dims, weights: &WeightSet) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            dims,
            rank: weights.rank(),
            w1a: weights.w1a.weights().to_vec(),
            w1b: weights.w1b.weights().to_vec(),
            w2: weights.w2.weights().to_vec(),
        }
    }

    pub fn into_weights(self) -> Result<WeightSet> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported snapshot format_version {}; expected {}",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        let dims = Dims::new(self.dims.m, self.dims.n, self.dims.k)?;

        let mut all = self.w1a.iter().chain(&self.w1b).chain(&self.w2);
        if all.any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "weights must contain only finite values".to_owned(),
            ));
        }

        let weights = WeightSet {
            w1a: Linear::from_parts(dims.a_len(), self.rank, self.w1a)?,
            w1b: Linear::from_parts(dims.b_len(), self.rank, self.w1b)?,
            w2: Linear::from_parts(self.rank, dims.c_len(), self.w2)?,
        };
        weights.validate(dims, self.rank)?;
        Ok(weights)
    }
}

impl WeightSet {
    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self, dims: Dims) -> Result<String> {
        serde_json::to_string_pretty(&SerializedWeights::new(dims, self))
            .map_err(|e| Error::InvalidData(format!("failed to serialize weights: {e}")))
    }

    pub fn from_json_str(s: &str) -> Result<(Dims, Self)> {
        let ser: SerializedWeights = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse weights json: {e}")))?;
        let dims = ser.dims;
        Ok((dims, ser.into_weights()?))
    }

    pub fn save_json<P: AsRef<Path>>(&self, dims: Dims, path: P) -> Result<()> {
        let p = path.as_ref();
        std::fs::write(p, self.to_json_string(dims)?).map_err(|e| Error::io(p, e))
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<(Dims, Self)> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
        Self::from_json_str(&s)
    }
}
