use super::{BanditError, Result};
use crate::services::vector_math;
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut2};
use serde::{Deserialize, Serialize};

/// Per-subject LinUCB model.
///
/// `a` starts as the identity and only ever receives `xxᵀ` additions, so it
/// stays symmetric positive definite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanditModelState {
    /// D x D, row-major
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub dimension: usize,
    pub alpha: f64,
}

impl BanditModelState {
    pub fn new(dimension: usize, alpha: f64) -> Self {
        let a = vector_math::identity(dimension).into_raw_vec();
        Self {
            a,
            b: vec![0.0; dimension],
            dimension,
            alpha,
        }
    }

    /// Reject states whose buffers do not match `dimension` (e.g. a
    /// hand-edited or truncated record coming back from storage)
    pub fn validate(&self) -> Result<()> {
        let d = self.dimension;
        if d == 0 {
            return Err(BanditError::CorruptState("dimension is zero".to_string()));
        }
        if self.a.len() != d * d {
            return Err(BanditError::CorruptState(format!(
                "A has {} entries, expected {}",
                self.a.len(),
                d * d
            )));
        }
        if self.b.len() != d {
            return Err(BanditError::CorruptState(format!(
                "b has {} entries, expected {}",
                self.b.len(),
                d
            )));
        }
        Ok(())
    }

    /// False once an overflow has reached A or b
    pub fn is_finite(&self) -> bool {
        vector_math::is_finite_vector(&self.a) && vector_math::is_finite_vector(&self.b)
    }

    pub fn a_matrix(&self) -> Result<ArrayView2<'_, f64>> {
        ArrayView2::from_shape((self.dimension, self.dimension), &self.a)
            .map_err(|e| BanditError::CorruptState(e.to_string()))
    }

    pub(crate) fn a_matrix_mut(&mut self) -> Result<ArrayViewMut2<'_, f64>> {
        ArrayViewMut2::from_shape((self.dimension, self.dimension), &mut self.a)
            .map_err(|e| BanditError::CorruptState(e.to_string()))
    }

    pub fn b_vector(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(&self.b)
    }

    pub fn trace(&self) -> Result<f64> {
        Ok(vector_math::trace(self.a_matrix()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_identity() {
        let state = BanditModelState::new(3, 0.1);
        assert_eq!(state.a, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(state.b, vec![0.0; 3]);
        assert_eq!(state.trace().unwrap(), 3.0);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_truncated_state() {
        let mut state = BanditModelState::new(3, 0.1);
        state.a.pop();
        assert!(matches!(state.validate(), Err(BanditError::CorruptState(_))));

        let mut state = BanditModelState::new(3, 0.1);
        state.b.push(1.0);
        assert!(matches!(state.validate(), Err(BanditError::CorruptState(_))));

        // shape is fine; finiteness is checked separately
        let mut state = BanditModelState::new(2, 0.1);
        state.b[0] = f64::NAN;
        assert!(state.validate().is_ok());
        assert!(!state.is_finite());
    }

    #[test]
    fn test_state_json_shape() {
        let state = BanditModelState::new(2, 0.1);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["dimension"], 2);
        assert_eq!(json["a"].as_array().unwrap().len(), 4);
    }
}
