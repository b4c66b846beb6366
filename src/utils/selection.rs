//! Weighted random choice among configured options.

use rand::distributions::{WeightedError, WeightedIndex};
use rand::prelude::Distribution;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("No options to select from")]
    Empty,

    #[error("{options} options but {weights} weights")]
    LengthMismatch { options: usize, weights: usize },

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),
}

impl From<WeightedError> for SelectionError {
    fn from(e: WeightedError) -> Self {
        SelectionError::InvalidWeights(e.to_string())
    }
}

/// Picks one of `options` with probability proportional to its weight.
///
/// Weights must be finite and non-negative with a positive sum.
pub fn select<'a, T, R>(options: &'a [T], weights: &[f64], rng: &mut R) -> Result<&'a T, SelectionError>
where
    R: Rng + ?Sized,
{
    if options.is_empty() {
        return Err(SelectionError::Empty);
    }
    if options.len() != weights.len() {
        return Err(SelectionError::LengthMismatch {
            options: options.len(),
            weights: weights.len(),
        });
    }
    if let Some(bad) = weights.iter().find(|w| !w.is_finite()) {
        return Err(SelectionError::InvalidWeights(format!("non-finite weight {}", bad)));
    }

    let distribution = WeightedIndex::new(weights)?;
    Ok(&options[distribution.sample(rng)])
}
