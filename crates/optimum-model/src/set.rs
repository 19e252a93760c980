//! Model Set
//!
//! One model per estimation range, combined into a single model through
//! normalized weights:
//!
//! M = Σ_i w_i * M_i,   w_i ≥ 0,   Σ_i w_i = 1
//!
//! The `linear` method averages the factor covariance `D`; the
//! `linear-fractional` method averages its inverse `Di` instead. Returns,
//! loadings and idiosyncratic variances are always averaged linearly.

use crate::error::{ModelError, Result};
use crate::model::{Covariance, Model};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How sub-models are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelMethod {
    /// Weighted sum of `r`, `F`, `Q` and `D`
    #[default]
    Linear,
    /// Weighted sum of `r`, `F`, `Q` and `Di`
    LinearFractional,
}

impl ModelMethod {
    /// Method name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::LinearFractional => "linear-fractional",
        }
    }
}

impl fmt::Display for ModelMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "linear-fractional" => Ok(Self::LinearFractional),
            other => Err(format!("unknown model method: {}", other)),
        }
    }
}

/// A labelled model and its weight
#[derive(Debug, Clone)]
struct RangeModel {
    label: String,
    model: Model,
    weight: f64,
}

/// Models per estimation range with normalized weights
#[derive(Debug, Clone, Default)]
pub struct ModelSet {
    entries: Vec<RangeModel>,
}

impl ModelSet {
    /// Create a set from labelled models
    ///
    /// Without explicit weights every range gets the same weight.
    pub fn new(
        models: impl IntoIterator<Item = (String, Model)>,
        weights: Option<&HashMap<String, f64>>,
    ) -> Result<Self> {
        let mut entries: Vec<RangeModel> = Vec::new();
        for (label, model) in models {
            if entries.iter().any(|e| e.label == label) {
                return Err(ModelError::DuplicateLabel(label));
            }
            entries.push(RangeModel {
                label,
                model,
                weight: 0.0,
            });
        }

        let mut set = Self { entries };
        if set.is_empty() {
            return Ok(set);
        }

        match weights {
            Some(weights) => set.set_weights(weights)?,
            None => {
                let uniform: HashMap<String, f64> =
                    set.labels().map(|label| (label.to_string(), 1.0)).collect();
                set.set_weights(&uniform)?;
            }
        }
        Ok(set)
    }

    /// Are there no models
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of models
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Range labels in insertion order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    /// Model for a range label
    pub fn get(&self, label: &str) -> Option<&Model> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| &e.model)
    }

    /// Normalized weights keyed by range label
    pub fn weights(&self) -> HashMap<String, f64> {
        self.entries
            .iter()
            .map(|e| (e.label.clone(), e.weight))
            .collect()
    }

    /// Normalized weight of a range label
    pub fn weight(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.weight)
    }

    /// Set and normalize the range weights
    ///
    /// # Errors
    /// * `ModelError::NoModels` if the set is empty
    /// * `ModelError::WeightKeyMismatch` if the labels differ from the models'
    /// * `ModelError::NegativeWeight` if any weight is negative
    pub fn set_weights(&mut self, weights: &HashMap<String, f64>) -> Result<()> {
        if self.is_empty() {
            return Err(ModelError::NoModels);
        }

        let mut expected: Vec<String> = self.labels().map(str::to_string).collect();
        let mut actual: Vec<String> = weights.keys().cloned().collect();
        expected.sort();
        actual.sort();
        if expected != actual {
            return Err(ModelError::WeightKeyMismatch { expected, actual });
        }

        for (label, &weight) in weights {
            if weight.is_nan() || weight < 0.0 {
                return Err(ModelError::NegativeWeight {
                    label: label.clone(),
                    weight,
                });
            }
        }

        let total: f64 = weights.values().sum();
        let n = self.len() as f64;
        for entry in &mut self.entries {
            entry.weight = if total > 0.0 {
                weights[&entry.label] / total
            } else {
                1.0 / n
            };
        }
        Ok(())
    }

    /// Combine the models with the current weights
    ///
    /// A single model is always combined linearly.
    pub fn combine(&self, method: ModelMethod) -> Result<Model> {
        let first = self.entries.first().ok_or(ModelError::NoModels)?;
        let (n, k) = (first.model.n_assets(), first.model.n_factors());

        if let Some(bad) = self
            .entries
            .iter()
            .find(|e| e.model.n_assets() != n || e.model.n_factors() != k)
        {
            return Err(ModelError::DimensionMismatch(format!(
                "model {} has {} assets and {} factors, expected {} and {}",
                bad.label,
                bad.model.n_assets(),
                bad.model.n_factors(),
                n,
                k
            )));
        }

        let method = if self.len() == 1 {
            ModelMethod::Linear
        } else {
            method
        };

        let mut r = Array1::<f64>::zeros(n);
        let mut f = Array2::<f64>::zeros((n, k));
        let mut q = Array1::<f64>::zeros(n);
        let mut cov = Array2::<f64>::zeros((k, k));

        for entry in &self.entries {
            let w = entry.weight;
            r.scaled_add(w, entry.model.r());
            f.scaled_add(w, entry.model.f());
            q.scaled_add(w, entry.model.q());
            match method {
                ModelMethod::Linear => cov.scaled_add(w, entry.model.d()?),
                ModelMethod::LinearFractional => cov.scaled_add(w, entry.model.di()?),
            }
        }

        let covariance = match method {
            ModelMethod::Linear => Covariance::Direct(cov),
            ModelMethod::LinearFractional => Covariance::Inverse(cov),
        };
        Model::new(r, f, q, covariance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::random_model;
    use approx::assert_abs_diff_eq;

    fn ranges() -> Vec<(String, Model)> {
        vec![
            ("1mo".to_string(), random_model(11, 4, 2)),
            ("6mo".to_string(), random_model(12, 4, 2)),
            ("1y".to_string(), random_model(13, 4, 2)),
        ]
    }

    fn weights(values: &[(&str, f64)]) -> HashMap<String, f64> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_default_weights_are_uniform() {
        let set = ModelSet::new(ranges(), None).unwrap();
        for label in ["1mo", "6mo", "1y"] {
            assert_abs_diff_eq!(set.weight(label).unwrap(), 1.0 / 3.0, epsilon = 1e-15);
        }
        let labels: Vec<&str> = set.labels().collect();
        assert_eq!(labels, vec!["1mo", "6mo", "1y"]);
    }

    #[test]
    fn test_duplicate_label() {
        let mut models = ranges();
        models.push(("6mo".to_string(), random_model(15, 4, 2)));
        assert!(matches!(
            ModelSet::new(models, None),
            Err(ModelError::DuplicateLabel(ref label)) if label == "6mo"
        ));
    }

    #[test]
    fn test_weights_are_normalized() {
        let mut set = ModelSet::new(ranges(), None).unwrap();
        set.set_weights(&weights(&[("1mo", 1.0), ("6mo", 2.0), ("1y", 3.0)]))
            .unwrap();
        assert_abs_diff_eq!(set.weight("1mo").unwrap(), 1.0 / 6.0, epsilon = 1e-15);
        assert_abs_diff_eq!(set.weight("6mo").unwrap(), 2.0 / 6.0, epsilon = 1e-15);
        assert_abs_diff_eq!(set.weight("1y").unwrap(), 3.0 / 6.0, epsilon = 1e-15);

        set.set_weights(&weights(&[("1mo", 0.0), ("6mo", 0.0), ("1y", 0.0)]))
            .unwrap();
        assert_abs_diff_eq!(set.weight("6mo").unwrap(), 1.0 / 3.0, epsilon = 1e-15);
    }

    #[test]
    fn test_weight_validation() {
        let mut set = ModelSet::new(ranges(), None).unwrap();
        assert!(matches!(
            set.set_weights(&HashMap::new()),
            Err(ModelError::WeightKeyMismatch { .. })
        ));
        assert!(matches!(
            set.set_weights(&weights(&[("1mo", 1.0), ("6mo", -2.0), ("1y", 3.0)])),
            Err(ModelError::NegativeWeight { .. })
        ));
        assert!(matches!(
            set.set_weights(&weights(&[("1mo", 1.0), ("6mo", f64::NAN), ("1y", 3.0)])),
            Err(ModelError::NegativeWeight { .. })
        ));

        let mut empty = ModelSet::default();
        assert!(matches!(
            empty.set_weights(&HashMap::new()),
            Err(ModelError::NoModels)
        ));
        assert!(matches!(
            empty.combine(ModelMethod::Linear),
            Err(ModelError::NoModels)
        ));
    }

    #[test]
    fn test_combine_linear() {
        let w = weights(&[("1mo", 3.0), ("6mo", 1.0), ("1y", 2.0)]);
        let set = ModelSet::new(ranges(), Some(&w)).unwrap();
        let model = set.combine(ModelMethod::Linear).unwrap();

        let m = |label: &str| set.get(label).unwrap();
        let expected_d = m("1mo").d().unwrap() * (3.0 / 6.0)
            + m("6mo").d().unwrap() * (1.0 / 6.0)
            + m("1y").d().unwrap() * (2.0 / 6.0);
        let expected_f = m("1mo").f() * (3.0 / 6.0)
            + m("6mo").f() * (1.0 / 6.0)
            + m("1y").f() * (2.0 / 6.0);
        let expected_r = m("1mo").r() * (3.0 / 6.0)
            + m("6mo").r() * (1.0 / 6.0)
            + m("1y").r() * (2.0 / 6.0);

        assert_close(model.d().unwrap(), &expected_d);
        assert_close(model.f(), &expected_f);
        for (x, y) in model.r().iter().zip(expected_r.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_combine_linear_fractional() {
        let w = weights(&[("1mo", 3.0), ("6mo", 1.0), ("1y", 2.0)]);
        let set = ModelSet::new(ranges(), Some(&w)).unwrap();
        let model = set.combine(ModelMethod::LinearFractional).unwrap();

        let m = |label: &str| set.get(label).unwrap();
        let expected_di = m("1mo").di().unwrap() * (3.0 / 6.0)
            + m("6mo").di().unwrap() * (1.0 / 6.0)
            + m("1y").di().unwrap() * (2.0 / 6.0);
        let expected_q = m("1mo").q() * (3.0 / 6.0)
            + m("6mo").q() * (1.0 / 6.0)
            + m("1y").q() * (2.0 / 6.0);

        assert_close(model.di().unwrap(), &expected_di);
        for (x, y) in model.q().iter().zip(expected_q.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_model_is_linear() {
        let single = vec![("1y".to_string(), random_model(14, 4, 2))];
        let set = ModelSet::new(single, None).unwrap();
        let model = set.combine(ModelMethod::LinearFractional).unwrap();
        assert_eq!(
            model.covariance_source(),
            crate::model::CovarianceSource::Direct
        );
        assert_close(model.d().unwrap(), set.get("1y").unwrap().d().unwrap());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("linear".parse::<ModelMethod>().unwrap(), ModelMethod::Linear);
        assert_eq!(
            "linear-fractional".parse::<ModelMethod>().unwrap(),
            ModelMethod::LinearFractional
        );
        assert!("quadratic".parse::<ModelMethod>().is_err());
        assert_eq!(
            serde_json::to_string(&ModelMethod::LinearFractional).unwrap(),
            "\"linear-fractional\""
        );
    }
}
