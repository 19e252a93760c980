//! Factor Model
//!
//! Risk/return model for n assets driven by k common factors:
//!
//! Σ = F * D * F^T + diag(Q)
//!
//! where:
//! - r = expected returns (n)
//! - F = factor loadings (n x k)
//! - D = factor covariance (k x k), or its inverse Di
//! - Q = idiosyncratic variances (n)
//!
//! Exactly one of `D` and `Di` is authoritative at any time. The other one,
//! and the per-asset standard deviation, are computed on first access and
//! cached until the authoritative matrix is replaced.

use crate::error::{ModelError, Result};
use crate::linalg;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// Raw model data as exchanged with the model service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    /// Expected returns
    pub r: Vec<f64>,

    /// Factor loadings, one row per asset
    #[serde(rename = "F")]
    pub f: Vec<Vec<f64>>,

    /// Idiosyncratic variances
    #[serde(rename = "Q")]
    pub q: Vec<f64>,

    /// Factor covariance
    #[serde(rename = "D", default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Vec<Vec<f64>>>,

    /// Inverse factor covariance
    #[serde(rename = "Di", default, skip_serializing_if = "Option::is_none")]
    pub di: Option<Vec<Vec<f64>>>,
}

/// Factor covariance in one of its two representations
#[derive(Debug, Clone, PartialEq)]
pub enum Covariance {
    /// Factor covariance `D`
    Direct(Array2<f64>),
    /// Inverse factor covariance `Di`
    Inverse(Array2<f64>),
}

/// Which covariance representation a model was last given
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceSource {
    /// `D` is authoritative, `Di` is derived
    Direct,
    /// `Di` is authoritative, `D` is derived
    Inverse,
}

/// Named model attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelField {
    /// Expected returns
    #[serde(rename = "r")]
    R,
    /// Factor loadings
    #[serde(rename = "F")]
    F,
    /// Idiosyncratic variances
    #[serde(rename = "Q")]
    Q,
    /// Factor covariance
    #[serde(rename = "D")]
    D,
    /// Inverse factor covariance
    #[serde(rename = "Di")]
    Di,
    /// Per-asset standard deviation
    #[serde(rename = "std")]
    Std,
}

impl ModelField {
    /// Key used for this field in exported data
    pub const fn name(&self) -> &'static str {
        match self {
            Self::R => "r",
            Self::F => "F",
            Self::Q => "Q",
            Self::D => "D",
            Self::Di => "Di",
            Self::Std => "std",
        }
    }
}

impl fmt::Display for ModelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exported value of a model attribute
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Vector attribute (`r`, `Q`, `std`)
    Vector(Array1<f64>),
    /// Matrix attribute (`F`, `D`, `Di`)
    Matrix(Array2<f64>),
}

impl FieldValue {
    fn scale(&mut self, factor: f64) {
        match self {
            Self::Vector(v) => v.mapv_inplace(|x| x * factor),
            Self::Matrix(m) => m.mapv_inplace(|x| x * factor),
        }
    }

    /// Encode as nested JSON lists
    ///
    /// Non-finite entries encode as `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Vector(v) => Value::Array(v.iter().map(|&x| Value::from(x)).collect()),
            Self::Matrix(m) => Value::Array(
                m.rows()
                    .into_iter()
                    .map(|row| Value::Array(row.iter().map(|&x| Value::from(x)).collect()))
                    .collect(),
            ),
        }
    }
}

/// Factor risk/return model
///
/// Cloning deep-copies every array, including the cached derived values.
#[derive(Debug, Clone)]
pub struct Model {
    r: Array1<f64>,
    f: Array2<f64>,
    q: Array1<f64>,
    source: CovarianceSource,
    d: OnceLock<Array2<f64>>,
    di: OnceLock<Array2<f64>>,
    std: OnceLock<Array1<f64>>,
}

impl Model {
    /// Create a model from its components
    ///
    /// # Arguments
    /// * `r` - Expected returns (n)
    /// * `f` - Factor loadings (n x k)
    /// * `q` - Idiosyncratic variances (n)
    /// * `covariance` - Factor covariance or its inverse (k x k)
    pub fn new(
        r: Array1<f64>,
        f: Array2<f64>,
        q: Array1<f64>,
        covariance: Covariance,
    ) -> Result<Self> {
        let n = r.len();
        if f.nrows() != n {
            return Err(ModelError::DimensionMismatch(format!(
                "F has {} rows but r has {} entries",
                f.nrows(),
                n
            )));
        }
        if q.len() != n {
            return Err(ModelError::DimensionMismatch(format!(
                "Q has {} entries but r has {}",
                q.len(),
                n
            )));
        }

        let mut model = Self {
            r,
            f,
            q,
            source: CovarianceSource::Direct,
            d: OnceLock::new(),
            di: OnceLock::new(),
            std: OnceLock::new(),
        };
        match covariance {
            Covariance::Direct(d) => model.set_d(d)?,
            Covariance::Inverse(di) => model.set_di(di)?,
        }
        Ok(model)
    }

    /// Create a model from raw service data
    ///
    /// # Errors
    /// * `ModelError::ConflictingCovariance` if both `D` and `Di` are present
    /// * `ModelError::MissingCovariance` if neither is present
    pub fn from_data(data: ModelData) -> Result<Self> {
        let covariance = match (data.d, data.di) {
            (Some(_), Some(_)) => return Err(ModelError::ConflictingCovariance),
            (None, None) => return Err(ModelError::MissingCovariance),
            (Some(d), None) => Covariance::Direct(to_matrix(&d, "D")?),
            (None, Some(di)) => Covariance::Inverse(to_matrix(&di, "Di")?),
        };

        let f = to_matrix(&data.f, "F")?;
        Self::new(Array1::from(data.r), f, Array1::from(data.q), covariance)
    }

    /// Create a model from a JSON object
    pub fn from_json(value: Value) -> Result<Self> {
        Self::from_data(serde_json::from_value(value)?)
    }

    /// Number of assets
    pub fn n_assets(&self) -> usize {
        self.r.len()
    }

    /// Number of factors
    pub fn n_factors(&self) -> usize {
        self.f.ncols()
    }

    /// Expected returns
    pub const fn r(&self) -> &Array1<f64> {
        &self.r
    }

    /// Factor loadings
    pub const fn f(&self) -> &Array2<f64> {
        &self.f
    }

    /// Idiosyncratic variances
    pub const fn q(&self) -> &Array1<f64> {
        &self.q
    }

    /// Which covariance representation is authoritative
    pub const fn covariance_source(&self) -> CovarianceSource {
        self.source
    }

    /// Factor covariance, inverted from `Di` on first access
    pub fn d(&self) -> Result<&Array2<f64>> {
        if let Some(d) = self.d.get() {
            return Ok(d);
        }
        let di = self.di.get().ok_or(ModelError::MissingCovariance)?;
        let d = linalg::invert_symmetric(di)?;
        Ok(self.d.get_or_init(|| d))
    }

    /// Inverse factor covariance, inverted from `D` on first access
    pub fn di(&self) -> Result<&Array2<f64>> {
        if let Some(di) = self.di.get() {
            return Ok(di);
        }
        let d = self.d.get().ok_or(ModelError::MissingCovariance)?;
        let di = linalg::invert_symmetric(d)?;
        Ok(self.di.get_or_init(|| di))
    }

    /// Per-asset standard deviation: sqrt(Q + diag(F * D * F^T))
    pub fn std(&self) -> Result<&Array1<f64>> {
        if let Some(std) = self.std.get() {
            return Ok(std);
        }
        let fd = self.f.dot(self.d()?);
        let factor_var = (&fd * &self.f).sum_axis(Axis(1));
        let std = (&self.q + &factor_var).mapv(|v| v.max(0.0).sqrt());
        Ok(self.std.get_or_init(|| std))
    }

    /// Replace the factor covariance
    ///
    /// Clears the cached inverse and standard deviation.
    pub fn set_d(&mut self, d: Array2<f64>) -> Result<()> {
        self.check_factor_shape(&d, "D")?;
        self.d = OnceLock::from(d);
        self.di = OnceLock::new();
        self.std = OnceLock::new();
        self.source = CovarianceSource::Direct;
        Ok(())
    }

    /// Replace the inverse factor covariance
    ///
    /// Clears the cached covariance and standard deviation.
    pub fn set_di(&mut self, di: Array2<f64>) -> Result<()> {
        self.check_factor_shape(&di, "Di")?;
        self.di = OnceLock::from(di);
        self.d = OnceLock::new();
        self.std = OnceLock::new();
        self.source = CovarianceSource::Inverse;
        Ok(())
    }

    fn check_factor_shape(&self, matrix: &Array2<f64>, name: &str) -> Result<()> {
        let k = self.n_factors();
        if matrix.dim() != (k, k) {
            return Err(ModelError::DimensionMismatch(format!(
                "{} must be {}x{}, got {}x{}",
                name,
                k,
                k,
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        Ok(())
    }

    /// Value of a single attribute
    pub fn field(&self, field: ModelField) -> Result<FieldValue> {
        Ok(match field {
            ModelField::R => FieldValue::Vector(self.r.clone()),
            ModelField::F => FieldValue::Matrix(self.f.clone()),
            ModelField::Q => FieldValue::Vector(self.q.clone()),
            ModelField::D => FieldValue::Matrix(self.d()?.clone()),
            ModelField::Di => FieldValue::Matrix(self.di()?.clone()),
            ModelField::Std => FieldValue::Vector(self.std()?.clone()),
        })
    }

    /// Export model attributes
    ///
    /// Without `fields` exports `r`, `D`, `F`, `Q` and `std`. With
    /// `normalize`, `Q` and `D` are divided by the largest asset variance
    /// so that the solver sees well-scaled risk terms.
    pub fn to_dict(
        &self,
        fields: Option<&[ModelField]>,
        normalize: bool,
    ) -> Result<Vec<(ModelField, FieldValue)>> {
        const DEFAULT_FIELDS: [ModelField; 5] = [
            ModelField::R,
            ModelField::D,
            ModelField::F,
            ModelField::Q,
            ModelField::Std,
        ];

        let alpha = if normalize { self.normalization()? } else { 1.0 };
        let fields = fields.unwrap_or(&DEFAULT_FIELDS);

        fields
            .iter()
            .map(|&field| {
                let mut value = self.field(field)?;
                if normalize && matches!(field, ModelField::Q | ModelField::D) {
                    value.scale(1.0 / alpha);
                }
                Ok((field, value))
            })
            .collect()
    }

    /// Export model attributes as a JSON object of nested lists
    pub fn to_json(&self, fields: Option<&[ModelField]>, normalize: bool) -> Result<Map<String, Value>> {
        Ok(self
            .to_dict(fields, normalize)?
            .into_iter()
            .map(|(field, value)| (field.name().to_string(), value.to_json()))
            .collect())
    }

    /// Largest per-asset variance, used to rescale risk terms
    fn normalization(&self) -> Result<f64> {
        let max_std = self.std()?.iter().copied().fold(0.0_f64, f64::max);
        let alpha = max_std * max_std;
        Ok(if alpha.is_finite() && alpha > 0.0 { alpha } else { 1.0 })
    }

    /// Expected return and standard deviation of an allocation
    ///
    /// Return is normalized by the sum of `x` and risk by its magnitude,
    /// so the result is invariant under positive rescaling of the
    /// allocation and `std` is never negative.
    ///
    /// # Returns
    /// * (mu, std)
    ///
    /// # Errors
    /// * `ModelError::ZeroAllocation` if `x` sums to zero
    pub fn return_and_variance(&self, x: &Array1<f64>) -> Result<(f64, f64)> {
        if x.len() != self.n_assets() {
            return Err(ModelError::DimensionMismatch(format!(
                "allocation has {} entries, model has {} assets",
                x.len(),
                self.n_assets()
            )));
        }

        let value = x.sum();
        if value == 0.0 {
            return Err(ModelError::ZeroAllocation);
        }
        if value < 0.0 {
            tracing::warn!(total = value, "Total portfolio is negative");
        }

        let mu = x.dot(&self.r) / value;

        // Factor risk: (F^T x)^T D (F^T x)
        let v = self.f.t().dot(x);
        let factor_var = v.dot(&self.d()?.dot(&v));
        // Specific risk: sum(Q_i x_i^2)
        let specific_var = (&self.q * x).dot(x);

        let std = (specific_var + factor_var).sqrt() / value.abs();
        Ok((mu, std))
    }

    /// Closed-form parameters of the unconstrained efficient frontier
    ///
    /// With covariance Σ and B = [r | 1], inverts B^T Σ^-1 B. Assets with
    /// zero risk and zero expected return do not affect the frontier and
    /// are left out before assembling Σ.
    ///
    /// # Arguments
    /// * `x_bar` - Total budget
    ///
    /// # Returns
    /// * (a, mu_star, sigma_0) - curvature, return of the minimum-variance
    ///   vertex and its standard deviation
    pub fn unconstrained_frontier(&self, x_bar: f64) -> Result<(f64, f64, f64)> {
        let std = self.std()?;
        let keep: Vec<usize> = (0..self.n_assets())
            .filter(|&i| !(std[i] == 0.0 && self.r[i] == 0.0))
            .collect();

        let r = self.r.select(Axis(0), &keep);
        let f = self.f.select(Axis(0), &keep);
        let q = self.q.select(Axis(0), &keep);

        let mut sigma = f.dot(self.d()?).dot(&f.t());
        for (i, qi) in q.iter().enumerate() {
            sigma[[i, i]] += qi;
        }

        let m = keep.len();
        let mut b = Array2::<f64>::ones((m, 2));
        b.column_mut(0).assign(&r);

        let bsb = b.t().dot(&linalg::solve(sigma.view(), b.clone())?);
        let bsb_inv = linalg::invert(&bsb)?;

        let a = bsb_inv[[0, 0]];
        let b = -bsb_inv[[0, 1]];
        let c = bsb_inv[[1, 1]];

        let mu_star = b * x_bar / a;
        let sigma_0 = (c - b * b / a).max(0.0).sqrt() * x_bar;
        Ok((a, mu_star, sigma_0))
    }

    /// Is a derived value currently cached
    pub fn is_cached(&self, field: ModelField) -> bool {
        match field {
            ModelField::D => self.d.get().is_some(),
            ModelField::Di => self.di.get().is_some(),
            ModelField::Std => self.std.get().is_some(),
            ModelField::R | ModelField::F | ModelField::Q => true,
        }
    }
}

impl TryFrom<ModelData> for Model {
    type Error = ModelError;

    fn try_from(data: ModelData) -> Result<Self> {
        Self::from_data(data)
    }
}

/// Convert nested rows into a matrix
fn to_matrix(rows: &[Vec<f64>], name: &str) -> Result<Array2<f64>> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if let Some(bad) = rows.iter().position(|row| row.len() != ncols) {
        return Err(ModelError::DimensionMismatch(format!(
            "{} row {} has {} entries, expected {}",
            name,
            bad,
            rows[bad].len(),
            ncols
        )));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|e| ModelError::DimensionMismatch(format!("{}: {}", name, e)))
}
