use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};

/// How the kernel bandwidth (gamma) is derived from the training matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// `1 / n_features`
    Auto,
    /// `1 / (n_features * Var(X))`, variance over every entry of the matrix.
    Scale,
    Fixed(f64),
}

impl Bandwidth {
    pub fn resolve(&self, n_features: usize, variance: f64) -> Result<f64> {
        let gamma = match *self {
            Bandwidth::Auto => 1.0 / n_features as f64,
            Bandwidth::Scale => 1.0 / (n_features as f64 * variance),
            Bandwidth::Fixed(gamma) => gamma,
        };

        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(DetectorError::Fit(format!(
                "kernel bandwidth resolved to {} ({:?}, variance {})",
                gamma, self, variance
            )));
        }

        Ok(gamma)
    }
}

/// Kernel as requested in configuration, before the bandwidth is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelSpec {
    Rbf { bandwidth: Bandwidth },
    Linear,
    Poly { degree: u32, bandwidth: Bandwidth, coef0: f64 },
    Sigmoid { bandwidth: Bandwidth, coef0: f64 },
}

impl Default for KernelSpec {
    fn default() -> Self {
        KernelSpec::Rbf {
            bandwidth: Bandwidth::Auto,
        }
    }
}

impl KernelSpec {
    pub fn resolve(&self, n_features: usize, variance: f64) -> Result<Kernel> {
        let kernel = match *self {
            KernelSpec::Rbf { bandwidth } => Kernel::Rbf {
                gamma: bandwidth.resolve(n_features, variance)?,
            },
            KernelSpec::Linear => Kernel::Linear,
            KernelSpec::Poly {
                degree,
                bandwidth,
                coef0,
            } => {
                if degree == 0 || i32::try_from(degree).is_err() {
                    return Err(DetectorError::InvalidParameter(format!(
                        "polynomial degree must be between 1 and {}, got {}",
                        i32::MAX,
                        degree
                    )));
                }
                Kernel::Poly {
                    gamma: bandwidth.resolve(n_features, variance)?,
                    coef0,
                    degree,
                }
            }
            KernelSpec::Sigmoid { bandwidth, coef0 } => Kernel::Sigmoid {
                gamma: bandwidth.resolve(n_features, variance)?,
                coef0,
            },
        };

        Ok(kernel)
    }
}

/// Kernel with every parameter fixed; this is what a fitted model stores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kernel {
    Rbf { gamma: f64 },
    Linear,
    Poly { gamma: f64, coef0: f64, degree: u32 },
    Sigmoid { gamma: f64, coef0: f64 },
}

impl Kernel {
    pub fn eval(&self, a: &[f64], b: &[f64]) -> f64 {
        match *self {
            Kernel::Rbf { gamma } => (-gamma * squared_distance(a, b)).exp(),
            Kernel::Linear => dot(a, b),
            Kernel::Poly {
                gamma,
                coef0,
                degree,
            } => (gamma * dot(a, b) + coef0).powi(degree as i32),
            Kernel::Sigmoid { gamma, coef0 } => (gamma * dot(a, b) + coef0).tanh(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Rbf { .. } => "rbf",
            Kernel::Linear => "linear",
            Kernel::Poly { .. } => "poly",
            Kernel::Sigmoid { .. } => "sigmoid",
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rbf_is_one_on_diagonal_and_decays() {
        let kernel = Kernel::Rbf { gamma: 0.5 };
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.0, 5.0];

        assert_eq!(kernel.eval(&a, &a), 1.0);
        assert!((kernel.eval(&a, &b) - (-2.0f64).exp()).abs() < 1e-12);
        assert_eq!(kernel.eval(&a, &b), kernel.eval(&b, &a));
    }

    #[test]
    fn test_bandwidth_resolution() {
        assert_eq!(Bandwidth::Auto.resolve(4, 9.0).unwrap(), 0.25);
        assert_eq!(Bandwidth::Scale.resolve(4, 2.0).unwrap(), 0.125);
        assert_eq!(Bandwidth::Fixed(3.0).resolve(4, 2.0).unwrap(), 3.0);
        assert!(Bandwidth::Scale.resolve(4, 0.0).is_err());
        assert!(Bandwidth::Fixed(-1.0).resolve(4, 1.0).is_err());
    }

    #[test]
    fn test_default_spec_is_rbf_auto() {
        let kernel = KernelSpec::default().resolve(10, 0.5).unwrap();
        assert_eq!(kernel, Kernel::Rbf { gamma: 0.1 });

        let scale = KernelSpec::Rbf {
            bandwidth: Bandwidth::Scale,
        };
        assert_eq!(scale.resolve(10, 0.5).unwrap(), Kernel::Rbf { gamma: 0.2 });
    }

    #[test]
    fn test_poly_degree_bounds() {
        let poly = |degree| KernelSpec::Poly {
            degree,
            bandwidth: Bandwidth::Auto,
            coef0: 1.0,
        };

        assert!(matches!(
            poly(0).resolve(4, 1.0).unwrap_err(),
            DetectorError::InvalidParameter(_)
        ));
        assert!(matches!(
            poly(u32::MAX).resolve(4, 1.0).unwrap_err(),
            DetectorError::InvalidParameter(_)
        ));
        assert!(poly(3).resolve(4, 1.0).is_ok());
    }

    #[test]
    fn test_spec_json_shape() {
        let spec: KernelSpec =
            serde_json::from_str(r#"{"type":"rbf","bandwidth":{"fixed":0.01}}"#).unwrap();
        assert_eq!(
            spec,
            KernelSpec::Rbf {
                bandwidth: Bandwidth::Fixed(0.01)
            }
        );
    }
}
