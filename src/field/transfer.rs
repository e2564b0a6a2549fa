use nalgebra::Vector3;
use num_complex::Complex64;

/// A spectral mode as seen by a transfer function.
#[derive(Debug, Clone, Copy)]
pub struct Wavevector {
    pub k: Vector3<f64>,
    /// Whether the mode sits on the Nyquist plane of each axis.
    pub nyquist: [bool; 3],
}

impl Wavevector {
    pub fn norm_squared(&self) -> f64 {
        self.k.norm_squared()
    }
}

/// Multiplier applied to every spectral mode.
pub trait TransferFunction: Sync {
    fn transfer(&self, mode: &Wavevector) -> Complex64;
}

impl<F> TransferFunction for F
where
    F: Fn(&Wavevector) -> Complex64 + Sync,
{
    fn transfer(&self, mode: &Wavevector) -> Complex64 {
        self(mode)
    }
}

/// Low-pass smoothing kernel `H(k) = exp(-σ²|k|²/2)`.
#[derive(Debug, Clone, Copy)]
pub struct GaussianFilter {
    pub sigma: f64,
}

impl GaussianFilter {
    pub fn new(sigma: f64) -> Self {
        GaussianFilter { sigma }
    }

    pub fn value(&self, mode: &Wavevector) -> f64 {
        (-0.5 * self.sigma * self.sigma * mode.norm_squared()).exp()
    }
}

impl TransferFunction for GaussianFilter {
    fn transfer(&self, mode: &Wavevector) -> Complex64 {
        Complex64::new(self.value(mode), 0.0)
    }
}

/// Spectral `-∂/∂x_d`, i.e. multiplication by `-i k_d`.
///
/// The Nyquist mode of the differentiated axis has no real-valued
/// derivative and is dropped.
#[derive(Debug, Clone, Copy)]
pub struct NegativeGradient {
    pub axis: usize,
}

impl TransferFunction for NegativeGradient {
    fn transfer(&self, mode: &Wavevector) -> Complex64 {
        if mode.nyquist[self.axis] {
            return Complex64::new(0.0, 0.0);
        }
        Complex64::new(0.0, -mode.k[self.axis])
    }
}

/// Virial of the Gaussian kernel relative to an already filtered field:
/// `(k_d ∂H/∂k_d) / H = -σ² k_d²`, i.e. `σ² ∂²/∂x_d²` in real space.
#[derive(Debug, Clone, Copy)]
pub struct VirialTransfer {
    pub filter: GaussianFilter,
    pub axis: usize,
}

impl TransferFunction for VirialTransfer {
    fn transfer(&self, mode: &Wavevector) -> Complex64 {
        let kd = mode.k[self.axis];
        let sigma = self.filter.sigma;
        Complex64::new(-sigma * sigma * kd * kd, 0.0)
    }
}
