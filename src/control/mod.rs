//! Control parametrization: from a parameter vector to a time-varying control
//!
//! A parametrization maps normalized time `t ∈ [0, 1]` (0 is the beginning of
//! the time step, 1 its end) and a parameter vector `p` of size `np` to a
//! control value `u` of size `nu`. The Jacobian operators let the integrators
//! pull dynamics and cost derivatives back from control space to parameter
//! space without materializing the Jacobian.

mod poly_one;
mod poly_zero;

pub use poly_one::PolyOne;
pub use poly_zero::PolyZero;

use nalgebra::{DMatrix, DVector};

use crate::error::{check_dim, ModelError};

/// Mapping between control parameters and control values
///
/// All evaluation methods are pure functions of `(t, p)` or `(t, u)`; a
/// parametrization carries no per-call state.
pub trait ControlParametrization: Send + Sync {
    /// Dimension of the control value
    fn nu(&self) -> usize;

    /// Dimension of the parameter vector
    fn np(&self) -> usize;

    /// Rebuild the parametrization for a new control dimension
    fn resize(&mut self, nu: usize);

    /// Control value at time `t`: `u = u(t, p)`
    fn value(&self, t: f64, p: &DVector<f64>, u: &mut DVector<f64>) -> Result<(), ModelError>;

    /// Some parameter vector reproducing `u` at time `t`
    ///
    /// Right-inverse contract: `value(t, value_inv(t, u)) == u` whenever `u`
    /// is achievable at `t`.
    fn value_inv(&self, t: f64, u: &DVector<f64>, p: &mut DVector<f64>) -> Result<(), ModelError>;

    /// Map a control-space box onto a parameter-space box
    ///
    /// Must be monotone-consistent with `value`: any `p ∈ [p_lb, p_ub]`
    /// yields `u(t, p) ∈ [u_lb, u_ub]` for all `t ∈ [0, 1]`.
    fn convert_bounds(
        &self,
        u_lb: &DVector<f64>,
        u_ub: &DVector<f64>,
        p_lb: &mut DVector<f64>,
        p_ub: &mut DVector<f64>,
    ) -> Result<(), ModelError>;

    /// Jacobian of `value` with respect to `p` (`nu × np`)
    fn dvalue(&self, t: f64, p: &DVector<f64>, jac: &mut DMatrix<f64>) -> Result<(), ModelError>;

    /// `out = A · J(t, p)` for an `m × nu` matrix `A`
    fn multiply_by_dvalue(
        &self,
        t: f64,
        p: &DVector<f64>,
        a: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelError>;

    /// `out = J(t, p)ᵀ · A` for an `nu × m` matrix `A`
    fn multiply_dvalue_transpose_by(
        &self,
        t: f64,
        p: &DVector<f64>,
        a: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelError>;

    /// Pull a control-space gradient back to parameter space:
    /// `out = J(t, p)ᵀ · g`
    ///
    /// The default materializes the Jacobian; concrete parametrizations
    /// override it with a matrix-free version.
    fn pullback_gradient(
        &self,
        t: f64,
        p: &DVector<f64>,
        g: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<(), ModelError> {
        check_dim("g", g.len(), self.nu())?;
        check_dim("out", out.len(), self.np())?;
        let mut jac = DMatrix::zeros(self.nu(), self.np());
        self.dvalue(t, p, &mut jac)?;
        out.gemv_tr(1.0, &jac, g, 0.0);
        Ok(())
    }
}
