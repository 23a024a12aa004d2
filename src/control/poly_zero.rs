//! Zero-order (constant) control parametrization

use nalgebra::{DMatrix, DVector};

use super::ControlParametrization;
use crate::error::{check_dim, ModelError};

/// Constant control over the time step: `u(t, p) = p` for all `t`
///
/// `np == nu` and the Jacobian is the identity, so every pull-back is a
/// plain copy. This is the default parametrization of the integrators.
#[derive(Debug, Clone)]
pub struct PolyZero {
    nu: usize,
}

impl PolyZero {
    pub fn new(nu: usize) -> Self {
        Self { nu }
    }
}

impl ControlParametrization for PolyZero {
    fn nu(&self) -> usize {
        self.nu
    }

    fn np(&self) -> usize {
        self.nu
    }

    fn resize(&mut self, nu: usize) {
        self.nu = nu;
    }

    fn value(&self, _t: f64, p: &DVector<f64>, u: &mut DVector<f64>) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("u", u.len(), self.nu)?;
        u.copy_from(p);
        Ok(())
    }

    fn value_inv(&self, _t: f64, u: &DVector<f64>, p: &mut DVector<f64>) -> Result<(), ModelError> {
        check_dim("u", u.len(), self.nu)?;
        check_dim("p", p.len(), self.np())?;
        p.copy_from(u);
        Ok(())
    }

    fn convert_bounds(
        &self,
        u_lb: &DVector<f64>,
        u_ub: &DVector<f64>,
        p_lb: &mut DVector<f64>,
        p_ub: &mut DVector<f64>,
    ) -> Result<(), ModelError> {
        check_dim("u_lb", u_lb.len(), self.nu)?;
        check_dim("u_ub", u_ub.len(), self.nu)?;
        check_dim("p_lb", p_lb.len(), self.np())?;
        check_dim("p_ub", p_ub.len(), self.np())?;
        p_lb.copy_from(u_lb);
        p_ub.copy_from(u_ub);
        Ok(())
    }

    fn dvalue(&self, _t: f64, p: &DVector<f64>, jac: &mut DMatrix<f64>) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("jac rows", jac.nrows(), self.nu)?;
        check_dim("jac columns", jac.ncols(), self.np())?;
        jac.fill(0.0);
        jac.fill_diagonal(1.0);
        Ok(())
    }

    fn multiply_by_dvalue(
        &self,
        _t: f64,
        p: &DVector<f64>,
        a: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("A columns", a.ncols(), self.nu)?;
        check_dim("out rows", out.nrows(), a.nrows())?;
        check_dim("out columns", out.ncols(), self.np())?;
        out.copy_from(a);
        Ok(())
    }

    fn multiply_dvalue_transpose_by(
        &self,
        _t: f64,
        p: &DVector<f64>,
        a: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("A rows", a.nrows(), self.nu)?;
        check_dim("out rows", out.nrows(), self.np())?;
        check_dim("out columns", out.ncols(), a.ncols())?;
        out.copy_from(a);
        Ok(())
    }

    fn pullback_gradient(
        &self,
        _t: f64,
        p: &DVector<f64>,
        g: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("g", g.len(), self.nu)?;
        check_dim("out", out.len(), self.np())?;
        out.copy_from(g);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_value_is_identity_for_all_t() {
        let ctrl = PolyZero::new(2);
        let p = DVector::from_vec(vec![0.5, -1.5]);
        let mut u = DVector::zeros(2);
        for &t in &[0.0, 0.3, 1.0] {
            ctrl.value(t, &p, &mut u).unwrap();
            assert_relative_eq!(u[0], 0.5);
            assert_relative_eq!(u[1], -1.5);
        }
    }

    #[test]
    fn test_value_inv_roundtrip() {
        let ctrl = PolyZero::new(3);
        let u = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let mut p = DVector::zeros(3);
        let mut u_back = DVector::zeros(3);
        ctrl.value_inv(0.7, &u, &mut p).unwrap();
        ctrl.value(0.7, &p, &mut u_back).unwrap();
        assert_relative_eq!((u - u_back).norm(), 0.0);
    }

    #[test]
    fn test_multiply_ops_match_explicit_jacobian() {
        let ctrl = PolyZero::new(2);
        let p = DVector::zeros(2);
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut jac = DMatrix::zeros(2, 2);
        ctrl.dvalue(0.0, &p, &mut jac).unwrap();

        let mut out = DMatrix::zeros(3, 2);
        ctrl.multiply_by_dvalue(0.0, &p, &a, &mut out).unwrap();
        assert_eq!(out, &a * &jac);

        let at = a.transpose();
        let mut out_t = DMatrix::zeros(2, 3);
        ctrl.multiply_dvalue_transpose_by(0.0, &p, &at, &mut out_t).unwrap();
        assert_eq!(out_t, jac.transpose() * &at);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let ctrl = PolyZero::new(2);
        let p = DVector::zeros(3);
        let mut u = DVector::zeros(2);
        assert!(matches!(
            ctrl.value(0.0, &p, &mut u),
            Err(ModelError::DimensionMismatch { name: "p", .. })
        ));
    }
}
