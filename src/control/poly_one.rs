//! First-order (linear) control parametrization

use nalgebra::{DMatrix, DVector};

use super::ControlParametrization;
use crate::error::{check_dim, ModelError};

/// Linear control over the time step: `u(t, p) = (1−t)·p₀ + t·p₁`
///
/// The parameter vector stacks the control at the beginning and at the end
/// of the step, `p = [p₀; p₁]`, so `np == 2·nu`. Because `u(t, p)` is a
/// convex combination for `t ∈ [0, 1]`, duplicating a control-space box into
/// both halves of the parameter box is monotone-consistent with `value`.
#[derive(Debug, Clone)]
pub struct PolyOne {
    nu: usize,
}

impl PolyOne {
    pub fn new(nu: usize) -> Self {
        Self { nu }
    }
}

impl ControlParametrization for PolyOne {
    fn nu(&self) -> usize {
        self.nu
    }

    fn np(&self) -> usize {
        2 * self.nu
    }

    fn resize(&mut self, nu: usize) {
        self.nu = nu;
    }

    fn value(&self, t: f64, p: &DVector<f64>, u: &mut DVector<f64>) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("u", u.len(), self.nu)?;
        let p0 = p.rows(0, self.nu);
        let p1 = p.rows(self.nu, self.nu);
        for i in 0..self.nu {
            u[i] = (1.0 - t) * p0[i] + t * p1[i];
        }
        Ok(())
    }

    fn value_inv(&self, _t: f64, u: &DVector<f64>, p: &mut DVector<f64>) -> Result<(), ModelError> {
        check_dim("u", u.len(), self.nu)?;
        check_dim("p", p.len(), self.np())?;
        // The constant trajectory reproduces u at every t.
        p.rows_mut(0, self.nu).copy_from(u);
        p.rows_mut(self.nu, self.nu).copy_from(u);
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
        p_lb.rows_mut(0, self.nu).copy_from(u_lb);
        p_lb.rows_mut(self.nu, self.nu).copy_from(u_lb);
        p_ub.rows_mut(0, self.nu).copy_from(u_ub);
        p_ub.rows_mut(self.nu, self.nu).copy_from(u_ub);
        Ok(())
    }

    fn dvalue(&self, t: f64, p: &DVector<f64>, jac: &mut DMatrix<f64>) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("jac rows", jac.nrows(), self.nu)?;
        check_dim("jac columns", jac.ncols(), self.np())?;
        jac.fill(0.0);
        for i in 0..self.nu {
            jac[(i, i)] = 1.0 - t;
            jac[(i, self.nu + i)] = t;
        }
        Ok(())
    }

    fn multiply_by_dvalue(
        &self,
        t: f64,
        p: &DVector<f64>,
        a: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("A columns", a.ncols(), self.nu)?;
        check_dim("out rows", out.nrows(), a.nrows())?;
        check_dim("out columns", out.ncols(), self.np())?;
        {
            let mut left = out.columns_mut(0, self.nu);
            left.copy_from(a);
            left *= 1.0 - t;
        }
        {
            let mut right = out.columns_mut(self.nu, self.nu);
            right.copy_from(a);
            right *= t;
        }
        Ok(())
    }

    fn multiply_dvalue_transpose_by(
        &self,
        t: f64,
        p: &DVector<f64>,
        a: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("A rows", a.nrows(), self.nu)?;
        check_dim("out rows", out.nrows(), self.np())?;
        check_dim("out columns", out.ncols(), a.ncols())?;
        {
            let mut top = out.rows_mut(0, self.nu);
            top.copy_from(a);
            top *= 1.0 - t;
        }
        {
            let mut bottom = out.rows_mut(self.nu, self.nu);
            bottom.copy_from(a);
            bottom *= t;
        }
        Ok(())
    }

    fn pullback_gradient(
        &self,
        t: f64,
        p: &DVector<f64>,
        g: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<(), ModelError> {
        check_dim("p", p.len(), self.np())?;
        check_dim("g", g.len(), self.nu)?;
        check_dim("out", out.len(), self.np())?;
        for i in 0..self.nu {
            out[i] = (1.0 - t) * g[i];
            out[self.nu + i] = t * g[i];
        }
        Ok(())
    }
}
