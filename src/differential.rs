//! Differential action model: continuous-time dynamics plus running cost
//!
//! The integrators consume this contract through a narrow interface: one
//! evaluation (`calc`), one derivative evaluation (`calc_diff`), a data
//! factory and a quasi-static control solver. [`LqrDynamics`] is a small
//! reference implementation with linear dynamics and quadratic cost, enough
//! to exercise every integrator path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::{DMatrix, DVector};

use crate::error::{check_dim, ModelError};
use crate::state::{StateManifold, VectorState};

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh identity stamp for a newly constructed model
pub(crate) fn next_model_id() -> u64 {
    NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-call record of one continuous-time evaluation
///
/// Holds the dynamics derivative `xout`, the instantaneous cost and residual,
/// and the first/second partials of dynamics and cost with respect to the
/// state tangent (`ndx`) and the control (`nu`). Allocated once by
/// [`DifferentialActionModel::create_data`] and mutated in place.
#[derive(Debug, Clone)]
pub struct DifferentialActionData {
    pub(crate) model_id: u64,
    /// Time-derivative of the velocity block (`nv`)
    pub xout: DVector<f64>,
    /// Instantaneous cost
    pub cost: f64,
    /// Cost residual (`nr`)
    pub r: DVector<f64>,
    /// Dynamics Jacobian w.r.t. the state tangent (`nv × ndx`)
    pub fx: DMatrix<f64>,
    /// Dynamics Jacobian w.r.t. the control (`nv × nu`)
    pub fu: DMatrix<f64>,
    /// Cost gradient w.r.t. the state tangent (`ndx`)
    pub lx: DVector<f64>,
    /// Cost gradient w.r.t. the control (`nu`)
    pub lu: DVector<f64>,
    /// Cost Hessian w.r.t. the state tangent (`ndx × ndx`)
    pub lxx: DMatrix<f64>,
    /// Cross Hessian of the cost (`ndx × nu`)
    pub lxu: DMatrix<f64>,
    /// Cost Hessian w.r.t. the control (`nu × nu`)
    pub luu: DMatrix<f64>,
}

impl DifferentialActionData {
    pub fn new(model_id: u64, nv: usize, ndx: usize, nu: usize, nr: usize) -> Self {
        Self {
            model_id,
            xout: DVector::zeros(nv),
            cost: 0.0,
            r: DVector::zeros(nr),
            fx: DMatrix::zeros(nv, ndx),
            fu: DMatrix::zeros(nv, nu),
            lx: DVector::zeros(ndx),
            lu: DVector::zeros(nu),
            lxx: DMatrix::zeros(ndx, ndx),
            lxu: DMatrix::zeros(ndx, nu),
            luu: DMatrix::zeros(nu, nu),
        }
    }
}

/// Continuous-time dynamics and cost with analytic derivatives
pub trait DifferentialActionModel: fmt::Display + Send + Sync {
    /// State manifold the dynamics evolve on
    fn state(&self) -> &dyn StateManifold;

    /// Dimension of the control
    fn nu(&self) -> usize;

    /// Dimension of the cost residual
    fn nr(&self) -> usize {
        0
    }

    /// Identity stamp used to match data records to their creating model
    fn model_id(&self) -> u64;

    /// Lower control bound (unbounded by default)
    fn u_lb(&self) -> DVector<f64> {
        DVector::from_element(self.nu(), f64::NEG_INFINITY)
    }

    /// Upper control bound (unbounded by default)
    fn u_ub(&self) -> DVector<f64> {
        DVector::from_element(self.nu(), f64::INFINITY)
    }

    /// Evaluate the dynamics derivative and cost at `(x, u)`
    fn calc(
        &self,
        data: &mut DifferentialActionData,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(), ModelError>;

    /// Evaluate the first/second derivatives of dynamics and cost at `(x, u)`
    fn calc_diff(
        &self,
        data: &mut DifferentialActionData,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(), ModelError>;

    /// Allocate a data record sized for this model
    fn create_data(&self) -> DifferentialActionData {
        DifferentialActionData::new(
            self.model_id(),
            self.state().nv(),
            self.state().ndx(),
            self.nu(),
            self.nr(),
        )
    }

    /// Check that `data` was created by this model (identity, not deep
    /// equality)
    fn check_data(&self, data: &DifferentialActionData) -> bool {
        data.model_id == self.model_id()
    }

    /// Compute a control that approximately zeroes the dynamics derivative
    /// at `x`
    fn quasi_static(
        &self,
        data: &mut DifferentialActionData,
        u: &mut DVector<f64>,
        x: &DVector<f64>,
        maxiter: usize,
        tol: f64,
    ) -> Result<(), ModelError>;
}

/// Linear dynamics with quadratic cost
///
/// `xout = A·x + B·u`, `cost = ½ xᵀQx + ½ uᵀRu`. The quasi-static control is
/// the least-squares solution of `B·u = −A·x`. The cost residual reports the
/// control, so `cost == ½|r|²` holds when `Q = 0` and `R = I` (as in
/// [`LqrDynamics::double_integrator`]).
pub struct LqrDynamics {
    state: VectorState,
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    q: DMatrix<f64>,
    r_cost: DMatrix<f64>,
    u_lb: DVector<f64>,
    u_ub: DVector<f64>,
    model_id: u64,
}

impl LqrDynamics {
    /// Build from the dynamics matrices `A` (`nv × nx`), `B` (`nv × nu`) and
    /// the symmetric cost weights `Q` (`ndx × ndx`), `R` (`nu × nu`)
    pub fn new(
        a: DMatrix<f64>,
        b: DMatrix<f64>,
        q: DMatrix<f64>,
        r_cost: DMatrix<f64>,
    ) -> Result<Self, ModelError> {
        let nv = a.nrows();
        let nu = b.ncols();
        let state = VectorState::new(nv);
        check_dim("A columns", a.ncols(), state.nx())?;
        check_dim("B rows", b.nrows(), nv)?;
        check_dim("Q rows", q.nrows(), state.ndx())?;
        check_dim("Q columns", q.ncols(), state.ndx())?;
        check_dim("R rows", r_cost.nrows(), nu)?;
        check_dim("R columns", r_cost.ncols(), nu)?;
        Ok(Self {
            state,
            a,
            b,
            q,
            r_cost,
            u_lb: DVector::from_element(nu, f64::NEG_INFINITY),
            u_ub: DVector::from_element(nu, f64::INFINITY),
            model_id: next_model_id(),
        })
    }

    /// 1-D double integrator: `xout = u`, `cost = ½ u²`
    pub fn double_integrator() -> Self {
        Self::new(
            DMatrix::zeros(1, 2),
            DMatrix::identity(1, 1),
            DMatrix::zeros(2, 2),
            DMatrix::identity(1, 1),
        )
        .expect("double-integrator dimensions are consistent")
    }

    /// Restrict the control box
    pub fn set_control_bounds(&mut self, u_lb: DVector<f64>, u_ub: DVector<f64>) -> Result<(), ModelError> {
        check_dim("u_lb", u_lb.len(), self.b.ncols())?;
        check_dim("u_ub", u_ub.len(), self.b.ncols())?;
        self.u_lb = u_lb;
        self.u_ub = u_ub;
        Ok(())
    }
}

impl fmt::Display for LqrDynamics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LqrDynamics {{nv={}, nu={}}}", self.a.nrows(), self.b.ncols())
    }
}

impl DifferentialActionModel for LqrDynamics {
    fn state(&self) -> &dyn StateManifold {
        &self.state
    }

    fn nu(&self) -> usize {
        self.b.ncols()
    }

    fn nr(&self) -> usize {
        self.b.ncols()
    }

    fn model_id(&self) -> u64 {
        self.model_id
    }

    fn u_lb(&self) -> DVector<f64> {
        self.u_lb.clone()
    }

    fn u_ub(&self) -> DVector<f64> {
        self.u_ub.clone()
    }

    fn calc(
        &self,
        data: &mut DifferentialActionData,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(), ModelError> {
        check_dim("x", x.len(), self.state.nx())?;
        check_dim("u", u.len(), self.nu())?;
        data.xout.gemv(1.0, &self.a, x, 0.0);
        data.xout.gemv(1.0, &self.b, u, 1.0);
        let qx = &self.q * x;
        let ru = &self.r_cost * u;
        data.cost = 0.5 * (x.dot(&qx) + u.dot(&ru));
        data.r.copy_from(u);
        Ok(())
    }

    fn calc_diff(
        &self,
        data: &mut DifferentialActionData,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(), ModelError> {
        check_dim("x", x.len(), self.state.nx())?;
        check_dim("u", u.len(), self.nu())?;
        data.fx.copy_from(&self.a);
        data.fu.copy_from(&self.b);
        data.lx.gemv(1.0, &self.q, x, 0.0);
        data.lu.gemv(1.0, &self.r_cost, u, 0.0);
        data.lxx.copy_from(&self.q);
        data.lxu.fill(0.0);
        data.luu.copy_from(&self.r_cost);
        Ok(())
    }

    fn quasi_static(
        &self,
        _data: &mut DifferentialActionData,
        u: &mut DVector<f64>,
        x: &DVector<f64>,
        _maxiter: usize,
        tol: f64,
    ) -> Result<(), ModelError> {
        check_dim("u", u.len(), self.nu())?;
        check_dim("x", x.len(), self.state.nx())?;
        let rhs = -(&self.a * x);
        let svd = self.b.clone().svd(true, true);
        let sol = svd
            .solve(&rhs, tol.max(1e-12))
            .map_err(|_| ModelError::QuasiStaticFailure)?;
        u.copy_from(&sol);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_double_integrator_calc() {
        let model = LqrDynamics::double_integrator();
        let mut data = model.create_data();
        let x = DVector::zeros(2);
        let u = DVector::from_vec(vec![1.0]);
        model.calc(&mut data, &x, &u).unwrap();
        assert_relative_eq!(data.xout[0], 1.0);
        assert_relative_eq!(data.cost, 0.5);
        // Control residual: cost == ½|r|² for Q = 0, R = I.
        assert_eq!(data.r, u);
    }

    #[test]
    fn test_double_integrator_calc_diff() {
        let model = LqrDynamics::double_integrator();
        let mut data = model.create_data();
        let x = DVector::from_vec(vec![0.3, -0.2]);
        let u = DVector::from_vec(vec![2.0]);
        model.calc_diff(&mut data, &x, &u).unwrap();
        assert_relative_eq!(data.fu[(0, 0)], 1.0);
        assert_relative_eq!(data.lu[0], 2.0);
        assert_relative_eq!(data.luu[(0, 0)], 1.0);
        assert_eq!(data.fx, DMatrix::zeros(1, 2));
    }

    #[test]
    fn test_quasi_static_cancels_drift() {
        // xout = v + u, so the quasi-static control is u = -v.
        let model = LqrDynamics::new(
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
            DMatrix::identity(1, 1),
            DMatrix::zeros(2, 2),
            DMatrix::identity(1, 1),
        )
        .unwrap();
        let mut data = model.create_data();
        let mut u = DVector::zeros(1);
        let x = DVector::from_vec(vec![0.0, 0.7]);
        model.quasi_static(&mut data, &mut u, &x, 100, 1e-9).unwrap();
        assert_relative_eq!(u[0], -0.7, epsilon = 1e-10);
    }

    #[test]
    fn test_check_data_identity() {
        let model_a = LqrDynamics::double_integrator();
        let model_b = LqrDynamics::double_integrator();
        let data_a = model_a.create_data();
        assert!(model_a.check_data(&data_a));
        assert!(!model_b.check_data(&data_a));
    }

    #[test]
    fn test_calc_rejects_wrong_dimensions() {
        let model = LqrDynamics::double_integrator();
        let mut data = model.create_data();
        let x = DVector::zeros(3);
        let u = DVector::zeros(1);
        assert!(matches!(
            model.calc(&mut data, &x, &u),
            Err(ModelError::DimensionMismatch { name: "x", .. })
        ));
    }
}
