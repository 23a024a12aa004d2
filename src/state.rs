//! State-manifold abstraction used by the integrators
//!
//! Integrator code never adds state vectors directly; every state update goes
//! through [`StateManifold::integrate`] and every Jacobian is carried through
//! [`StateManifold::jintegrate`] / [`StateManifold::jintegrate_transport`], so
//! non-Euclidean states (e.g. orientations with a retraction map) work without
//! touching the integration logic.

use nalgebra::{DMatrix, DVector};

/// How a Jacobian contribution is written into its output matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianOp {
    /// Overwrite the output with the Jacobian
    Setto,
    /// Accumulate the Jacobian into the output
    Addto,
}

/// Manifold with a retraction map and derivative-transport operators
///
/// The state lives in a space of dimension `nx` whose tangent space has
/// dimension `ndx`. Second-order systems split the tangent space into
/// position and velocity blocks of size `nv` each.
pub trait StateManifold: Send + Sync {
    /// Dimension of the state representation
    fn nx(&self) -> usize;

    /// Dimension of the tangent space
    fn ndx(&self) -> usize;

    /// Dimension of the velocity block (`ndx == 2 * nv` for second-order
    /// systems)
    fn nv(&self) -> usize;

    /// Neutral element of the manifold
    fn zero(&self) -> DVector<f64>;

    /// Retraction: `out = x ⊕ dx`
    fn integrate(&self, x: &DVector<f64>, dx: &DVector<f64>, out: &mut DVector<f64>);

    /// Jacobian of `integrate` with respect to the base point `x`, written
    /// into `jac` (`ndx × ndx`) according to `op`
    fn jintegrate(&self, x: &DVector<f64>, dx: &DVector<f64>, jac: &mut DMatrix<f64>, op: JacobianOp);

    /// Transport `jac` through the Jacobian of `integrate` with respect to
    /// the increment `dx` (in-place left-multiplication)
    fn jintegrate_transport(&self, x: &DVector<f64>, dx: &DVector<f64>, jac: &mut DMatrix<f64>);
}

/// Second-order Euclidean state `[q; v]` with `nq == nv`
///
/// The retraction is plain vector addition and both Jacobian operators are
/// identity maps.
#[derive(Debug, Clone)]
pub struct VectorState {
    nv: usize,
}

impl VectorState {
    pub fn new(nv: usize) -> Self {
        Self { nv }
    }
}

impl StateManifold for VectorState {
    fn nx(&self) -> usize {
        2 * self.nv
    }

    fn ndx(&self) -> usize {
        2 * self.nv
    }

    fn nv(&self) -> usize {
        self.nv
    }

    fn zero(&self) -> DVector<f64> {
        DVector::zeros(self.nx())
    }

    fn integrate(&self, x: &DVector<f64>, dx: &DVector<f64>, out: &mut DVector<f64>) {
        out.copy_from(x);
        out.axpy(1.0, dx, 1.0);
    }

    fn jintegrate(
        &self,
        _x: &DVector<f64>,
        _dx: &DVector<f64>,
        jac: &mut DMatrix<f64>,
        op: JacobianOp,
    ) {
        match op {
            JacobianOp::Setto => {
                jac.fill(0.0);
                jac.fill_diagonal(1.0);
            }
            JacobianOp::Addto => {
                for i in 0..self.ndx() {
                    jac[(i, i)] += 1.0;
                }
            }
        }
    }

    fn jintegrate_transport(&self, _x: &DVector<f64>, _dx: &DVector<f64>, _jac: &mut DMatrix<f64>) {
        // The increment Jacobian is the identity on a vector space.
    }
}
