//! Discrete-time integrated action models
//!
//! An integrated action model wraps a continuous-time differential action
//! model with a fixed-step integration scheme and a control parametrization.
//! Provides:
//! - [`EulerIntegrator`]: explicit Euler, single stage
//! - [`Rk2Integrator`]: second-order Runge-Kutta, two stages with an
//!   intermediate chain rule
//!
//! Both implement the common [`IntegratedActionModel`] contract consumed by a
//! trajectory optimizer: `calc` propagates the state and cost over one time
//! step, `calc_diff` propagates the first/second-order derivatives of both
//! through the integration scheme, the manifold retraction and the control
//! parametrization.

mod euler;
mod rk2;

pub use euler::EulerIntegrator;
pub use rk2::Rk2Integrator;

use std::fmt;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::control::{ControlParametrization, PolyZero};
use crate::differential::{DifferentialActionData, DifferentialActionModel};
use crate::error::{check_dim, ModelError};
use crate::state::JacobianOp;

/// Fallback time step used when a constructor receives a negative `dt`
pub const DEFAULT_TIME_STEP: f64 = 1e-3;

/// Shared configuration of an integrated action model
///
/// Owns the control parametrization exclusively and shares the differential
/// model (several integrators may wrap the same continuous dynamics, e.g. in
/// multiple-shooting transcriptions).
pub struct IntegratorBase {
    differential: Arc<dyn DifferentialActionModel>,
    control: Box<dyn ControlParametrization>,
    time_step: f64,
    time_step2: f64,
    with_cost_residual: bool,
    enable_integration: bool,
    p_lb: DVector<f64>,
    p_ub: DVector<f64>,
    p_zero: DVector<f64>,
}

impl IntegratorBase {
    /// Assemble the configuration; `control` defaults to [`PolyZero`]
    ///
    /// A negative `time_step` is clamped to [`DEFAULT_TIME_STEP`] with a
    /// warning; the explicit setter [`IntegratorBase::set_dt`] rejects it
    /// instead. Fails when the parametrization rejects the differential
    /// model's bound shapes.
    pub fn new(
        differential: Arc<dyn DifferentialActionModel>,
        control: Option<Box<dyn ControlParametrization>>,
        time_step: f64,
        with_cost_residual: bool,
    ) -> Result<Self, ModelError> {
        let mut control: Box<dyn ControlParametrization> =
            control.unwrap_or_else(|| Box::new(PolyZero::new(differential.nu())));
        if control.nu() != differential.nu() {
            control.resize(differential.nu());
        }
        let mut base = Self {
            differential,
            control,
            time_step,
            time_step2: 0.0,
            with_cost_residual,
            enable_integration: true,
            p_lb: DVector::zeros(0),
            p_ub: DVector::zeros(0),
            p_zero: DVector::zeros(0),
        };
        base.init()?;
        Ok(base)
    }

    fn init(&mut self) -> Result<(), ModelError> {
        if self.time_step < 0.0 {
            tracing::warn!(dt = self.time_step, "dt should be positive, set to 1e-3");
            self.time_step = DEFAULT_TIME_STEP;
        }
        self.time_step2 = self.time_step * self.time_step;
        self.enable_integration = self.time_step != 0.0;
        self.refresh_control_derived()
    }

    fn refresh_control_derived(&mut self) -> Result<(), ModelError> {
        let np = self.control.np();
        self.p_lb = DVector::zeros(np);
        self.p_ub = DVector::zeros(np);
        self.control.convert_bounds(
            &self.differential.u_lb(),
            &self.differential.u_ub(),
            &mut self.p_lb,
            &mut self.p_ub,
        )?;
        self.p_zero = DVector::zeros(np);
        Ok(())
    }

    /// Current time step
    pub fn dt(&self) -> f64 {
        self.time_step
    }

    pub(crate) fn dt2(&self) -> f64 {
        self.time_step2
    }

    /// Set the time step; negative values are an invalid argument here
    pub fn set_dt(&mut self, dt: f64) -> Result<(), ModelError> {
        if dt < 0.0 {
            return Err(ModelError::NegativeTimeStep(dt));
        }
        self.time_step = dt;
        self.time_step2 = dt * dt;
        self.enable_integration = dt != 0.0;
        Ok(())
    }

    /// Shared continuous-time model
    pub fn differential(&self) -> &Arc<dyn DifferentialActionModel> {
        &self.differential
    }

    /// Swap the continuous-time model, resizing the parametrization and
    /// re-deriving bounds and the neutral control when dimensions change
    pub fn set_differential(
        &mut self,
        model: Arc<dyn DifferentialActionModel>,
    ) -> Result<(), ModelError> {
        if self.control.nu() != model.nu() {
            self.control.resize(model.nu());
        }
        self.differential = model;
        self.refresh_control_derived()
    }

    /// Control parametrization
    pub fn control(&self) -> &dyn ControlParametrization {
        self.control.as_ref()
    }

    /// Dimension of the parameter vector accepted by `calc`/`calc_diff`
    pub fn np(&self) -> usize {
        self.control.np()
    }

    pub(crate) fn nx(&self) -> usize {
        self.differential.state().nx()
    }

    pub(crate) fn ndx(&self) -> usize {
        self.differential.state().ndx()
    }

    /// Parameter-space lower bound derived from the differential model's
    /// control bounds
    pub fn p_lb(&self) -> &DVector<f64> {
        &self.p_lb
    }

    /// Parameter-space upper bound
    pub fn p_ub(&self) -> &DVector<f64> {
        &self.p_ub
    }

    /// Neutral parameter vector
    pub fn p_zero(&self) -> &DVector<f64> {
        &self.p_zero
    }

    pub(crate) fn enable_integration(&self) -> bool {
        self.enable_integration
    }

    pub(crate) fn with_cost_residual(&self) -> bool {
        self.with_cost_residual
    }
}

/// Per-stage scratch buffers of an [`IntegratedActionData`]
///
/// One record per evaluation point of the scheme. All buffers are sized once
/// at creation and mutated in place; `p` denotes the parameter vector, `u`
/// the control value fed to the differential model.
pub struct StageData {
    /// Data record of the differential model at this stage
    pub differential: DifferentialActionData,
    /// Stage control value (`nu`)
    pub u: DVector<f64>,
    /// Stage state (`nx`)
    pub y: DVector<f64>,
    /// Stage state derivative `[v; a]` (`ndx`)
    pub k: DVector<f64>,
    /// Tangent increment from the step's base point to this stage (`ndx`)
    pub dx_stage: DVector<f64>,
    /// Stage cost integrand
    pub cost: f64,
    pub(crate) dk_dy: DMatrix<f64>,
    pub(crate) dk_dx: DMatrix<f64>,
    pub(crate) dk_dudiff: DMatrix<f64>,
    pub(crate) dk_dp: DMatrix<f64>,
    pub(crate) df_dp: DMatrix<f64>,
    pub(crate) dy_dx: DMatrix<f64>,
    pub(crate) dy_dp: DMatrix<f64>,
    pub(crate) dl_dx: DVector<f64>,
    pub(crate) dl_dp: DVector<f64>,
    pub(crate) ddl_ddx: DMatrix<f64>,
    pub(crate) ddl_ddp: DMatrix<f64>,
    pub(crate) ddl_dxdp: DMatrix<f64>,
    pub(crate) luu_dp: DMatrix<f64>,
    pub(crate) lxu_dp: DMatrix<f64>,
    pub(crate) luu_partial: DMatrix<f64>,
    pub(crate) lxx_dy_dx: DMatrix<f64>,
    pub(crate) lxx_dy_dp: DMatrix<f64>,
    pub(crate) lxu_pull: DMatrix<f64>,
}

impl StageData {
    fn new(base: &IntegratorBase) -> Self {
        let state = base.differential.state();
        let (nx, ndx, nv) = (state.nx(), state.ndx(), state.nv());
        let nu = base.control.nu();
        let np = base.control.np();
        let mut dk_dy = DMatrix::zeros(ndx, ndx);
        // The velocity block of k is the state's own velocity.
        for i in 0..nv {
            dk_dy[(i, nv + i)] = 1.0;
        }
        Self {
            differential: base.differential.create_data(),
            u: DVector::zeros(nu),
            y: DVector::zeros(nx),
            k: DVector::zeros(ndx),
            dx_stage: DVector::zeros(ndx),
            cost: 0.0,
            dk_dy,
            dk_dx: DMatrix::zeros(ndx, ndx),
            dk_dudiff: DMatrix::zeros(ndx, nu),
            dk_dp: DMatrix::zeros(ndx, np),
            df_dp: DMatrix::zeros(ndx, np),
            dy_dx: DMatrix::zeros(ndx, ndx),
            dy_dp: DMatrix::zeros(ndx, np),
            dl_dx: DVector::zeros(ndx),
            dl_dp: DVector::zeros(np),
            ddl_ddx: DMatrix::zeros(ndx, ndx),
            ddl_ddp: DMatrix::zeros(np, np),
            ddl_dxdp: DMatrix::zeros(ndx, np),
            luu_dp: DMatrix::zeros(nu, np),
            lxu_dp: DMatrix::zeros(ndx, np),
            luu_partial: DMatrix::zeros(np, np),
            lxx_dy_dx: DMatrix::zeros(ndx, ndx),
            lxx_dy_dp: DMatrix::zeros(ndx, np),
            lxu_pull: DMatrix::zeros(ndx, nu),
        }
    }
}

/// Per-call scratch and output record of an integrated action model
///
/// Allocated once by [`IntegratedActionModel::create_data`] and reused across
/// solver iterations; `calc`/`calc_diff` mutate it in place. Never share one
/// record between concurrent calls.
pub struct IntegratedActionData {
    pub(crate) stages: Vec<StageData>,
    /// Tangent increment of the full step (`ndx`)
    pub dx: DVector<f64>,
    /// Next state (`nx`)
    pub xnext: DVector<f64>,
    /// Discrete cost of the step
    pub cost: f64,
    /// Cost residual passed through from the differential model (`nr`)
    pub r: DVector<f64>,
    /// State transition Jacobian w.r.t. the state tangent (`ndx × ndx`)
    pub fx: DMatrix<f64>,
    /// State transition Jacobian w.r.t. the parameters (`ndx × np`)
    pub fu: DMatrix<f64>,
    /// Cost gradient w.r.t. the state tangent (`ndx`)
    pub lx: DVector<f64>,
    /// Cost gradient w.r.t. the parameters (`np`)
    pub lu: DVector<f64>,
    /// Cost Hessian w.r.t. the state tangent (`ndx × ndx`)
    pub lxx: DMatrix<f64>,
    /// Cross Hessian of the cost (`ndx × np`)
    pub lxu: DMatrix<f64>,
    /// Cost Hessian w.r.t. the parameters (`np × np`)
    pub luu: DMatrix<f64>,
}

impl IntegratedActionData {
    fn new(base: &IntegratorBase, n_stages: usize) -> Self {
        let (nx, ndx) = (base.nx(), base.ndx());
        let np = base.np();
        let nr = base.differential.nr();
        Self {
            stages: (0..n_stages).map(|_| StageData::new(base)).collect(),
            dx: DVector::zeros(ndx),
            xnext: DVector::zeros(nx),
            cost: 0.0,
            r: DVector::zeros(nr),
            fx: DMatrix::zeros(ndx, ndx),
            fu: DMatrix::zeros(ndx, np),
            lx: DVector::zeros(ndx),
            lu: DVector::zeros(np),
            lxx: DMatrix::zeros(ndx, ndx),
            lxu: DMatrix::zeros(ndx, np),
            luu: DMatrix::zeros(np, np),
        }
    }

    /// Stage records of the underlying scheme
    pub fn stages(&self) -> &[StageData] {
        &self.stages
    }
}

/// Discrete-time action model obtained by numerical integration
pub trait IntegratedActionModel: fmt::Display {
    /// Shared configuration
    fn base(&self) -> &IntegratorBase;

    /// Mutable access to the shared configuration
    fn base_mut(&mut self) -> &mut IntegratorBase;

    /// Number of evaluation points of the scheme
    fn n_stages(&self) -> usize;

    /// Integrate the state and cost over one time step
    fn calc(
        &self,
        data: &mut IntegratedActionData,
        x: &DVector<f64>,
        p: &DVector<f64>,
    ) -> Result<(), ModelError>;

    /// Propagate the first/second-order derivatives through the step
    ///
    /// Recomputes the forward pass, so it is correct without a preceding
    /// `calc` on the same data record.
    fn calc_diff(
        &self,
        data: &mut IntegratedActionData,
        x: &DVector<f64>,
        p: &DVector<f64>,
    ) -> Result<(), ModelError>;

    /// Allocate a data record sized for this model
    fn create_data(&self) -> IntegratedActionData {
        IntegratedActionData::new(self.base(), self.n_stages())
    }

    /// Check that `data` was created by a model with the same configuration
    fn check_data(&self, data: &IntegratedActionData) -> bool {
        data.stages.len() == self.n_stages()
            && data
                .stages
                .iter()
                .all(|stage| self.base().differential().check_data(&stage.differential))
    }

    /// Compute the parameters of a quasi-static control at `x`
    ///
    /// Delegates to the differential model's own quasi-static solver, then
    /// inverts the result through the control parametrization.
    fn quasi_static(
        &self,
        data: &mut IntegratedActionData,
        p: &mut DVector<f64>,
        x: &DVector<f64>,
        maxiter: usize,
        tol: f64,
    ) -> Result<(), ModelError> {
        let base = self.base();
        check_dim("p", p.len(), base.np())?;
        check_dim("x", x.len(), base.nx())?;
        let mut uc = DVector::zeros(base.control().nu());
        base.differential()
            .quasi_static(&mut data.stages[0].differential, &mut uc, x, maxiter, tol)?;
        base.control().value_inv(0.0, &uc, p)
    }

    /// Current time step
    fn dt(&self) -> f64 {
        self.base().dt()
    }

    /// Set the time step (strict: negative values error)
    fn set_dt(&mut self, dt: f64) -> Result<(), ModelError> {
        self.base_mut().set_dt(dt)
    }

    /// Shared continuous-time model
    fn differential(&self) -> &Arc<dyn DifferentialActionModel> {
        self.base().differential()
    }

    /// Swap the continuous-time model
    fn set_differential(
        &mut self,
        model: Arc<dyn DifferentialActionModel>,
    ) -> Result<(), ModelError> {
        self.base_mut().set_differential(model)
    }

    /// Control parametrization
    fn control(&self) -> &dyn ControlParametrization {
        self.base().control()
    }
}

/// Derivatives of the pure-evaluation branch (`time_step == 0`)
///
/// The transition Jacobian degrades to the manifold's identity-like map, the
/// parameter Jacobian to zero, and the cost derivatives to the differential
/// model's own, pulled through the parametrization Jacobian so shapes stay
/// consistent when `np != nu`.
pub(crate) fn static_derivatives(
    base: &IntegratorBase,
    data: &mut IntegratedActionData,
    x: &DVector<f64>,
    p: &DVector<f64>,
) -> Result<(), ModelError> {
    let state = base.differential().state();
    let ctrl = base.control();
    let stage = &mut data.stages[0];
    base.differential()
        .calc_diff(&mut stage.differential, x, &stage.u)?;
    state.jintegrate(x, &data.dx, &mut data.fx, JacobianOp::Setto);
    data.fu.fill(0.0);
    data.lx.copy_from(&stage.differential.lx);
    ctrl.pullback_gradient(0.0, p, &stage.differential.lu, &mut data.lu)?;
    data.lxx.copy_from(&stage.differential.lxx);
    ctrl.multiply_by_dvalue(0.0, p, &stage.differential.lxu, &mut data.lxu)?;
    ctrl.multiply_by_dvalue(0.0, p, &stage.differential.luu, &mut stage.luu_dp)?;
    ctrl.multiply_dvalue_transpose_by(0.0, p, &stage.luu_dp, &mut data.luu)?;
    Ok(())
}
