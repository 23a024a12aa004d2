//! Second-order Runge-Kutta integrated action model

use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;

use super::{static_derivatives, IntegratedActionData, IntegratedActionModel, IntegratorBase};
use crate::control::ControlParametrization;
use crate::differential::DifferentialActionModel;
use crate::error::{check_dim, ModelError};
use crate::state::JacobianOp;

/// Runge-Kutta 2 discretization of a differential action model
///
/// Two-stage midpoint scheme with stage times `c = [0, 0.5]`:
///
/// ```text
/// k₀ = [v(x); a(x, u(0, p))]
/// y₁ = x ⊕ (0.5·dt·k₀)
/// k₁ = [v(y₁); a(y₁, u(0.5, p))]
/// xnext = x ⊕ (dt·k₁)
/// cost  = dt · ℓ(y₁, u(0.5, p))
/// ```
///
/// Only the midpoint stage contributes to the cost (midpoint quadrature).
/// `calc_diff` carries every stage-1 partial through the intermediate state
/// `y₁` with the chain rule, nesting the control-parametrization pull-back
/// inside the stage-to-stage transport.
///
/// # Characteristics
/// - Order: 2
/// - Stages: 2
/// - Explicit, fixed timestep
pub struct Rk2Integrator {
    base: IntegratorBase,
    rk_c: [f64; 2],
}

impl Rk2Integrator {
    /// Create an RK2 model with the default constant parametrization
    pub fn new(
        differential: Arc<dyn DifferentialActionModel>,
        time_step: f64,
        with_cost_residual: bool,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            base: IntegratorBase::new(differential, None, time_step, with_cost_residual)?,
            rk_c: [0.0, 0.5],
        })
    }

    /// Create an RK2 model with an explicit control parametrization
    pub fn with_control(
        differential: Arc<dyn DifferentialActionModel>,
        control: Box<dyn ControlParametrization>,
        time_step: f64,
        with_cost_residual: bool,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            base: IntegratorBase::new(differential, Some(control), time_step, with_cost_residual)?,
            rk_c: [0.0, 0.5],
        })
    }
}

impl fmt::Display for Rk2Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rk2Integrator {{dt={}, {}}}",
            self.base.dt(),
            self.base.differential()
        )
    }
}

impl IntegratedActionModel for Rk2Integrator {
    fn base(&self) -> &IntegratorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntegratorBase {
        &mut self.base
    }

    fn n_stages(&self) -> usize {
        2
    }

    fn calc(
        &self,
        data: &mut IntegratedActionData,
        x: &DVector<f64>,
        p: &DVector<f64>,
    ) -> Result<(), ModelError> {
        let base = &self.base;
        check_dim("x", x.len(), base.nx())?;
        check_dim("p", p.len(), base.np())?;

        let state = base.differential().state();
        let nv = state.nv();
        let nx = state.nx();
        let dt = base.dt();

        {
            let s0 = &mut data.stages[0];
            base.control().value(self.rk_c[0], p, &mut s0.u)?;
            base.differential().calc(&mut s0.differential, x, &s0.u)?;
            s0.cost = s0.differential.cost;
        }

        if base.enable_integration() {
            {
                let s0 = &mut data.stages[0];
                s0.y.copy_from(x);
                for i in 0..nv {
                    s0.k[i] = x[nx - nv + i];
                    s0.k[nv + i] = s0.differential.xout[i];
                }
            }
            let (head, tail) = data.stages.split_at_mut(1);
            let s0 = &head[0];
            let s1 = &mut tail[0];

            s1.dx_stage.copy_from(&s0.k);
            s1.dx_stage *= self.rk_c[1] * dt;
            state.integrate(x, &s1.dx_stage, &mut s1.y);
            base.control().value(self.rk_c[1], p, &mut s1.u)?;
            base.differential().calc(&mut s1.differential, &s1.y, &s1.u)?;
            for i in 0..nv {
                s1.k[i] = s1.y[nx - nv + i];
                s1.k[nv + i] = s1.differential.xout[i];
            }
            s1.cost = s1.differential.cost;

            data.dx.copy_from(&s1.k);
            data.dx *= dt;
            state.integrate(x, &data.dx, &mut data.xnext);
            data.cost = dt * s1.cost;
        } else {
            data.dx.fill(0.0);
            data.xnext.copy_from(x);
            data.cost = data.stages[0].differential.cost;
        }

        if base.with_cost_residual() {
            data.r.copy_from(&data.stages[0].differential.r);
        }
        Ok(())
    }

    fn calc_diff(
        &self,
        data: &mut IntegratedActionData,
        x: &DVector<f64>,
        p: &DVector<f64>,
    ) -> Result<(), ModelError> {
        self.calc(data, x, p)?;

        let base = &self.base;
        if !base.enable_integration() {
            return static_derivatives(base, data, x, p);
        }

        let state = base.differential().state();
        let ctrl = base.control();
        let nv = state.nv();
        let dt = base.dt();
        let h = self.rk_c[1] * dt;
        let t1 = self.rk_c[1];

        // Stage 0: partials at (x, p)
        {
            let s0 = &mut data.stages[0];
            base.differential()
                .calc_diff(&mut s0.differential, x, &s0.u)?;
            s0.dk_dy.rows_mut(nv, nv).copy_from(&s0.differential.fx);
            s0.dk_dx.copy_from(&s0.dk_dy);
            s0.dk_dudiff.rows_mut(nv, nv).copy_from(&s0.differential.fu);
            ctrl.multiply_by_dvalue(0.0, p, &s0.dk_dudiff, &mut s0.dk_dp)?;

            s0.dl_dx.copy_from(&s0.differential.lx);
            ctrl.pullback_gradient(0.0, p, &s0.differential.lu, &mut s0.dl_dp)?;
            s0.ddl_ddx.copy_from(&s0.differential.lxx);
            ctrl.multiply_by_dvalue(0.0, p, &s0.differential.luu, &mut s0.luu_dp)?;
            ctrl.multiply_dvalue_transpose_by(0.0, p, &s0.luu_dp, &mut s0.ddl_ddp)?;
            ctrl.multiply_by_dvalue(0.0, p, &s0.differential.lxu, &mut s0.ddl_dxdp)?;
        }

        // Stage 1: partials at (y₁, p), chained through dy₁/dx and dy₁/dp
        {
            let (head, tail) = data.stages.split_at_mut(1);
            let s0 = &head[0];
            let s1 = &mut tail[0];

            base.differential()
                .calc_diff(&mut s1.differential, &s1.y, &s1.u)?;
            s1.dk_dy.rows_mut(nv, nv).copy_from(&s1.differential.fx);

            s1.dy_dx.copy_from(&s0.dk_dx);
            s1.dy_dx *= h;
            state.jintegrate_transport(x, &s1.dx_stage, &mut s1.dy_dx);
            state.jintegrate(x, &s1.dx_stage, &mut s1.dy_dx, JacobianOp::Addto);
            s1.dk_dx.gemm(1.0, &s1.dk_dy, &s1.dy_dx, 0.0);

            s1.dy_dp.copy_from(&s0.dk_dp);
            s1.dy_dp *= h;
            state.jintegrate_transport(x, &s1.dx_stage, &mut s1.dy_dp);
            s1.dk_dp.gemm(1.0, &s1.dk_dy, &s1.dy_dp, 0.0);
            s1.dk_dudiff.rows_mut(nv, nv).copy_from(&s1.differential.fu);
            ctrl.multiply_by_dvalue(t1, p, &s1.dk_dudiff, &mut s1.df_dp)?;
            s1.dk_dp += &s1.df_dp;

            s1.dl_dx.gemv_tr(1.0, &s1.dy_dx, &s1.differential.lx, 0.0);
            ctrl.pullback_gradient(t1, p, &s1.differential.lu, &mut s1.dl_dp)?;
            s1.dl_dp.gemv_tr(1.0, &s1.dy_dp, &s1.differential.lx, 1.0);

            s1.lxx_dy_dx.gemm(1.0, &s1.differential.lxx, &s1.dy_dx, 0.0);
            s1.ddl_ddx.gemm_tr(1.0, &s1.dy_dx, &s1.lxx_dy_dx, 0.0);

            ctrl.multiply_by_dvalue(t1, p, &s1.differential.lxu, &mut s1.lxu_dp)?;
            s1.luu_partial.gemm_tr(1.0, &s1.lxu_dp, &s1.dy_dp, 0.0);
            s1.lxx_dy_dp.gemm(1.0, &s1.differential.lxx, &s1.dy_dp, 0.0);
            ctrl.multiply_by_dvalue(t1, p, &s1.differential.luu, &mut s1.luu_dp)?;
            ctrl.multiply_dvalue_transpose_by(t1, p, &s1.luu_dp, &mut s1.ddl_ddp)?;
            s1.ddl_ddp.gemm_tr(1.0, &s1.dy_dp, &s1.lxx_dy_dp, 1.0);
            for i in 0..s1.luu_partial.nrows() {
                for j in 0..s1.luu_partial.ncols() {
                    s1.ddl_ddp[(i, j)] += s1.luu_partial[(i, j)] + s1.luu_partial[(j, i)];
                }
            }

            s1.lxu_pull.gemm_tr(1.0, &s1.dy_dx, &s1.differential.lxu, 0.0);
            ctrl.multiply_by_dvalue(t1, p, &s1.lxu_pull, &mut s1.ddl_dxdp)?;
            s1.ddl_dxdp.gemm_tr(1.0, &s1.dy_dx, &s1.lxx_dy_dp, 1.0);
        }

        // The step outputs are dt times the composed stage-1 quantities,
        // transported through the final retraction.
        {
            let s1 = &data.stages[1];
            data.fx.copy_from(&s1.dk_dx);
            data.fx *= dt;
            data.fu.copy_from(&s1.dk_dp);
            data.fu *= dt;
            data.lx.copy_from(&s1.dl_dx);
            data.lx *= dt;
            data.lu.copy_from(&s1.dl_dp);
            data.lu *= dt;
            data.lxx.copy_from(&s1.ddl_ddx);
            data.lxx *= dt;
            data.luu.copy_from(&s1.ddl_ddp);
            data.luu *= dt;
            data.lxu.copy_from(&s1.ddl_dxdp);
            data.lxu *= dt;
        }
        state.jintegrate_transport(x, &data.dx, &mut data.fx);
        state.jintegrate(x, &data.dx, &mut data.fx, JacobianOp::Addto);
        state.jintegrate_transport(x, &data.dx, &mut data.fu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::PolyOne;
    use crate::differential::LqrDynamics;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn double_integrator_rk2(dt: f64) -> Rk2Integrator {
        Rk2Integrator::new(Arc::new(LqrDynamics::double_integrator()), dt, false).unwrap()
    }

    #[test]
    fn test_calc_double_integrator_step() {
        let model = double_integrator_rk2(0.1);
        let mut data = model.create_data();
        let x = DVector::zeros(2);
        let p = DVector::from_vec(vec![1.0]);
        model.calc(&mut data, &x, &p).unwrap();
        // Midpoint velocity 0.05 drives the position update.
        assert_relative_eq!(data.xnext[0], 0.005, epsilon = 1e-12);
        assert_relative_eq!(data.xnext[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(data.cost, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_only_midpoint_cost_contributes() {
        // Position-weighted cost: stage 0 sits at q=1, the midpoint moves.
        let dynamics = LqrDynamics::new(
            DMatrix::zeros(1, 2),
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            DMatrix::zeros(1, 1),
        )
        .unwrap();
        let model = Rk2Integrator::new(Arc::new(dynamics), 0.1, false).unwrap();
        let mut data = model.create_data();
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let p = DVector::zeros(1);
        model.calc(&mut data, &x, &p).unwrap();
        // y1 = [1 + 0.05*2, 2] = [1.1, 2], cost = dt * 0.5*(1.1² + 2²)
        assert_relative_eq!(data.cost, 0.1 * 0.5 * (1.1f64.powi(2) + 4.0), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_dt_is_pure_evaluation() {
        let model = double_integrator_rk2(0.0);
        let mut data = model.create_data();
        let x = DVector::from_vec(vec![0.1, 0.2]);
        let p = DVector::from_vec(vec![-2.0]);
        model.calc(&mut data, &x, &p).unwrap();
        assert_eq!(data.xnext, x);
        assert_relative_eq!(data.cost, 2.0, epsilon = 1e-12);

        model.calc_diff(&mut data, &x, &p).unwrap();
        assert_eq!(data.fx, DMatrix::identity(2, 2));
        assert_eq!(data.fu, DMatrix::zeros(2, 1));
        assert_relative_eq!(data.lu[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_dt_clamped_set_dt_strict() {
        let mut model = double_integrator_rk2(-0.5);
        assert_relative_eq!(model.dt(), 1e-3);
        assert!(model.set_dt(-0.5).is_err());
        model.set_dt(0.0).unwrap();
        assert_relative_eq!(model.dt(), 0.0);
    }

    #[test]
    fn test_check_data_rejects_foreign_and_euler_data() {
        let model = double_integrator_rk2(0.1);
        let other = double_integrator_rk2(0.1);
        let euler = crate::integrator::EulerIntegrator::new(
            Arc::new(LqrDynamics::double_integrator()),
            0.1,
            false,
        )
        .unwrap();
        let data = model.create_data();
        assert!(model.check_data(&data));
        assert!(!other.check_data(&data));
        // An Euler model expects a single stage.
        assert!(!euler.check_data(&data));
    }

    #[test]
    fn test_with_poly_one_parameter_dimension() {
        let model = Rk2Integrator::with_control(
            Arc::new(LqrDynamics::double_integrator()),
            Box::new(PolyOne::new(1)),
            0.1,
            false,
        )
        .unwrap();
        let mut data = model.create_data();
        let x = DVector::zeros(2);
        // Constant trajectory through a PolyOne parameter vector matches the
        // PolyZero step.
        let p = DVector::from_vec(vec![1.0, 1.0]);
        model.calc(&mut data, &x, &p).unwrap();
        assert_relative_eq!(data.xnext[0], 0.005, epsilon = 1e-12);
        assert_relative_eq!(data.xnext[1], 0.1, epsilon = 1e-12);
        assert_eq!(data.fu.ncols(), 2);
    }

    #[test]
    fn test_residual_comes_from_first_stage() {
        let model = Rk2Integrator::with_control(
            Arc::new(LqrDynamics::double_integrator()),
            Box::new(PolyOne::new(1)),
            0.1,
            true,
        )
        .unwrap();
        let mut data = model.create_data();
        let x = DVector::zeros(2);
        // u(0) = 1 while the midpoint control is 2.
        let p = DVector::from_vec(vec![1.0, 3.0]);
        model.calc(&mut data, &x, &p).unwrap();
        assert_eq!(data.r, DVector::from_vec(vec![1.0]));
    }

    #[test]
    fn test_display_names_scheme_and_dt() {
        let model = double_integrator_rk2(0.05);
        let repr = format!("{model}");
        assert!(repr.starts_with("Rk2Integrator {dt=0.05"));
    }
}
