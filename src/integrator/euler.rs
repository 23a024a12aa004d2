//! Explicit Euler integrated action model

use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;

use super::{static_derivatives, IntegratedActionData, IntegratedActionModel, IntegratorBase};
use crate::control::ControlParametrization;
use crate::differential::DifferentialActionModel;
use crate::error::{check_dim, ModelError};
use crate::state::JacobianOp;

/// Explicit Euler discretization of a differential action model
///
/// Single-stage scheme. With `x = [q; v]` and acceleration `a` from the
/// differential model:
///
/// ```text
/// dx = [v·dt + a·dt²; a·dt]
/// xnext = x ⊕ dx
/// cost  = dt · ℓ(x, u)
/// ```
///
/// A zero time step disables the propagation and turns the model into a pure
/// evaluation node (used for terminal nodes).
///
/// # Note
/// The cheapest scheme per step but only first-order accurate; prefer
/// [`super::Rk2Integrator`] when the dynamics vary noticeably within a step.
pub struct EulerIntegrator {
    base: IntegratorBase,
}

impl EulerIntegrator {
    /// Create an Euler model with the default constant parametrization
    pub fn new(
        differential: Arc<dyn DifferentialActionModel>,
        time_step: f64,
        with_cost_residual: bool,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            base: IntegratorBase::new(differential, None, time_step, with_cost_residual)?,
        })
    }

    /// Create an Euler model with an explicit control parametrization
    pub fn with_control(
        differential: Arc<dyn DifferentialActionModel>,
        control: Box<dyn ControlParametrization>,
        time_step: f64,
        with_cost_residual: bool,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            base: IntegratorBase::new(differential, Some(control), time_step, with_cost_residual)?,
        })
    }
}

impl fmt::Display for EulerIntegrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EulerIntegrator {{dt={}, {}}}",
            self.base.dt(),
            self.base.differential()
        )
    }
}

impl IntegratedActionModel for EulerIntegrator {
    fn base(&self) -> &IntegratorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntegratorBase {
        &mut self.base
    }

    fn n_stages(&self) -> usize {
        1
    }

    fn create_data(&self) -> IntegratedActionData {
        if self.base.np() > self.base.differential().nu() {
            tracing::warn!(
                "a control parametrization larger than PolyZero brings nothing to an Euler scheme"
            );
        }
        IntegratedActionData::new(&self.base, 1)
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
        let dt2 = base.dt2();

        {
            let stage = &mut data.stages[0];
            base.control().value(0.0, p, &mut stage.u)?;
            base.differential().calc(&mut stage.differential, x, &stage.u)?;
            stage.cost = stage.differential.cost;
        }

        let stage = &data.stages[0];
        if base.enable_integration() {
            let a = &stage.differential.xout;
            for i in 0..nv {
                data.dx[i] = x[nx - nv + i] * dt + a[i] * dt2;
                data.dx[nv + i] = a[i] * dt;
            }
            state.integrate(x, &data.dx, &mut data.xnext);
            data.cost = dt * stage.differential.cost;
        } else {
            data.dx.fill(0.0);
            data.xnext.copy_from(x);
            data.cost = stage.differential.cost;
        }

        if base.with_cost_residual() {
            data.r.copy_from(&stage.differential.r);
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
        let dt2 = base.dt2();

        let stage = &mut data.stages[0];
        base.differential()
            .calc_diff(&mut stage.differential, x, &stage.u)?;

        // Fx = [da_dx·dt²; da_dx·dt] with the velocity-to-position coupling
        {
            let mut top = data.fx.rows_mut(0, nv);
            top.copy_from(&stage.differential.fx);
            top *= dt2;
        }
        {
            let mut bottom = data.fx.rows_mut(nv, nv);
            bottom.copy_from(&stage.differential.fx);
            bottom *= dt;
        }
        for i in 0..nv {
            data.fx[(i, nv + i)] += dt;
        }

        // Fu pulled through the parametrization Jacobian
        stage
            .dk_dudiff
            .rows_mut(nv, nv)
            .copy_from(&stage.differential.fu);
        ctrl.multiply_by_dvalue(0.0, p, &stage.dk_dudiff, &mut stage.dk_dp)?;
        {
            let mut top = data.fu.rows_mut(0, nv);
            top.copy_from(&stage.dk_dp.rows(nv, nv));
            top *= dt2;
        }
        {
            let mut bottom = data.fu.rows_mut(nv, nv);
            bottom.copy_from(&stage.dk_dp.rows(nv, nv));
            bottom *= dt;
        }

        // Account for the manifold retraction of the final state
        state.jintegrate_transport(x, &data.dx, &mut data.fx);
        state.jintegrate(x, &data.dx, &mut data.fx, JacobianOp::Addto);
        state.jintegrate_transport(x, &data.dx, &mut data.fu);

        data.lx.copy_from(&stage.differential.lx);
        data.lx *= dt;
        ctrl.pullback_gradient(0.0, p, &stage.differential.lu, &mut data.lu)?;
        data.lu *= dt;
        data.lxx.copy_from(&stage.differential.lxx);
        data.lxx *= dt;
        ctrl.multiply_by_dvalue(0.0, p, &stage.differential.lxu, &mut data.lxu)?;
        data.lxu *= dt;
        ctrl.multiply_by_dvalue(0.0, p, &stage.differential.luu, &mut stage.luu_dp)?;
        ctrl.multiply_dvalue_transpose_by(0.0, p, &stage.luu_dp, &mut data.luu)?;
        data.luu *= dt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differential::LqrDynamics;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn double_integrator_euler(dt: f64) -> EulerIntegrator {
        EulerIntegrator::new(Arc::new(LqrDynamics::double_integrator()), dt, false).unwrap()
    }

    #[test]
    fn test_calc_double_integrator_step() {
        let model = double_integrator_euler(0.1);
        let mut data = model.create_data();
        let x = DVector::zeros(2);
        let p = DVector::from_vec(vec![1.0]);
        model.calc(&mut data, &x, &p).unwrap();
        assert_relative_eq!(data.xnext[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(data.xnext[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(data.cost, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_dt_is_pure_evaluation() {
        let model = double_integrator_euler(0.0);
        let mut data = model.create_data();
        let x = DVector::from_vec(vec![0.2, -0.4]);
        let p = DVector::from_vec(vec![3.0]);
        model.calc(&mut data, &x, &p).unwrap();
        assert_eq!(data.xnext, x);
        assert_relative_eq!(data.cost, 0.5 * 9.0, epsilon = 1e-12);

        model.calc_diff(&mut data, &x, &p).unwrap();
        assert_eq!(data.fx, DMatrix::identity(2, 2));
        assert_eq!(data.fu, DMatrix::zeros(2, 1));
        // Cost derivatives equal the differential model's single evaluation.
        assert_relative_eq!(data.lu[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(data.luu[(0, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_dt_clamped_at_construction() {
        let model = double_integrator_euler(-1.0);
        assert_relative_eq!(model.dt(), 1e-3);
    }

    #[test]
    fn test_set_dt_rejects_negative() {
        let mut model = double_integrator_euler(0.1);
        assert!(matches!(
            model.set_dt(-1.0),
            Err(ModelError::NegativeTimeStep(_))
        ));
        // The failed setter leaves the model untouched.
        assert_relative_eq!(model.dt(), 0.1);
        model.set_dt(0.2).unwrap();
        assert_relative_eq!(model.dt(), 0.2);
    }

    #[test]
    fn test_calc_rejects_wrong_dimensions_without_mutation() {
        let model = double_integrator_euler(0.1);
        let mut data = model.create_data();
        let x_bad = DVector::zeros(3);
        let p = DVector::zeros(1);
        assert!(model.calc(&mut data, &x_bad, &p).is_err());
        assert_eq!(data.xnext, DVector::zeros(2));
        assert_relative_eq!(data.cost, 0.0);
    }

    #[test]
    fn test_check_data_matches_creating_model() {
        let model_a = double_integrator_euler(0.1);
        let model_b = double_integrator_euler(0.1);
        let data_a = model_a.create_data();
        assert!(model_a.check_data(&data_a));
        assert!(!model_b.check_data(&data_a));
    }

    #[test]
    fn test_quasi_static_inverts_parametrization() {
        // xout = v + u: quasi-static control is u = -v.
        let dynamics = LqrDynamics::new(
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
            DMatrix::identity(1, 1),
            DMatrix::zeros(2, 2),
            DMatrix::identity(1, 1),
        )
        .unwrap();
        let model = EulerIntegrator::new(Arc::new(dynamics), 0.1, false).unwrap();
        let mut data = model.create_data();
        let mut p = DVector::zeros(1);
        let x = DVector::from_vec(vec![0.0, 0.5]);
        model.quasi_static(&mut data, &mut p, &x, 100, 1e-9).unwrap();
        assert_relative_eq!(p[0], -0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_residual_passes_through_when_tracked() {
        let model =
            EulerIntegrator::new(Arc::new(LqrDynamics::double_integrator()), 0.1, true).unwrap();
        let mut data = model.create_data();
        let x = DVector::zeros(2);
        let p = DVector::from_vec(vec![1.5]);
        model.calc(&mut data, &x, &p).unwrap();
        assert_eq!(data.r, DVector::from_vec(vec![1.5]));
        assert_eq!(data.r, data.stages()[0].differential.r);
    }

    #[test]
    fn test_residual_untracked_stays_zero() {
        let model = double_integrator_euler(0.1);
        let mut data = model.create_data();
        let x = DVector::zeros(2);
        let p = DVector::from_vec(vec![1.5]);
        model.calc(&mut data, &x, &p).unwrap();
        assert_eq!(data.r, DVector::zeros(1));
    }

    #[test]
    fn test_display_names_scheme_and_dt() {
        let model = double_integrator_euler(0.01);
        let repr = format!("{model}");
        assert!(repr.starts_with("EulerIntegrator {dt=0.01"));
        assert!(repr.contains("LqrDynamics"));
    }
}
