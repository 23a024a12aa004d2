//! Numerical integration layer for continuous-time optimal control
//!
//! This crate turns a continuous-time differential action model (state
//! derivative, cost rate and their analytical derivatives) into the
//! discrete-time action model a trajectory optimizer consumes. It provides:
//!
//! - [`integrator::EulerIntegrator`] and [`integrator::Rk2Integrator`], fixed
//!   step explicit schemes that propagate states, costs and first/second-order
//!   derivatives over one time step
//! - [`control::ControlParametrization`] with the [`control::PolyZero`]
//!   (constant) and [`control::PolyOne`] (linear) parametrizations of the
//!   intra-step control trajectory
//! - [`state::StateManifold`], the retraction and Jacobian-transport contract
//!   the integrators use so derivatives stay valid on non-Euclidean state
//!   spaces
//! - [`differential::DifferentialActionModel`] with
//!   [`differential::LqrDynamics`] as a reference implementation
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use nalgebra::DVector;
//! use trajint::prelude::*;
//!
//! let dynamics = Arc::new(LqrDynamics::double_integrator());
//! let model = EulerIntegrator::new(dynamics, 0.1, false)?;
//! let mut data = model.create_data();
//!
//! let x = DVector::zeros(2);
//! let p = DVector::from_vec(vec![1.0]);
//! model.calc(&mut data, &x, &p)?;
//! assert!((data.xnext[1] - 0.1).abs() < 1e-12);
//! # Ok::<(), trajint::ModelError>(())
//! ```

pub mod control;
pub mod differential;
pub mod error;
pub mod integrator;
pub mod state;

pub use error::ModelError;

/// Convenient re-export of the commonly used types
pub mod prelude {
    pub use crate::control::{ControlParametrization, PolyOne, PolyZero};
    pub use crate::differential::{
        DifferentialActionData, DifferentialActionModel, LqrDynamics,
    };
    pub use crate::error::ModelError;
    pub use crate::integrator::{
        EulerIntegrator, IntegratedActionData, IntegratedActionModel, Rk2Integrator,
    };
    pub use crate::state::{JacobianOp, StateManifold, VectorState};
}
