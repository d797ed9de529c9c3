//! Orchestration of one propagation step
//!
//! [`StatePropagator`] owns the validated configuration and the velocity and attitude strategies.
//! It keeps no state between calls: `propagate` is a pure function of the prior state and the
//! measurement batch, so the same propagator can be shared across threads for independent
//! what-if evaluations.
use log::trace;

use crate::config::PropagatorConfig;
use crate::errors::{NavError, Result};
use crate::merge::{
    AttitudeModel, ImuIntegration, PositionWeights, TrustMeasurement, VelocityModel,
    merge_acceleration, merge_position,
};
use crate::{MeasurementBatch, State, earth};

/// Advances a [`State`] by one [`MeasurementBatch`]
#[derive(Debug)]
pub struct StatePropagator {
    gravitational_parameter: f64,
    position_weights: PositionWeights,
    velocity_model: Box<dyn VelocityModel>,
    attitude_model: Box<dyn AttitudeModel>,
}

impl Default for StatePropagator {
    /// Earth gravitation, 1:1 position weights, pure integration and measured attitude
    fn default() -> Self {
        StatePropagator {
            gravitational_parameter: earth::GM,
            position_weights: PositionWeights::default(),
            velocity_model: Box::new(ImuIntegration),
            attitude_model: Box::new(TrustMeasurement),
        }
    }
}

impl StatePropagator {
    /// Build a propagator from a configuration, rejecting invalid configurations.
    ///
    /// # Example
    /// ```rust
    /// use navmerge::{PropagatorConfig, StatePropagator};
    /// let propagator = StatePropagator::new(&PropagatorConfig::default()).unwrap();
    /// ```
    pub fn new(config: &PropagatorConfig) -> Result<Self> {
        Self::with_models(
            config,
            config.velocity_policy.build(),
            config.attitude_policy.build(),
        )
    }

    /// Build a propagator with caller-supplied velocity and attitude strategies.
    ///
    /// The policy selectors in `config` are ignored; the gravitational parameter and position
    /// weights are still validated and used.
    pub fn with_models(
        config: &PropagatorConfig,
        velocity_model: Box<dyn VelocityModel>,
        attitude_model: Box<dyn AttitudeModel>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(StatePropagator {
            gravitational_parameter: config.gravitational_parameter,
            position_weights: config.position_weights,
            velocity_model,
            attitude_model,
        })
    }

    pub fn gravitational_parameter(&self) -> f64 {
        self.gravitational_parameter
    }

    pub fn position_weights(&self) -> &PositionWeights {
        &self.position_weights
    }

    /// Propagate `prior` forward by `batch.dt`.
    ///
    /// Acceleration is merged first (it needs the prior position), then position and velocity
    /// from the merged acceleration; attitude is independent of both.
    ///
    /// # Errors
    /// * [`NavError::InvalidInterval`] if `batch.dt <= 0`.
    /// * [`NavError::MalformedVector`] for non-finite inputs or non-unit quaternions, or if the
    ///   step itself overflows.
    ///
    /// No state is produced on error. A prior position at the origin is not an error; see
    /// [`merge_acceleration`].
    ///
    /// # Example
    /// ```rust
    /// use nalgebra::{UnitQuaternion, Vector3};
    /// use navmerge::{MeasurementBatch, State, StatePropagator};
    /// let propagator = StatePropagator::default();
    /// let prior = State::new(0.0, Vector3::new(6378000.0, 0.0, 0.0), Vector3::zeros(), UnitQuaternion::identity());
    /// let batch = MeasurementBatch::new(
    ///     1.0,
    ///     0.0,
    ///     Vector3::new(6378000.0, 0.0, 0.0),
    ///     Vector3::zeros(),
    ///     Vector3::new(-9.78, 0.0, 0.0),
    ///     Vector3::zeros(),
    ///     UnitQuaternion::identity(),
    /// );
    /// let next = propagator.propagate(&prior, &batch).unwrap();
    /// assert_eq!(next.time, 1.0);
    /// ```
    pub fn propagate(&self, prior: &State, batch: &MeasurementBatch) -> Result<State> {
        batch.validate()?;
        prior.validate()?;

        let dt = batch.dt;
        let delta_theta = batch.delta_theta();

        let accel_merged = merge_acceleration(
            &prior.position,
            &batch.accel_nc,
            &batch.accel_c,
            self.gravitational_parameter,
        );
        let position = merge_position(
            &prior.position,
            &prior.velocity,
            dt,
            &accel_merged,
            &batch.gps,
            batch.altitude,
            &self.position_weights,
        )?;
        let velocity = self
            .velocity_model
            .merge_velocity(&prior.velocity, &accel_merged, batch);
        let attitude =
            self.attitude_model
                .merge_attitude(&prior.attitude, &batch.q_inert_to_body, &delta_theta)?;

        let next = State {
            time: prior.time + dt,
            position,
            velocity,
            attitude,
        };
        if next.validate().is_err() {
            return Err(NavError::malformed(
                "state",
                "propagation produced non-finite values",
            ));
        }
        trace!("a = {:?}, {}", accel_merged.as_slice(), next);
        Ok(next)
    }
}
