//! Per-channel mergers used by the state propagator
//!
//! Each merger fuses two estimates of one kinematic quantity by weighted averaging (a complementary
//! blend) rather than with covariance-weighted gains:
//!
//! - acceleration: the accelerometer's non-conservative reading and a gravity-corrected estimate
//! - position: a dead-reckoned position and the GPS/altimeter position
//! - velocity: integrated acceleration, optionally rescaled by an airspeed reading
//! - attitude: the measured attitude, optionally blended with a gyro-propagated attitude
//!
//! Velocity and attitude are strategies behind the [`VelocityModel`] and [`AttitudeModel`] traits so
//! that other sources can be substituted without touching the propagator. [`VelocityPolicy`] and
//! [`AttitudePolicy`] are the serializable selectors used in configuration files.
use std::fmt::Debug;

use log::debug;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::MeasurementBatch;
use crate::earth;
use crate::errors::{NavError, Result};
use crate::linalg::{blend_quaternions, small_angle_quaternion, weighted_average};

/// Fuse the measured non-conservative acceleration with a gravity-corrected estimate.
///
/// The gravity model is evaluated at the prior position, added to `accel_c`, and averaged with
/// `accel_nc`:
///
/// $$
/// a = \tfrac{1}{2} \left( a_{nc} + (a_c + g(p_{prev})) \right)
/// $$
///
/// When `prior_position` is the origin the gravity model is singular. This is a degraded mode,
/// not an error: the reading `accel_nc` is returned unmodified.
///
/// # Example
/// ```rust
/// use nalgebra::Vector3;
/// use navmerge::{earth, merge::merge_acceleration};
/// let a = merge_acceleration(&Vector3::zeros(), &Vector3::new(1.0, 2.0, 3.0), &Vector3::zeros(), earth::GM);
/// assert_eq!(a, Vector3::new(1.0, 2.0, 3.0));
/// ```
pub fn merge_acceleration(
    prior_position: &Vector3<f64>,
    accel_nc: &Vector3<f64>,
    accel_c: &Vector3<f64>,
    gm: f64,
) -> Vector3<f64> {
    match earth::gravitation(prior_position, gm) {
        Ok(accel_gravity) => {
            let accel_nc_calculated = accel_c + accel_gravity;
            0.5 * (accel_nc + accel_nc_calculated)
        }
        Err(_) => {
            debug!("Prior position at origin, using raw non-conservative acceleration");
            *accel_nc
        }
    }
}

/// Weights for the position blend.
///
/// `altitude` and `gps_vertical` weight the two vertical measurements against each other;
/// `dead_reckoned` and `measured` weight the integrated position against the measured one.
/// All default to one (plain means).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionWeights {
    /// Weight of the barometric altitude in the vertical component
    pub altitude: f64,
    /// Weight of the GPS vertical component
    pub gps_vertical: f64,
    /// Weight of the dead-reckoned position
    pub dead_reckoned: f64,
    /// Weight of the externally measured (GPS + altitude) position
    pub measured: f64,
}
impl Default for PositionWeights {
    fn default() -> Self {
        PositionWeights {
            altitude: 1.0,
            gps_vertical: 1.0,
            dead_reckoned: 1.0,
            measured: 1.0,
        }
    }
}
impl PositionWeights {
    /// Check that each pair of weights is finite, non-negative, and has a non-zero sum
    pub fn validate(&self) -> Result<()> {
        check_weight_pair("altitude/gps_vertical", self.altitude, self.gps_vertical)?;
        check_weight_pair("dead_reckoned/measured", self.dead_reckoned, self.measured)
    }
}

pub(crate) fn check_weight_pair(name: &str, a: f64, b: f64) -> Result<()> {
    let total = a + b;
    if !a.is_finite() || !b.is_finite() || a < 0.0 || b < 0.0 || !total.is_finite() || total <= 0.0
    {
        return Err(NavError::Configuration(format!(
            "{name} weights must be finite, non-negative, not both zero and have a finite sum (got {a}, {b})"
        )));
    }
    Ok(())
}

/// Fuse a dead-reckoned position with the GPS and altimeter measurements.
///
/// The dead-reckoned position uses second order integration,
/// $p_{calc} = p_{prev} + v_{prev} t + \tfrac{1}{2} a t^2$. The measured position takes the GPS
/// horizontal components as-is and a weighted average of `altitude` and the GPS vertical component.
/// The two positions are then averaged with the `dead_reckoned`/`measured` weights.
///
/// # Errors
/// [`NavError::Configuration`] if `weights` cannot form an average (see [`PositionWeights::validate`]).
pub fn merge_position(
    prior_position: &Vector3<f64>,
    prior_velocity: &Vector3<f64>,
    dt: f64,
    accel_merged: &Vector3<f64>,
    gps: &Vector3<f64>,
    altitude: f64,
    weights: &PositionWeights,
) -> Result<Vector3<f64>> {
    let p_calc = prior_position + prior_velocity * dt + 0.5 * accel_merged * dt.powi(2);
    // TODO: derive the vertical weights from sensor error specs once the altimeter is characterized
    let z_merged = weighted_average(&[altitude, gps[2]], &[weights.altitude, weights.gps_vertical])
        .ok_or_else(|| NavError::Configuration("invalid altitude/GPS vertical weights".into()))?;
    let p_measured = Vector3::new(gps[0], gps[1], z_merged);
    weighted_average(
        &[p_calc, p_measured],
        &[weights.dead_reckoned, weights.measured],
    )
    .ok_or_else(|| NavError::Configuration("invalid dead-reckoned/measured weights".into()))
}

/// Strategy for producing the new velocity from the merged acceleration
///
/// Implementations receive the whole measurement batch so additional velocity sources (airspeed,
/// optical flow, ...) can be read without changing the propagator.
pub trait VelocityModel: Debug + Send + Sync {
    fn merge_velocity(
        &self,
        prior_velocity: &Vector3<f64>,
        accel_merged: &Vector3<f64>,
        batch: &MeasurementBatch,
    ) -> Vector3<f64>;
}

/// Single-source Euler integration, $v = v_{prev} + a t$
#[derive(Clone, Copy, Debug, Default)]
pub struct ImuIntegration;

impl VelocityModel for ImuIntegration {
    fn merge_velocity(
        &self,
        prior_velocity: &Vector3<f64>,
        accel_merged: &Vector3<f64>,
        batch: &MeasurementBatch,
    ) -> Vector3<f64> {
        prior_velocity + accel_merged * batch.dt
    }
}

/// Integrated velocity with its magnitude blended against an airspeed reading.
///
/// The direction comes from integration; the speed is the weighted average of the integrated
/// speed and the airspeed. Without an airspeed reading in the batch, or when the integrated
/// velocity is zero (no direction to scale), this falls back to [`ImuIntegration`].
#[derive(Clone, Copy, Debug)]
pub struct AirspeedBlend {
    pub imu_weight: f64,
    pub airspeed_weight: f64,
}

impl VelocityModel for AirspeedBlend {
    fn merge_velocity(
        &self,
        prior_velocity: &Vector3<f64>,
        accel_merged: &Vector3<f64>,
        batch: &MeasurementBatch,
    ) -> Vector3<f64> {
        let v_new = ImuIntegration.merge_velocity(prior_velocity, accel_merged, batch);
        let speed = v_new.norm();
        let Some(airspeed) = batch.airspeed else {
            return v_new;
        };
        if speed == 0.0 {
            return v_new;
        }
        match weighted_average(&[speed, airspeed], &[self.imu_weight, self.airspeed_weight]) {
            Some(speed_est) => v_new * (speed_est / speed),
            None => v_new,
        }
    }
}

/// Order in which the gyro delta rotation is composed with the prior attitude
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionOrder {
    /// $q_{prev} \otimes \delta q$
    #[default]
    PriorThenDelta,
    /// $\delta q \otimes q_{prev}$
    DeltaThenPrior,
}

/// Strategy for producing the new attitude
pub trait AttitudeModel: Debug + Send + Sync {
    /// # Arguments
    /// * `prior_attitude` - Attitude of the previous state.
    /// * `current_attitude` - Independently measured attitude for this cycle.
    /// * `delta_theta` - Angular rate integrated over the interval (rad).
    fn merge_attitude(
        &self,
        prior_attitude: &UnitQuaternion<f64>,
        current_attitude: &UnitQuaternion<f64>,
        delta_theta: &Vector3<f64>,
    ) -> Result<UnitQuaternion<f64>>;
}

/// Use the measured attitude as-is
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustMeasurement;

impl AttitudeModel for TrustMeasurement {
    fn merge_attitude(
        &self,
        _prior_attitude: &UnitQuaternion<f64>,
        current_attitude: &UnitQuaternion<f64>,
        _delta_theta: &Vector3<f64>,
    ) -> Result<UnitQuaternion<f64>> {
        Ok(*current_attitude)
    }
}

/// Propagate the prior attitude with a small-angle gyro rotation and blend 50/50 with the
/// measured attitude.
///
/// Not validated against flight data, and the correct composition order for the sensor's
/// quaternion convention has not been confirmed. Select the order explicitly with
/// [`CompositionOrder`].
#[derive(Clone, Copy, Debug, Default)]
pub struct GyroBlend {
    pub composition: CompositionOrder,
}

impl AttitudeModel for GyroBlend {
    fn merge_attitude(
        &self,
        prior_attitude: &UnitQuaternion<f64>,
        current_attitude: &UnitQuaternion<f64>,
        delta_theta: &Vector3<f64>,
    ) -> Result<UnitQuaternion<f64>> {
        let dq = small_angle_quaternion(delta_theta);
        let propagated = match self.composition {
            CompositionOrder::PriorThenDelta => prior_attitude * dq,
            CompositionOrder::DeltaThenPrior => dq * prior_attitude,
        };
        blend_quaternions(current_attitude, &propagated, 1.0, 1.0)
    }
}

/// Serializable selector for the velocity strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VelocityPolicy {
    #[default]
    ImuIntegration,
    AirspeedBlend {
        imu_weight: f64,
        airspeed_weight: f64,
    },
}
impl VelocityPolicy {
    pub fn validate(&self) -> Result<()> {
        match self {
            VelocityPolicy::ImuIntegration => Ok(()),
            VelocityPolicy::AirspeedBlend {
                imu_weight,
                airspeed_weight,
            } => check_weight_pair("imu/airspeed", *imu_weight, *airspeed_weight),
        }
    }
    pub fn build(&self) -> Box<dyn VelocityModel> {
        match *self {
            VelocityPolicy::ImuIntegration => Box::new(ImuIntegration),
            VelocityPolicy::AirspeedBlend {
                imu_weight,
                airspeed_weight,
            } => Box::new(AirspeedBlend {
                imu_weight,
                airspeed_weight,
            }),
        }
    }
}

/// Serializable selector for the attitude strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttitudePolicy {
    /// Trust the measured attitude exclusively
    #[default]
    TrustMeasurement,
    /// Blend with the gyro-propagated attitude (unverified)
    GyroBlend {
        #[serde(default)]
        composition: CompositionOrder,
    },
}
impl AttitudePolicy {
    pub fn build(&self) -> Box<dyn AttitudeModel> {
        match *self {
            AttitudePolicy::TrustMeasurement => Box::new(TrustMeasurement),
            AttitudePolicy::GyroBlend { composition } => Box::new(GyroBlend { composition }),
        }
    }
}
