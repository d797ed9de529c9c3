//! Single-step navigation state propagation by sensor blending
//!
//! This crate advances a vehicle's kinematic state (time, position, velocity, attitude) by one sensor
//! interval using a batch of heterogeneous readings: accelerometer, gyroscope, GPS, barometric
//! altitude, and an attitude estimate. It is meant to run once per sensor cycle on the flight
//! computer of a small autonomous vehicle (sounding rocket, drone). It does not implement a
//! stochastic filter; there is no covariance, no Kalman gain and no outlier rejection. Instead each
//! quantity is fused by deterministic weighted averaging (a complementary blend) and physics-based
//! re-derivation, which is cheap and more robust than trusting any single sensor.
//!
//! The crate is built on [`nalgebra`](https://crates.io/crates/nalgebra) for the vector and
//! quaternion types. Everything else (configuration files, CSV replay, the command line tool) is
//! auxiliary I/O around the propagation step.
//!
//! ## Crate overview
//!
//! - [earth]: Earth constants and the central-body gravitation model.
//! - [linalg]: Weighted averages and quaternion helpers shared by the mergers.
//! - [merge]: The acceleration, position, velocity and attitude mergers.
//! - [propagator]: [`propagator::StatePropagator`], which orchestrates the mergers.
//! - [config]: [`config::PropagatorConfig`] and its JSON/YAML/TOML file handling.
//! - [errors]: [`errors::NavError`].
//! - [sim]: CSV replay of logged sensor data through the propagator.
//!
//! ## Coordinate and state definitions
//!
//! Positions and velocities are Cartesian vectors in an Earth-centered frame (meters, m/s).
//! Attitude is a unit quaternion stored and exchanged scalar-first, $[w, x, y, z]$, and is the
//! inertial-to-body rotation reported by the attitude sensor. The crate does not convert between
//! conventions; callers must keep the convention of their attitude source.
//!
//! ## Propagation step
//!
//! Given the prior state $(t, p, v, q)$ and a measurement batch over interval $\Delta t$:
//!
//! 1. $\delta\theta = \omega \Delta t$
//! 2. $a = \tfrac{1}{2}\left(a_{nc} + a_c + g(p)\right)$, or $a_{nc}$ when $p = 0$
//! 3. $p^+ = \text{blend}\left(p + v \Delta t + \tfrac{1}{2} a \Delta t^2,\ [gps_x, gps_y, \text{blend}(h, gps_z)]\right)$
//! 4. $v^+ = v + a \Delta t$
//! 5. $q^+ = q_{meas}$ (or a blend with the gyro-propagated attitude when configured)
//! 6. $t^+ = t + \Delta t$
//!
//! The accelerometer convention at the boundary: `accel_nc` is the non-conservative (specific
//! force, gravity-free) acceleration in the same frame as position; `accel_c` is the conservative
//! reference that is cross-checked against the gravitation model.
pub mod config;
pub mod earth;
pub mod errors;
pub mod linalg;
pub mod merge;
pub mod propagator;
pub mod sim;

use nalgebra::{UnitQuaternion, Vector3};

use std::convert::{From, TryFrom};
use std::fmt::{self, Display};

use crate::errors::{NavError, Result};
use crate::linalg::{
    check_finite, check_unit, quaternion_from_slice, quaternion_to_array, vector_from_slice,
};

pub use crate::config::PropagatorConfig;
pub use crate::propagator::StatePropagator;

/// Estimated kinematics of the vehicle at a point in time.
///
/// States are plain values: the propagator reads the prior state and returns a new one, it never
/// mutates its input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct State {
    /// Time in seconds
    pub time: f64,
    /// Earth-centered position in meters
    pub position: Vector3<f64>,
    /// Velocity in m/s, same frame as position
    pub velocity: Vector3<f64>,
    /// Inertial-to-body attitude
    pub attitude: UnitQuaternion<f64>,
}
impl Default for State {
    fn default() -> Self {
        State {
            time: 0.0,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            attitude: UnitQuaternion::identity(),
        }
    }
}
impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [w, x, y, z] = quaternion_to_array(&self.attitude);
        write!(
            f,
            "State {{ t: {:.3} s, p: [{:.3}, {:.3}, {:.3}] m, v: [{:.3}, {:.3}, {:.3}] m/s, q: [{:.4}, {:.4}, {:.4}, {:.4}] }}",
            self.time,
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            w,
            x,
            y,
            z
        )
    }
}
impl State {
    pub fn new(
        time: f64,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        attitude: UnitQuaternion<f64>,
    ) -> State {
        State {
            time,
            position,
            velocity,
            attitude,
        }
    }
    /// Check that every field is finite and the attitude is unit length
    pub fn validate(&self) -> Result<()> {
        if !self.time.is_finite() {
            return Err(NavError::malformed("time", "time is not finite"));
        }
        check_finite(&self.position, "position")?;
        check_finite(&self.velocity, "velocity")?;
        check_unit(&self.attitude, "attitude")
    }
}
impl TryFrom<&[f64]> for State {
    type Error = NavError;
    /// Build a state from `[time, px, py, pz, vx, vy, vz, qw, qx, qy, qz]`.
    ///
    /// The quaternion is normalized; one with near-zero norm is rejected.
    fn try_from(slice: &[f64]) -> Result<Self> {
        if slice.len() != 11 {
            return Err(NavError::malformed(
                "state",
                format!("expected 11 values, got {}", slice.len()),
            ));
        }
        if !slice[0].is_finite() {
            return Err(NavError::malformed("time", "time is not finite"));
        }
        Ok(State {
            time: slice[0],
            position: vector_from_slice(&slice[1..4], "position")?,
            velocity: vector_from_slice(&slice[4..7], "velocity")?,
            attitude: quaternion_from_slice(&slice[7..11], "attitude")?,
        })
    }
}
impl TryFrom<Vec<f64>> for State {
    type Error = NavError;
    fn try_from(vec: Vec<f64>) -> Result<Self> {
        Self::try_from(vec.as_slice())
    }
}
impl From<&State> for Vec<f64> {
    /// Converts a state to `[time, px, py, pz, vx, vy, vz, qw, qx, qy, qz]`.
    fn from(state: &State) -> Self {
        let mut out = Vec::with_capacity(11);
        out.push(state.time);
        out.extend(state.position.iter());
        out.extend(state.velocity.iter());
        out.extend(quaternion_to_array(&state.attitude));
        out
    }
}
impl From<State> for Vec<f64> {
    fn from(state: State) -> Self {
        (&state).into()
    }
}

/// One cycle of sensor readings, all covering the same interval `dt` since the prior state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurementBatch {
    /// Time since the prior state in seconds, must be > 0
    pub dt: f64,
    /// Independent vertical measurement (barometric altitude) in meters
    pub altitude: f64,
    /// GPS position in meters
    pub gps: Vector3<f64>,
    /// Body angular rate in rad/s
    pub angular_velocity: Vector3<f64>,
    /// Non-conservative (gravity-free) acceleration in m/s^2
    pub accel_nc: Vector3<f64>,
    /// Conservative acceleration reference in m/s^2
    pub accel_c: Vector3<f64>,
    /// Measured inertial-to-body attitude
    pub q_inert_to_body: UnitQuaternion<f64>,
    /// Airspeed in m/s, if the vehicle carries an airspeed sensor
    pub airspeed: Option<f64>,
}
impl Default for MeasurementBatch {
    fn default() -> Self {
        MeasurementBatch {
            dt: 0.0,
            altitude: 0.0,
            gps: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            accel_nc: Vector3::zeros(),
            accel_c: Vector3::zeros(),
            q_inert_to_body: UnitQuaternion::identity(),
            airspeed: None,
        }
    }
}
impl Display for MeasurementBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MeasurementBatch {{ dt: {:.4} s, alt: {:.2} m, gps: [{:.2}, {:.2}, {:.2}], gyro: [{:.4}, {:.4}, {:.4}], accel_nc: [{:.4}, {:.4}, {:.4}], accel_c: [{:.4}, {:.4}, {:.4}] }}",
            self.dt,
            self.altitude,
            self.gps[0],
            self.gps[1],
            self.gps[2],
            self.angular_velocity[0],
            self.angular_velocity[1],
            self.angular_velocity[2],
            self.accel_nc[0],
            self.accel_nc[1],
            self.accel_nc[2],
            self.accel_c[0],
            self.accel_c[1],
            self.accel_c[2]
        )
    }
}
impl MeasurementBatch {
    /// Create a batch without an airspeed reading
    pub fn new(
        dt: f64,
        altitude: f64,
        gps: Vector3<f64>,
        angular_velocity: Vector3<f64>,
        accel_nc: Vector3<f64>,
        accel_c: Vector3<f64>,
        q_inert_to_body: UnitQuaternion<f64>,
    ) -> MeasurementBatch {
        MeasurementBatch {
            dt,
            altitude,
            gps,
            angular_velocity,
            accel_nc,
            accel_c,
            q_inert_to_body,
            airspeed: None,
        }
    }
    pub fn with_airspeed(mut self, airspeed: f64) -> MeasurementBatch {
        self.airspeed = Some(airspeed);
        self
    }
    /// Angular rate integrated over the interval, $\delta\theta = \omega \Delta t$
    pub fn delta_theta(&self) -> Vector3<f64> {
        self.angular_velocity * self.dt
    }
    /// Reject batches that would make the propagation step meaningless.
    ///
    /// # Errors
    /// * [`NavError::InvalidInterval`] if `dt` is not finite or not strictly positive.
    /// * [`NavError::MalformedVector`] for non-finite readings or a non-unit attitude.
    pub fn validate(&self) -> Result<()> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(NavError::InvalidInterval { dt: self.dt });
        }
        if !self.altitude.is_finite() {
            return Err(NavError::malformed("altitude", "altitude is not finite"));
        }
        check_finite(&self.gps, "gps")?;
        check_finite(&self.angular_velocity, "angular_velocity")?;
        check_finite(&self.accel_nc, "accel_nc")?;
        check_finite(&self.accel_c, "accel_c")?;
        check_unit(&self.q_inert_to_body, "q_inert_to_body")?;
        if let Some(airspeed) = self.airspeed {
            if !airspeed.is_finite() {
                return Err(NavError::malformed("airspeed", "airspeed is not finite"));
            }
            if airspeed < 0.0 {
                return Err(NavError::malformed(
                    "airspeed",
                    format!("airspeed must be non-negative, got {airspeed}"),
                ));
            }
        }
        Ok(())
    }
}
impl TryFrom<&[f64]> for MeasurementBatch {
    type Error = NavError;
    /// Build a batch from
    /// `[dt, altitude, gps(3), angular_velocity(3), accel_nc(3), accel_c(3), q_inert_to_body(4)]`
    /// with an optional trailing airspeed value (18 or 19 values).
    fn try_from(slice: &[f64]) -> Result<Self> {
        if slice.len() != 18 && slice.len() != 19 {
            return Err(NavError::malformed(
                "measurements",
                format!("expected 18 or 19 values, got {}", slice.len()),
            ));
        }
        Ok(MeasurementBatch {
            dt: slice[0],
            altitude: slice[1],
            gps: vector_from_slice(&slice[2..5], "gps")?,
            angular_velocity: vector_from_slice(&slice[5..8], "angular_velocity")?,
            accel_nc: vector_from_slice(&slice[8..11], "accel_nc")?,
            accel_c: vector_from_slice(&slice[11..14], "accel_c")?,
            q_inert_to_body: quaternion_from_slice(&slice[14..18], "q_inert_to_body")?,
            airspeed: slice.get(18).copied(),
        })
    }
}
impl TryFrom<Vec<f64>> for MeasurementBatch {
    type Error = NavError;
    fn try_from(vec: Vec<f64>) -> Result<Self> {
        Self::try_from(vec.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn state_default_is_at_rest() {
        let state = State::default();
        assert_eq!(state.time, 0.0);
        assert_eq!(state.position, Vector3::zeros());
        assert_eq!(state.velocity, Vector3::zeros());
        assert_eq!(state.attitude, UnitQuaternion::identity());
        assert!(state.validate().is_ok());
    }
    #[test]
    fn state_vec_conversion() {
        let values = vec![
            1.5, 6378000.0, 0.0, 0.0, 1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 0.0,
        ];
        let state = State::try_from(values.clone()).unwrap();
        assert_eq!(state.time, 1.5);
        assert_eq!(state.position, Vector3::new(6378000.0, 0.0, 0.0));
        assert_eq!(state.velocity, Vector3::new(1.0, 2.0, 3.0));
        let back: Vec<f64> = state.into();
        assert_eq!(back, values);
    }
    #[test]
    fn state_rejects_bad_shapes() {
        assert!(State::try_from(vec![0.0; 10]).is_err());
        let mut values = vec![0.0; 11];
        values[7] = 1.0;
        values[2] = f64::NAN;
        assert!(matches!(
            State::try_from(values),
            Err(NavError::MalformedVector { field: "position", .. })
        ));
        // all-zero attitude
        assert!(matches!(
            State::try_from(vec![0.0; 11]),
            Err(NavError::MalformedVector { field: "attitude", .. })
        ));
    }
    #[test]
    fn state_attitude_is_normalized() {
        let state =
            State::try_from(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 3.0]).unwrap();
        assert_approx_eq!(state.attitude.k, 1.0);
        assert_approx_eq!(state.attitude.w, 0.0);
    }
    #[test]
    fn batch_from_slice() {
        let mut values = vec![0.0; 18];
        values[0] = 0.01;
        values[1] = 120.0;
        values[14] = 1.0;
        let batch = MeasurementBatch::try_from(values.as_slice()).unwrap();
        assert_eq!(batch.dt, 0.01);
        assert_eq!(batch.altitude, 120.0);
        assert_eq!(batch.airspeed, None);
        values.push(33.0);
        let batch = MeasurementBatch::try_from(values).unwrap();
        assert_eq!(batch.airspeed, Some(33.0));
    }
    #[test]
    fn batch_rejects_wrong_length() {
        assert!(matches!(
            MeasurementBatch::try_from(vec![0.0; 17]),
            Err(NavError::MalformedVector { field: "measurements", .. })
        ));
    }
    #[test]
    fn batch_validate_interval() {
        let batch = MeasurementBatch::default();
        assert!(matches!(
            batch.validate(),
            Err(NavError::InvalidInterval { dt }) if dt == 0.0
        ));
        let batch = MeasurementBatch {
            dt: -1.0,
            ..MeasurementBatch::default()
        };
        assert!(matches!(batch.validate(), Err(NavError::InvalidInterval { .. })));
        let batch = MeasurementBatch {
            dt: f64::NAN,
            ..MeasurementBatch::default()
        };
        assert!(matches!(batch.validate(), Err(NavError::InvalidInterval { .. })));
        let batch = MeasurementBatch {
            dt: 0.1,
            ..MeasurementBatch::default()
        };
        assert!(batch.validate().is_ok());
    }
    #[test]
    fn batch_validate_readings() {
        let batch = MeasurementBatch {
            dt: 0.1,
            accel_c: Vector3::new(0.0, f64::INFINITY, 0.0),
            ..MeasurementBatch::default()
        };
        assert!(matches!(
            batch.validate(),
            Err(NavError::MalformedVector { field: "accel_c", .. })
        ));
        let batch = MeasurementBatch {
            dt: 0.1,
            ..MeasurementBatch::default()
        }
        .with_airspeed(f64::NAN);
        assert!(matches!(
            batch.validate(),
            Err(NavError::MalformedVector { field: "airspeed", .. })
        ));
        for airspeed in [-0.5, f64::NEG_INFINITY] {
            let batch = MeasurementBatch {
                dt: 0.1,
                ..MeasurementBatch::default()
            }
            .with_airspeed(airspeed);
            assert!(matches!(
                batch.validate(),
                Err(NavError::MalformedVector { field: "airspeed", .. })
            ));
        }
        let batch = MeasurementBatch {
            dt: 0.1,
            ..MeasurementBatch::default()
        }
        .with_airspeed(0.0);
        assert!(batch.validate().is_ok());
    }
    #[test]
    fn delta_theta_scales_rate() {
        let batch = MeasurementBatch {
            dt: 0.5,
            angular_velocity: Vector3::new(0.2, -0.4, 1.0),
            ..MeasurementBatch::default()
        };
        assert_eq!(batch.delta_theta(), Vector3::new(0.1, -0.2, 0.5));
    }
}
