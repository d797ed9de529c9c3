//! Replay of logged sensor data through the propagator.
//!
//! This module provides:
//! - A struct (`SensorRecord`) for reading and writing one measurement cycle per CSV row
//! - A struct (`StateRecord`) for reading and writing propagated states as CSV rows
//! - `replay`, which plays a record sequence through a [`StatePropagator`] the way the on-board
//!   acquisition loop would, one call per cycle
//! - `NavigationResult` for collecting the state history of a replay
use clap::ValueEnum;
use log::{info, warn};
use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{NavError, Result};
use crate::linalg::{normalize_quaternion, quaternion_to_array};
use crate::{MeasurementBatch, State, StatePropagator};

/// One measurement cycle as logged by the acquisition layer.
///
/// Quaternion columns are scalar-first (`qw, qx, qy, qz`). `airspeed` may be left empty.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SensorRecord {
    /// Time since the previous cycle in seconds
    pub dt: f64,
    /// Barometric altitude in meters
    pub altitude: f64,
    /// GPS position x in meters
    pub gps_x: f64,
    /// GPS position y in meters
    pub gps_y: f64,
    /// GPS position z in meters
    pub gps_z: f64,
    /// Rotation rate around the x-axis in radians/s
    pub gyro_x: f64,
    /// Rotation rate around the y-axis in radians/s
    pub gyro_y: f64,
    /// Rotation rate around the z-axis in radians/s
    pub gyro_z: f64,
    /// Non-conservative acceleration x in m/s^2
    pub accel_nc_x: f64,
    /// Non-conservative acceleration y in m/s^2
    pub accel_nc_y: f64,
    /// Non-conservative acceleration z in m/s^2
    pub accel_nc_z: f64,
    /// Conservative acceleration x in m/s^2
    pub accel_c_x: f64,
    /// Conservative acceleration y in m/s^2
    pub accel_c_y: f64,
    /// Conservative acceleration z in m/s^2
    pub accel_c_z: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    /// Airspeed in m/s, empty when no airspeed sensor is fitted
    #[serde(default)]
    pub airspeed: Option<f64>,
}

impl SensorRecord {
    /// Reads a CSV file and returns a vector of `SensorRecord` structs.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes a slice of records to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl From<&MeasurementBatch> for SensorRecord {
    fn from(batch: &MeasurementBatch) -> Self {
        let [qw, qx, qy, qz] = quaternion_to_array(&batch.q_inert_to_body);
        SensorRecord {
            dt: batch.dt,
            altitude: batch.altitude,
            gps_x: batch.gps[0],
            gps_y: batch.gps[1],
            gps_z: batch.gps[2],
            gyro_x: batch.angular_velocity[0],
            gyro_y: batch.angular_velocity[1],
            gyro_z: batch.angular_velocity[2],
            accel_nc_x: batch.accel_nc[0],
            accel_nc_y: batch.accel_nc[1],
            accel_nc_z: batch.accel_nc[2],
            accel_c_x: batch.accel_c[0],
            accel_c_y: batch.accel_c[1],
            accel_c_z: batch.accel_c[2],
            qw,
            qx,
            qy,
            qz,
            airspeed: batch.airspeed,
        }
    }
}

impl TryFrom<&SensorRecord> for MeasurementBatch {
    type Error = NavError;
    /// Fails only if the logged quaternion cannot be normalized; other checks happen in
    /// [`MeasurementBatch::validate`].
    fn try_from(record: &SensorRecord) -> Result<Self> {
        Ok(MeasurementBatch {
            dt: record.dt,
            altitude: record.altitude,
            gps: Vector3::new(record.gps_x, record.gps_y, record.gps_z),
            angular_velocity: Vector3::new(record.gyro_x, record.gyro_y, record.gyro_z),
            accel_nc: Vector3::new(record.accel_nc_x, record.accel_nc_y, record.accel_nc_z),
            accel_c: Vector3::new(record.accel_c_x, record.accel_c_y, record.accel_c_z),
            q_inert_to_body: normalize_quaternion(
                Quaternion::new(record.qw, record.qx, record.qy, record.qz),
                "q_inert_to_body",
            )?,
            airspeed: record.airspeed,
        })
    }
}

/// A propagated state as one CSV row
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct StateRecord {
    pub time: f64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub vel_z: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
}

impl From<&State> for StateRecord {
    fn from(state: &State) -> Self {
        let [qw, qx, qy, qz] = quaternion_to_array(&state.attitude);
        StateRecord {
            time: state.time,
            pos_x: state.position[0],
            pos_y: state.position[1],
            pos_z: state.position[2],
            vel_x: state.velocity[0],
            vel_y: state.velocity[1],
            vel_z: state.velocity[2],
            qw,
            qx,
            qy,
            qz,
        }
    }
}

impl TryFrom<&StateRecord> for State {
    type Error = NavError;
    fn try_from(record: &StateRecord) -> Result<Self> {
        State::try_from(
            [
                record.time,
                record.pos_x,
                record.pos_y,
                record.pos_z,
                record.vel_x,
                record.vel_y,
                record.vel_z,
                record.qw,
                record.qx,
                record.qy,
                record.qz,
            ]
            .as_slice(),
        )
    }
}

/// What the replay loop does when the propagator rejects a record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Stop and return the error
    #[default]
    Halt,
    /// Keep the last good state and continue with the next record
    HoldLastGood,
}

/// State history of a replay
#[derive(Debug, Default)]
pub struct NavigationResult {
    /// Initial state followed by one state per accepted record
    pub states: Vec<State>,
    /// Indices of records rejected under [`FailurePolicy::HoldLastGood`]
    pub rejected: Vec<usize>,
}

impl NavigationResult {
    /// The most recent state, if any
    pub fn last(&self) -> Option<&State> {
        self.states.last()
    }

    /// Writes the state history to a CSV file
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for state in &self.states {
            writer.serialize(StateRecord::from(state))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a state history previously written with [`NavigationResult::to_csv`]
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut result = NavigationResult::default();
        for row in rdr.deserialize() {
            let record: StateRecord = row?;
            result.states.push(State::try_from(&record)?);
        }
        Ok(result)
    }
}

/// Play `records` through `propagator`, starting from `initial`.
///
/// Each record is one sensor cycle; the output of one call is the prior of the next. A rejected
/// record either stops the replay ([`FailurePolicy::Halt`]) or is skipped while the last good state
/// is held ([`FailurePolicy::HoldLastGood`]).
///
/// # Errors
/// Under `Halt`, the first propagation error. Under `HoldLastGood`, never.
pub fn replay(
    propagator: &StatePropagator,
    initial: State,
    records: &[SensorRecord],
    policy: FailurePolicy,
) -> Result<NavigationResult> {
    let mut result = NavigationResult {
        states: Vec::with_capacity(records.len() + 1),
        rejected: Vec::new(),
    };
    result.states.push(initial);
    let mut current = initial;
    for (i, record) in records.iter().enumerate() {
        let step = MeasurementBatch::try_from(record)
            .and_then(|batch| propagator.propagate(&current, &batch));
        match step {
            Ok(next) => {
                current = next;
                result.states.push(next);
            }
            Err(e) => match policy {
                FailurePolicy::Halt => {
                    warn!("Record {i} rejected, halting replay: {e}");
                    return Err(e);
                }
                FailurePolicy::HoldLastGood => {
                    warn!("Record {i} rejected, holding last good state: {e}");
                    result.rejected.push(i);
                }
            },
        }
    }
    info!(
        "Replayed {} records ({} rejected)",
        records.len(),
        result.rejected.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::UnitQuaternion;

    fn hover_record(dt: f64) -> SensorRecord {
        SensorRecord {
            dt,
            altitude: 0.0,
            gps_x: 0.0,
            gps_y: 0.0,
            gps_z: 0.0,
            gyro_x: 0.0,
            gyro_y: 0.0,
            gyro_z: 0.0,
            accel_nc_x: 0.0,
            accel_nc_y: 0.0,
            accel_nc_z: 0.0,
            accel_c_x: 0.0,
            accel_c_y: 0.0,
            accel_c_z: 0.0,
            qw: 1.0,
            qx: 0.0,
            qy: 0.0,
            qz: 0.0,
            airspeed: None,
        }
    }

    #[test]
    fn record_to_batch() {
        let mut record = hover_record(0.02);
        record.gps_z = 150.0;
        record.qw = 2.0;
        record.airspeed = Some(12.0);
        let batch = MeasurementBatch::try_from(&record).unwrap();
        assert_eq!(batch.dt, 0.02);
        assert_eq!(batch.gps, Vector3::new(0.0, 0.0, 150.0));
        assert_eq!(batch.q_inert_to_body, UnitQuaternion::identity());
        assert_eq!(batch.airspeed, Some(12.0));
        assert_eq!(SensorRecord::from(&batch).qw, 1.0);
    }
    #[test]
    fn record_with_zero_quaternion_is_rejected() {
        let mut record = hover_record(0.02);
        record.qw = 0.0;
        assert!(matches!(
            MeasurementBatch::try_from(&record),
            Err(NavError::MalformedVector { .. })
        ));
    }
    #[test]
    fn state_record_roundtrip() {
        let state = State::new(
            3.0,
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-1.0, 0.5, 0.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let record = StateRecord::from(&state);
        let back = State::try_from(&record).unwrap();
        assert_eq!(back.time, state.time);
        assert_eq!(back.position, state.position);
        assert_approx_eq!(back.attitude.angle_to(&state.attitude), 0.0, 1e-7);
    }
    #[test]
    fn replay_advances_time() {
        let propagator = StatePropagator::default();
        let records = vec![hover_record(0.1); 10];
        let result = replay(&propagator, State::default(), &records, FailurePolicy::Halt).unwrap();
        assert_eq!(result.states.len(), 11);
        assert!(result.rejected.is_empty());
        assert_approx_eq!(result.last().unwrap().time, 1.0, 1e-12);
    }
    #[test]
    fn replay_halts_on_bad_record() {
        let propagator = StatePropagator::default();
        let records = vec![hover_record(0.1), hover_record(0.0), hover_record(0.1)];
        let result = replay(&propagator, State::default(), &records, FailurePolicy::Halt);
        assert!(matches!(result, Err(NavError::InvalidInterval { .. })));
    }
    #[test]
    fn replay_holds_last_good_state() {
        let propagator = StatePropagator::default();
        let records = vec![hover_record(0.1), hover_record(-1.0), hover_record(0.1)];
        let result = replay(
            &propagator,
            State::default(),
            &records,
            FailurePolicy::HoldLastGood,
        )
        .unwrap();
        assert_eq!(result.rejected, vec![1]);
        assert_eq!(result.states.len(), 3);
        assert_approx_eq!(result.last().unwrap().time, 0.2, 1e-12);
    }
    #[test]
    fn csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sensor_path = dir.path().join("sensors.csv");
        let mut records = vec![hover_record(0.1), hover_record(0.2)];
        records[1].airspeed = Some(4.0);
        SensorRecord::to_csv(&records, &sensor_path).unwrap();
        let loaded = SensorRecord::from_csv(&sensor_path).unwrap();
        assert_eq!(loaded, records);

        let result = replay(
            &StatePropagator::default(),
            State::default(),
            &loaded,
            FailurePolicy::Halt,
        )
        .unwrap();
        let state_path = dir.path().join("states.csv");
        result.to_csv(&state_path).unwrap();
        let reloaded = NavigationResult::from_csv(&state_path).unwrap();
        assert_eq!(reloaded.states.len(), 3);
        assert_approx_eq!(reloaded.states[2].time, 0.3, 1e-12);
    }
}
