//! End-to-end tests of the propagation step through the public API.
//!
//! These cover the algebraic laws of the mergers when driven through [`StatePropagator`], the
//! Earth-radius free-fall scenario, concurrent use of one propagator, and a CSV replay through
//! the `sim` module.
use std::sync::Arc;
use std::thread;

use assert_approx_eq::assert_approx_eq;
use nalgebra::{UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use navmerge::earth;
use navmerge::errors::NavError;
use navmerge::merge::{AttitudePolicy, CompositionOrder, PositionWeights, merge_acceleration};
use navmerge::sim::{FailurePolicy, NavigationResult, SensorRecord, replay};
use navmerge::{MeasurementBatch, PropagatorConfig, State, StatePropagator};

fn random_vector(rng: &mut StdRng, scale: f64) -> Vector3<f64> {
    Vector3::new(
        rng.random_range(-scale..scale),
        rng.random_range(-scale..scale),
        rng.random_range(-scale..scale),
    )
}

fn random_attitude(rng: &mut StdRng) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(
        rng.random_range(-3.0..3.0),
        rng.random_range(-1.5..1.5),
        rng.random_range(-3.0..3.0),
    )
}

fn random_batch(rng: &mut StdRng) -> MeasurementBatch {
    MeasurementBatch::new(
        rng.random_range(0.001..1.0),
        rng.random_range(0.0..1000.0),
        random_vector(rng, 7.0e6),
        random_vector(rng, 0.5),
        random_vector(rng, 30.0),
        random_vector(rng, 30.0),
        random_attitude(rng),
    )
}

fn random_prior(rng: &mut StdRng) -> State {
    State::new(
        rng.random_range(0.0..100.0),
        random_vector(rng, 7.0e6),
        random_vector(rng, 300.0),
        random_attitude(rng),
    )
}

#[test]
fn free_fall_at_earth_radius() {
    let prior = State::new(
        0.0,
        Vector3::new(6378000.0, 0.0, 0.0),
        Vector3::zeros(),
        UnitQuaternion::identity(),
    );
    let batch = MeasurementBatch::try_from(vec![
        1.0, 0.0, 6378000.0, 0.0, 0.0, 0.0, 0.0, 0.0, -9.78, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
        0.0,
    ])
    .unwrap();
    let next = StatePropagator::default().propagate(&prior, &batch).unwrap();

    assert_approx_eq!(next.velocity[0], -9.78, 0.02);
    assert_approx_eq!(next.velocity[1], 0.0);
    assert_approx_eq!(next.velocity[2], 0.0);
    // dead-reckoned x is 6378000 - a/2; blended with GPS x
    assert_approx_eq!(next.position[0], 6378000.0 - 0.25 * 9.79, 0.02);
    assert_approx_eq!(next.position[1], 0.0);
    assert_approx_eq!(next.position[2], 0.0);
    assert_eq!(next.time, 1.0);
    assert_eq!(next.attitude, UnitQuaternion::identity());
}

#[test]
fn acceleration_is_mean_of_both_estimates() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..100 {
        let position = random_vector(&mut rng, 7.0e6);
        let accel_nc = random_vector(&mut rng, 30.0);
        let accel_c = random_vector(&mut rng, 30.0);
        let merged = merge_acceleration(&position, &accel_nc, &accel_c, earth::GM);
        let g = earth::gravitation(&position, earth::GM).unwrap();
        let expected = 0.5 * (accel_nc + accel_c + g);
        for i in 0..3 {
            assert_approx_eq!(merged[i], expected[i], 1e-9);
        }
    }
    let accel_nc = Vector3::new(1.5, -2.0, 0.25);
    let merged = merge_acceleration(
        &Vector3::zeros(),
        &accel_nc,
        &Vector3::new(9.0, 9.0, 9.0),
        earth::GM,
    );
    assert_eq!(merged, accel_nc);
}

#[test]
fn velocity_changes_by_acceleration_times_dt() {
    let mut rng = StdRng::seed_from_u64(7);
    let propagator = StatePropagator::default();
    for _ in 0..100 {
        let prior = random_prior(&mut rng);
        let batch = random_batch(&mut rng);
        let next = propagator.propagate(&prior, &batch).unwrap();
        let accel = merge_acceleration(
            &prior.position,
            &batch.accel_nc,
            &batch.accel_c,
            earth::GM,
        );
        let dv = next.velocity - prior.velocity;
        for i in 0..3 {
            assert_approx_eq!(dv[i], accel[i] * batch.dt, 1e-9);
        }
        assert_approx_eq!(next.time, prior.time + batch.dt, 1e-12);
    }
}

#[test]
fn vertical_is_mean_of_altitude_and_gps() {
    let mut rng = StdRng::seed_from_u64(11);
    let propagator = StatePropagator::default();
    for _ in 0..50 {
        let prior = random_prior(&mut rng);
        let batch = random_batch(&mut rng);
        let next = propagator.propagate(&prior, &batch).unwrap();
        let accel = merge_acceleration(
            &prior.position,
            &batch.accel_nc,
            &batch.accel_c,
            earth::GM,
        );
        let dead_reckoned =
            prior.position + prior.velocity * batch.dt + 0.5 * accel * batch.dt * batch.dt;
        let vertical = 0.5 * (batch.altitude + batch.gps[2]);
        assert_approx_eq!(next.position[0], 0.5 * (dead_reckoned[0] + batch.gps[0]), 1e-6);
        assert_approx_eq!(next.position[1], 0.5 * (dead_reckoned[1] + batch.gps[1]), 1e-6);
        assert_approx_eq!(next.position[2], 0.5 * (dead_reckoned[2] + vertical), 1e-6);
    }
}

#[test]
fn trust_measurement_returns_measured_attitude() {
    let mut rng = StdRng::seed_from_u64(3);
    let propagator = StatePropagator::default();
    for _ in 0..50 {
        let prior = random_prior(&mut rng);
        let batch = random_batch(&mut rng);
        let next = propagator.propagate(&prior, &batch).unwrap();
        assert_eq!(next.attitude, batch.q_inert_to_body);
    }
}

#[test]
fn zero_motion_at_origin_is_idempotent() {
    let propagator = StatePropagator::default();
    let prior = State::default();
    let batch = MeasurementBatch {
        dt: 0.5,
        ..MeasurementBatch::default()
    };
    let next = propagator.propagate(&prior, &batch).unwrap();
    assert_eq!(next.position, prior.position);
    assert_eq!(next.velocity, prior.velocity);
    assert_eq!(next.time, 0.5);
}

#[test]
fn non_positive_interval_produces_no_state() {
    let propagator = StatePropagator::default();
    let prior = State::default();
    for dt in [0.0, -1.0, f64::NAN] {
        let batch = MeasurementBatch {
            dt,
            ..MeasurementBatch::default()
        };
        match propagator.propagate(&prior, &batch) {
            Err(NavError::InvalidInterval { .. }) => {}
            other => panic!("expected InvalidInterval for dt = {dt}, got {other:?}"),
        }
    }
}

#[test]
fn weighted_configuration_changes_blend() {
    let config = PropagatorConfig {
        position_weights: PositionWeights {
            altitude: 3.0,
            gps_vertical: 1.0,
            dead_reckoned: 0.0,
            measured: 1.0,
        },
        ..PropagatorConfig::default()
    };
    let propagator = StatePropagator::new(&config).unwrap();
    let batch = MeasurementBatch {
        dt: 1.0,
        altitude: 100.0,
        gps: Vector3::new(5.0, 6.0, 200.0),
        ..MeasurementBatch::default()
    };
    let next = propagator.propagate(&State::default(), &batch).unwrap();
    assert_approx_eq!(next.position[0], 5.0);
    assert_approx_eq!(next.position[1], 6.0);
    assert_approx_eq!(next.position[2], 125.0);
}

#[test]
fn gyro_blend_tracks_rotation() {
    let config = PropagatorConfig {
        attitude_policy: AttitudePolicy::GyroBlend {
            composition: CompositionOrder::PriorThenDelta,
        },
        ..PropagatorConfig::default()
    };
    let propagator = StatePropagator::new(&config).unwrap();
    let yaw_rate = 0.1;
    let mut state = State::default();
    for k in 1..=10 {
        let batch = MeasurementBatch {
            dt: 0.1,
            angular_velocity: Vector3::new(0.0, 0.0, yaw_rate),
            q_inert_to_body: UnitQuaternion::from_euler_angles(0.0, 0.0, yaw_rate * 0.1 * k as f64),
            ..MeasurementBatch::default()
        };
        state = propagator.propagate(&state, &batch).unwrap();
    }
    let (_, _, yaw) = state.attitude.euler_angles();
    assert_approx_eq!(yaw, 0.1, 1e-3);
}

#[test]
fn shared_propagator_across_threads() {
    let propagator = Arc::new(StatePropagator::default());
    let mut rng = StdRng::seed_from_u64(99);
    let cases: Vec<(State, MeasurementBatch)> = (0..8)
        .map(|_| (random_prior(&mut rng), random_batch(&mut rng)))
        .collect();
    let expected: Vec<State> = cases
        .iter()
        .map(|(prior, batch)| propagator.propagate(prior, batch).unwrap())
        .collect();

    let handles: Vec<_> = cases
        .into_iter()
        .map(|(prior, batch)| {
            let propagator = Arc::clone(&propagator);
            thread::spawn(move || propagator.propagate(&prior, &batch).unwrap())
        })
        .collect();
    for (handle, want) in handles.into_iter().zip(expected) {
        assert_eq!(handle.join().unwrap(), want);
    }
}

#[test]
fn csv_replay_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sensors.csv");
    let output = dir.path().join("states.csv");

    let start = Vector3::new(6378000.0, 0.0, 0.0);
    let batch = MeasurementBatch::new(
        0.1,
        0.0,
        start,
        Vector3::zeros(),
        Vector3::zeros(),
        Vector3::new(9.8, 0.0, 0.0),
        UnitQuaternion::identity(),
    );
    let mut records = vec![SensorRecord::from(&batch); 20];
    records[5].dt = 0.0;
    SensorRecord::to_csv(&records, &input).unwrap();

    let initial = State::new(0.0, start, Vector3::zeros(), UnitQuaternion::identity());
    let propagator = StatePropagator::default();
    let loaded = SensorRecord::from_csv(&input).unwrap();

    assert!(matches!(
        replay(&propagator, initial, &loaded, FailurePolicy::Halt),
        Err(NavError::InvalidInterval { .. })
    ));

    let result = replay(&propagator, initial, &loaded, FailurePolicy::HoldLastGood).unwrap();
    assert_eq!(result.rejected, vec![5]);
    assert_eq!(result.states.len(), 20);
    result.to_csv(&output).unwrap();

    let reloaded = NavigationResult::from_csv(&output).unwrap();
    assert_eq!(reloaded.states.len(), 20);
    let last = reloaded.last().unwrap();
    assert_approx_eq!(last.time, 1.9, 1e-9);
    // conservative reading cancels gravity, so the vehicle stays near its GPS fix
    assert_approx_eq!(last.position[0], 6378000.0, 1.0);
    assert!(last.velocity.norm() < 0.1);
}
