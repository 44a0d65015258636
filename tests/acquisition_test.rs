//! Integration tests for the acquisition engine against mock hardware.
//!
//! All tests run on a paused tokio clock: step, settle and cooldown delays complete
//! instantly but are still observable through `tokio::time::Instant` and the recorded
//! capture times.

use pl_daq::config::ExperimentConfig;
use pl_daq::error::DaqError;
use pl_daq::experiment::{AcquisitionEngine, AcquisitionEvent, AcquisitionState};
use pl_daq::hardware::mock::{CallLog, HardwareCall, MockLaser, MockSpectrometer};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

const TWO_RUNS_NO_COOLDOWN: &str = r#"
    [runs]
    power_mw = [1.0, 20.0]
    integration_time_us = [500000, 100000]
    step_count = [3, 2]
    step_delay_s = [4.5, 4.9]
    inter_run_delay_s = [0.0]

    [laser]
    driver = "mock"
    settle_delay_ms = 0
"#;

struct Rig {
    log: CallLog,
    laser: Arc<MockLaser>,
    spectrometer: Arc<MockSpectrometer>,
}

impl Rig {
    fn new() -> Self {
        Self::with(MockLaser::new(), MockSpectrometer::new())
    }

    fn with(laser: MockLaser, spectrometer: MockSpectrometer) -> Self {
        let log = CallLog::new();
        let laser = laser.with_call_log(log.clone());
        let spectrometer = spectrometer
            .with_call_log(log.clone())
            .illuminated_by(&laser)
            .without_exposure_delay();
        Self {
            log,
            laser: Arc::new(laser),
            spectrometer: Arc::new(spectrometer),
        }
    }

    fn engine(&self, toml: &str) -> AcquisitionEngine {
        let config = ExperimentConfig::from_toml_str(toml).unwrap();
        AcquisitionEngine::new(&config, self.laser.clone(), self.spectrometer.clone()).unwrap()
    }

    fn first_laser_on(&self) -> usize {
        self.log
            .calls()
            .iter()
            .position(|c| *c == HardwareCall::LaserOn)
            .unwrap()
    }

    fn laser_offs_after_first_on(&self) -> usize {
        self.log.calls()[self.first_laser_on()..]
            .iter()
            .filter(|c| **c == HardwareCall::LaserOff)
            .count()
    }
}

#[tokio::test(start_paused = true)]
async fn test_background_captured_before_laser_on() {
    let rig = Rig::new();
    rig.engine(TWO_RUNS_NO_COOLDOWN).run().await.unwrap();

    let calls = rig.log.calls();
    let first_on = rig.first_laser_on();

    assert_eq!(calls[0], HardwareCall::LaserOff);
    let background: Vec<_> = calls[..first_on]
        .iter()
        .filter(|c| matches!(c, HardwareCall::Capture { .. }))
        .collect();
    assert_eq!(background.len(), 2);
    assert!(background
        .iter()
        .all(|c| **c == HardwareCall::Capture { illuminated: false }));

    // background integration times follow the run order
    let integration: Vec<_> = calls[..first_on]
        .iter()
        .filter_map(|c| match c {
            HardwareCall::SetIntegrationTime { micros } => Some(*micros),
            _ => None,
        })
        .collect();
    assert_eq!(integration, vec![500_000, 100_000]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_inter_run_delay_only_final_laser_off() {
    let rig = Rig::new();
    let results = rig.engine(TWO_RUNS_NO_COOLDOWN).run().await.unwrap();

    assert_eq!(rig.laser_offs_after_first_on(), 1);
    assert_eq!(rig.log.last(), Some(HardwareCall::LaserOff));
    assert_eq!(
        rig.log.count(|c| *c == HardwareCall::LaserOn),
        2,
        "laser is switched on once per run"
    );
    assert!(!rig.laser.is_emitting());
    assert_eq!(results.store.valid_len(0), 3);
    assert_eq!(results.store.valid_len(1), 2);
}

#[tokio::test(start_paused = true)]
async fn test_every_capture_reapplies_integration_time() {
    let rig = Rig::new();
    rig.engine(TWO_RUNS_NO_COOLDOWN).run().await.unwrap();

    let calls = rig.log.calls();
    let first_on = rig.first_laser_on();
    let mut last_integration = None;
    for call in &calls[first_on..] {
        match call {
            HardwareCall::SetIntegrationTime { micros } => last_integration = Some(*micros),
            HardwareCall::Capture { illuminated } => {
                assert!(illuminated);
                assert!(last_integration.take().is_some());
            }
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_setup_order_per_run() {
    let rig = Rig::new();
    rig.engine(TWO_RUNS_NO_COOLDOWN).run().await.unwrap();

    let calls = rig.log.calls();
    let first_on = rig.first_laser_on();
    assert_eq!(
        calls[first_on - 2..=first_on + 1],
        [
            HardwareCall::LaserCwMode,
            HardwareCall::LaserSetPower { milliwatts: 1.0 },
            HardwareCall::LaserOn,
            HardwareCall::LaserQueryPower,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_step_delay_applied_between_steps_only() {
    let rig = Rig::new();
    let engine = rig.engine(
        r#"
        [runs]
        power_mw = [5.0]
        integration_time_us = [100000]
        step_count = [4]
        step_delay_s = [2.5]
        inter_run_delay_s = []

        [laser]
        settle_delay_ms = 0
    "#,
    );

    let start = Instant::now();
    let results = engine.run().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(&results.store.times(0)[..4], &[0.0, 2.5, 5.0, 7.5]);
    assert!(
        elapsed >= Duration::from_millis(7500) && elapsed < Duration::from_millis(7510),
        "Expected ~7.5s, got {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_turns_laser_off_and_waits() {
    let rig = Rig::new();
    let results = rig
        .engine(
            r#"
        [runs]
        power_mw = [1.0, 20.0]
        integration_time_us = [1000, 1000]
        step_count = [2, 2]
        step_delay_s = [1.0, 1.0]
        inter_run_delay_s = [5.0]

        [laser]
        settle_delay_ms = 0
    "#,
        )
        .run()
        .await
        .unwrap();

    // after run 1 (cooldown), after run 2 (last delay reused), final
    assert_eq!(rig.laser_offs_after_first_on(), 3);

    let last_of_first = results.store.capture_time(0, 1).unwrap();
    let first_of_second = results.store.capture_time(1, 0).unwrap();
    assert_eq!(last_of_first, 1.0);
    assert_eq!(first_of_second - last_of_first, 5.0);
}

#[tokio::test(start_paused = true)]
async fn test_times_are_rebased_and_non_negative() {
    let rig = Rig::new();
    let engine = rig.engine(
        r#"
        [runs]
        power_mw = [1.0, 20.0]
        integration_time_us = [1000, 1000]
        step_count = [3, 2]
        step_delay_s = [0.5, 0.25]
        inter_run_delay_s = [0.0]

        [laser]
        settle_delay_ms = 50
    "#,
    );
    let results = engine.run().await.unwrap();

    assert!(results.warnings.is_empty());
    let times: Vec<f64> = (0..2)
        .flat_map(|run| {
            let steps = results.store.valid_len(run);
            results.store.times(run)[..steps].to_vec()
        })
        .collect();
    assert_eq!(times[0], 0.0);
    assert!(times.iter().all(|&t| t >= 0.0));
    assert!(times.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(times.iter().cloned().fold(f64::INFINITY, f64::min), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_results_are_aligned_with_window() {
    let rig = Rig::new();
    let results = rig.engine(TWO_RUNS_NO_COOLDOWN).run().await.unwrap();

    let wavelengths = results.axis.wavelengths();
    assert!(wavelengths.iter().all(|&w| (480.0..820.0).contains(&w)));
    assert_eq!(results.background.len(), 2);
    assert!(results
        .background
        .row(1)
        .is_some_and(|row| row.len() == wavelengths.len()));
    for run in 0..2 {
        assert!(results
            .store
            .run_spectra(run)
            .all(|spectrum| spectrum.len() == wavelengths.len()));
    }
    assert_eq!(results.power_readback_mw, vec![1.0, 20.0]);
}

#[tokio::test(start_paused = true)]
async fn test_peak_tracks_photoluminescence_line() {
    let rig = Rig::with(MockLaser::new(), MockSpectrometer::new().without_noise());
    let results = rig.engine(TWO_RUNS_NO_COOLDOWN).run().await.unwrap();

    let first = results.store.peaks(0)[0];
    assert!((first.wavelength - 530.0).abs() < 1.0, "{first:?}");
    assert!(first.intensity > 0.0);

    // the mock line red-shifts with every illuminated shot
    let last = results.store.peaks(1)[1];
    assert!(last.wavelength >= first.wavelength);
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_mid_run_turns_laser_off() {
    // two background captures, then step 5 of run 1 fails
    let rig = Rig::with(MockLaser::new(), MockSpectrometer::new().fail_on_capture(2 + 5));
    let engine = rig.engine(
        r#"
        [runs]
        power_mw = [1.0, 20.0]
        integration_time_us = [1000, 1000]
        step_count = [6, 3]
        step_delay_s = [1.0, 1.0]
        inter_run_delay_s = [0.0]
    "#,
    );

    let err = engine.run().await.unwrap_err();
    assert!(matches!(
        err,
        DaqError::Hardware {
            device: "spectrometer",
            operation: "capture_intensities",
            ..
        }
    ));
    assert_eq!(engine.state(), AcquisitionState::Aborted);
    assert!(!rig.laser.is_emitting());
    assert_eq!(rig.log.last(), Some(HardwareCall::LaserOff));
    assert_eq!(rig.spectrometer.capture_count(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_failed_safety_shutdown_reports_both_errors() {
    let rig = Rig::with(MockLaser::new().failing_turn_off(), MockSpectrometer::new());
    let err = rig
        .engine(TWO_RUNS_NO_COOLDOWN)
        .run()
        .await
        .unwrap_err();

    match err {
        DaqError::ShutdownFailed(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().all(DaqError::is_hardware));
        }
        other => panic!("expected ShutdownFailed, got {other}"),
    }
    // nothing is captured or switched on after the initial laser-off failed
    assert_eq!(rig.log.count(|c| *c == HardwareCall::LaserOn), 0);
}

#[tokio::test(start_paused = true)]
async fn test_event_stream() {
    let rig = Rig::new();
    let engine = rig.engine(TWO_RUNS_NO_COOLDOWN);
    let mut rx = engine.subscribe();
    engine.run().await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let position = |predicate: &dyn Fn(&AcquisitionEvent) -> bool| {
        events.iter().position(|e| predicate(e)).unwrap()
    };
    let calibrating = position(&|e| {
        *e == AcquisitionEvent::StateChanged {
            state: AcquisitionState::Calibrating,
        }
    });
    let run_started = position(&|e| matches!(e, AcquisitionEvent::RunStarted { run: 0, .. }));
    let first_step = position(&|e| {
        matches!(
            e,
            AcquisitionEvent::StepCaptured {
                run: 0,
                step: 0,
                ..
            }
        )
    });

    assert!(calibrating < run_started);
    assert!(run_started < first_step);
    assert!(matches!(
        events.last(),
        Some(AcquisitionEvent::ExperimentFinished { captures: 5, .. })
    ));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, AcquisitionEvent::RunFinished { .. }))
            .count(),
        2
    );
}
