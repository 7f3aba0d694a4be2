//! Fixed-rate fusion loop
//!
//! Every cycle reads the latest readings, picks the position source, runs one
//! predict/update step of the estimator and emits a record to every sink. The
//! engine owns the estimator exclusively; the only shared state is the sensor
//! store and the stop flag.

use crate::algorithms::CoordinateTransform;
use crate::api::formatting::{present_state, JsonFormatter};
use crate::api::sink::RecordSink;
use crate::api::types::{
    EngineStats, FusionError, FusionResult, GpsEcho, MeasurementEcho, PositionRecord, UwbEcho,
};
use crate::core::{LocalPosition, PositionSource};
use crate::processing::{ConstantVelocityFilter, FilterError, SensorSnapshot, SensorStore};
use crate::utils::config::FusionConfig;
use nalgebra::Vector6;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};

/// Position source chosen for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arbitration {
    pub source: PositionSource,
    pub position: LocalPosition,
}

pub struct FusionEngine {
    filter: ConstantVelocityFilter,
    transform: CoordinateTransform,
    store: Arc<SensorStore>,
    sinks: Vec<Box<dyn RecordSink>>,
    formatter: JsonFormatter,
    name: String,
    period: Duration,
    stats: EngineStats,
    last_source: PositionSource,
}

impl FusionEngine {
    /// Build the engine from a validated configuration.
    ///
    /// The estimator's `dt` and the loop period both come from `filter.dt`.
    pub fn new(config: &FusionConfig, store: Arc<SensorStore>) -> FusionResult<Self> {
        config.validate()?;

        Ok(Self {
            filter: ConstantVelocityFilter::new(&config.filter),
            transform: CoordinateTransform::new(&config.frame),
            store,
            sinks: Vec::new(),
            formatter: JsonFormatter::new(),
            name: config.transport.client_id.clone(),
            period: config.filter.period(),
            stats: EngineStats::default(),
            last_source: PositionSource::NotAvailable,
        })
    }

    /// Add an output sink
    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn filter(&self) -> &ConstantVelocityFilter {
        &self.filter
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Source used in the last completed cycle; `NA` before the first one
    pub fn last_source(&self) -> PositionSource {
        self.last_source
    }

    /// Pick the position fed to the estimator: a UWB fix, else a GPS fix
    /// converted to the local frame, else the estimator's own position.
    pub fn arbitrate(&self, snapshot: &SensorSnapshot) -> FusionResult<Arbitration> {
        if snapshot.uwb.fix_ok {
            return Ok(Arbitration {
                source: PositionSource::Uwb,
                position: LocalPosition::new(snapshot.uwb.px, snapshot.uwb.py, snapshot.uwb.pz),
            });
        }

        if snapshot.gps.fix_ok {
            let gps = &snapshot.gps;
            let height = gps.height_or(self.transform.origin().height);
            let position = self.transform.to_local(gps.lat, gps.lon, height)?;
            return Ok(Arbitration {
                source: PositionSource::Gps,
                position,
            });
        }

        Ok(Arbitration {
            source: PositionSource::Ekf,
            position: LocalPosition::from(self.filter.position()),
        })
    }

    /// Run one cycle stamped with `timestamp_ms` and emit its record.
    ///
    /// A failed cycle emits nothing. If source selection fails the estimator
    /// is not touched.
    pub fn step(&mut self, timestamp_ms: u64) -> FusionResult<PositionRecord> {
        let result = self.cycle(timestamp_ms);
        self.stats.cycles += 1;

        match result {
            Ok(record) => {
                self.emit(&record);
                Ok(record)
            }
            Err(e) => {
                self.stats.failed_cycles += 1;
                Err(e)
            }
        }
    }

    fn cycle(&mut self, timestamp_ms: u64) -> FusionResult<PositionRecord> {
        let snapshot = self.store.snapshot();
        let selected = self.arbitrate(&snapshot)?;

        let acceleration = snapshot.imu;
        let p = selected.position;
        let measurement = Vector6::new(p.x, acceleration.ax, p.y, acceleration.ay, p.z, acceleration.az);

        self.filter.predict();
        match self.filter.update(&measurement) {
            Ok(()) => {}
            Err(FilterError::SingularInnovation) => {
                self.stats.skipped_corrections += 1;
                warn!(source = %selected.source, "singular innovation covariance, keeping predicted state");
            }
        }

        self.last_source = selected.source;
        self.stats.record_source(selected.source);

        let position = self.filter.position();
        let coordinate = self.transform.to_geodetic(position.x, position.y)?;

        Ok(PositionRecord {
            ts: timestamp_ms,
            source: selected.source,
            name: self.name.clone(),
            lat: coordinate.lat,
            lon: coordinate.lon,
            ekf: present_state(&self.filter.state),
            meas: MeasurementEcho {
                gps: GpsEcho::from(&snapshot.gps),
                imu: snapshot.imu,
                uwb: UwbEcho::from(&snapshot.uwb),
            },
        })
    }

    fn emit(&mut self, record: &PositionRecord) {
        let json = match self.formatter.format_json(record) {
            Ok(json) => json,
            Err(e) => {
                self.stats.sink_failures += self.sinks.len() as u64;
                warn!(error = %FusionError::from(e), "dropping record");
                return;
            }
        };
        debug!(record = %json, "position record");

        for sink in &mut self.sinks {
            if let Err(e) = sink.emit(record, &json) {
                self.stats.sink_failures += 1;
                warn!(sink = sink.name(), error = %e, "record not delivered");
            }
        }
    }

    /// Run cycles at the configured period until `stop` is set.
    ///
    /// The flag is checked between cycles only. A cycle that overruns the
    /// period is followed immediately by the next one.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(period_ms = self.period.as_millis() as u64, sinks = self.sinks.len(), "fusion loop started");

        while !stop.load(Ordering::Acquire) {
            let started = Instant::now();

            if let Err(e) = self.step(current_time_ms()) {
                error!(error = %e, "fusion cycle failed");
            }

            let elapsed = started.elapsed();
            trace!(elapsed_us = elapsed.as_micros() as u64, "cycle finished");

            match self.period.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => thread::sleep(remaining),
                _ => {
                    self.stats.overruns += 1;
                    warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        period_ms = self.period.as_millis() as u64,
                        "fusion cycle overran its period"
                    );
                }
            }
        }

        info!(cycles = self.stats.cycles, failed = self.stats.failed_cycles, "fusion loop stopped");
    }

    /// Move the engine onto its own thread
    pub fn spawn(mut self) -> FusionResult<FusionHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("fusion".to_string())
            .spawn(move || {
                self.run(&flag);
                self.stats
            })
            .map_err(FusionError::Spawn)?;

        Ok(FusionHandle { stop, thread })
    }
}

/// Control handle for an engine running on its own thread
pub struct FusionHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<EngineStats>,
}

impl FusionHandle {
    /// Ask the loop to stop after the current cycle
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Wait for the loop to exit and return its statistics
    pub fn join(self) -> FusionResult<EngineStats> {
        self.thread.join().map_err(|_| FusionError::ThreadPanicked)
    }

    pub fn stop_and_join(self) -> FusionResult<EngineStats> {
        self.stop();
        self.join()
    }
}

/// Get current time in milliseconds since the Unix epoch
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::GeodesicError;
    use crate::api::sink::{SinkError, TopicPublisher};
    use crate::core::{GpsReading, ImuReading, UwbReading};
    use crate::transport::{MqttBus, TransportError};
    use crate::utils::config::{FrameConfig, GeodeticOrigin, TransportConfig};
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix6, Vector3};
    use std::sync::Mutex;

    /// Keeps every record it receives
    #[derive(Clone, Default)]
    struct CollectingSink {
        records: Arc<Mutex<Vec<PositionRecord>>>,
    }

    impl CollectingSink {
        fn records(&self) -> Vec<PositionRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl RecordSink for CollectingSink {
        fn name(&self) -> &str {
            "collect"
        }

        fn emit(&mut self, record: &PositionRecord, json: &str) -> Result<(), SinkError> {
            assert!(!json.contains('\n'));
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn emit(&mut self, _record: &PositionRecord, _json: &str) -> Result<(), SinkError> {
            Err(SinkError::Transport(TransportError::Closed))
        }
    }

    fn engine(config: &FusionConfig) -> (FusionEngine, Arc<SensorStore>) {
        let store = Arc::new(SensorStore::new(&config.initial_readings));
        let engine = FusionEngine::new(config, Arc::clone(&store)).unwrap();
        (engine, store)
    }

    #[test]
    fn test_uwb_fix_wins() {
        let (engine, store) = engine(&FusionConfig::default());
        store.set_uwb(UwbReading::new(1.0, 2.0, 0.0, true));
        store.set_gps(GpsReading::fixed(62.79, 22.83, 45521.0));

        let selected = engine.arbitrate(&store.snapshot()).unwrap();
        assert_eq!(selected.source, PositionSource::Uwb);
        assert_eq!(selected.position, LocalPosition::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_gps_fix_without_uwb() {
        let config = FusionConfig::default();
        let (engine, store) = engine(&config);
        store.set_uwb(UwbReading::new(1.0, 2.0, 0.0, false));
        store.set_gps(GpsReading::fixed(
            config.frame.origin.latitude,
            config.frame.origin.longitude,
            config.frame.origin.height,
        ));

        let selected = engine.arbitrate(&store.snapshot()).unwrap();
        assert_eq!(selected.source, PositionSource::Gps);
        assert_abs_diff_eq!(selected.position.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(selected.position.y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(selected.position.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gps_without_height_uses_origin_height() {
        let config = FusionConfig::default();
        let (engine, store) = engine(&config);
        store.set_gps(GpsReading {
            fix_ok: true,
            ..GpsReading::no_fix(config.frame.origin.latitude, config.frame.origin.longitude)
        });

        let selected = engine.arbitrate(&store.snapshot()).unwrap();
        assert_eq!(selected.source, PositionSource::Gps);
        assert_abs_diff_eq!(selected.position.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_fix_uses_estimate() {
        let (engine, store) = engine(&FusionConfig::default());

        let selected = engine.arbitrate(&store.snapshot()).unwrap();
        assert_eq!(selected.source, PositionSource::Ekf);
        assert_abs_diff_eq!(selected.position.to_vector3(), engine.filter().position(), epsilon = 1e-12);
        assert_eq!(engine.last_source(), PositionSource::NotAvailable);
    }

    #[test]
    fn test_free_running_scenario() {
        let config = FusionConfig::default();
        let (mut engine, _store) = engine(&config);

        let mut last = None;
        for ts in 0..50 {
            last = Some(engine.step(ts).unwrap());
        }

        let record = last.unwrap();
        assert_eq!(record.source, PositionSource::Ekf);
        assert_eq!(record.name, "fusion");
        assert_eq!((record.ekf.px, record.ekf.py, record.ekf.pz), (-4.6, -2.1, 0.5));
        assert_abs_diff_eq!(engine.filter().position(), Vector3::new(-4.60, -2.10, 0.50), epsilon = 1e-6);

        let expected = CoordinateTransform::new(&config.frame).to_geodetic(-4.60, -2.10).unwrap();
        assert_abs_diff_eq!(record.lat, expected.lat, epsilon = 1e-8);
        assert_abs_diff_eq!(record.lon, expected.lon, epsilon = 1e-8);
        assert_eq!(engine.stats().ekf_selected, 50);
        assert_eq!(engine.last_source(), PositionSource::Ekf);
    }

    #[test]
    fn test_converges_to_uwb_fix() {
        let (mut engine, store) = engine(&FusionConfig::default());
        store.set_uwb(UwbReading::new(1.0, 2.0, 0.0, true));
        store.set_imu(ImuReading::default());

        let mut record = None;
        for ts in 0..300 {
            record = Some(engine.step(ts).unwrap());
        }

        let record = record.unwrap();
        assert_eq!(record.source, PositionSource::Uwb);
        assert_abs_diff_eq!(record.ekf.px, 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(record.ekf.py, 2.0, epsilon = 1e-2);
        assert_abs_diff_eq!(record.ekf.pz, 0.0, epsilon = 1e-2);
        assert_eq!(record.meas.uwb, UwbEcho { px: 1.0, py: 2.0, pz: 0.0 });
    }

    #[test]
    fn test_records_reach_every_sink() {
        let collector = CollectingSink::default();
        let (engine, _store) = engine(&FusionConfig::default());
        let mut engine = engine
            .with_sink(Box::new(FailingSink))
            .with_sink(Box::new(collector.clone()));

        for ts in 0..5 {
            engine.step(ts).unwrap();
        }

        let records = collector.records();
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].ts, 4);
        assert_eq!(engine.stats().sink_failures, 5);
        assert_eq!(engine.stats().failed_cycles, 0);
    }

    #[test]
    fn test_stalled_broker_does_not_block_cycles() {
        let config = FusionConfig {
            transport: TransportConfig {
                queue_capacity: 2,
                ..TransportConfig::default()
            },
            ..FusionConfig::default()
        };
        // Nobody drains the client queue, as when the broker stops reading
        let (publisher, _subscriber) = MqttBus::open(&config.transport);
        let collector = CollectingSink::default();
        let (engine, _store) = engine(&config);
        let mut engine = engine
            .with_sink(Box::new(TopicPublisher::new(Arc::new(publisher), "sensorfusion/position")))
            .with_sink(Box::new(collector.clone()));

        let started = Instant::now();
        for ts in 0..20 {
            engine.step(ts).unwrap();
        }

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(collector.records().len(), 20);
        assert!(engine.stats().sink_failures >= 18);
        assert_eq!(engine.stats().failed_cycles, 0);
    }

    #[test]
    fn test_singular_innovation_keeps_prediction() {
        let mut config = FusionConfig::default();
        config.filter.process_variance = 0.0;
        config.filter.position_std = 0.0;
        config.filter.acceleration_std = 0.0;
        let (mut engine, store) = engine(&config);
        engine.filter.covariance = Matrix6::zeros();
        store.set_uwb(UwbReading::new(1.0, 2.0, 0.0, true));

        let record = engine.step(0).unwrap();

        assert_eq!(record.source, PositionSource::Uwb);
        assert_eq!((record.ekf.px, record.ekf.py), (-4.6, -2.1));
        assert_eq!(engine.stats().skipped_corrections, 1);
    }

    #[test]
    fn test_gps_conversion_failure_leaves_estimator() {
        let config = FusionConfig {
            frame: FrameConfig {
                origin: GeodeticOrigin { latitude: 0.0, longitude: 0.0, height: 0.0 },
                angle_offset_deg: 0.0,
            },
            ..FusionConfig::default()
        };
        let (mut engine, store) = engine(&config);
        store.set_gps(GpsReading::fixed(0.5, 179.7, 0.0));
        let state = engine.filter().state;

        let result = engine.step(0);

        assert!(matches!(
            result,
            Err(FusionError::Geodesic(GeodesicError::NoConvergence { .. } | GeodesicError::Antipodal))
        ));
        assert_eq!(engine.filter().state, state);
        assert_eq!(engine.stats().failed_cycles, 1);
        assert_eq!(engine.stats().cycles, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FusionConfig::default();
        config.filter.dt = -0.1;
        let store = Arc::new(SensorStore::default());
        assert!(matches!(FusionEngine::new(&config, store), Err(FusionError::Config(_))));
    }

    #[test]
    fn test_spawned_loop_stops_cleanly() {
        let mut config = FusionConfig::default();
        config.filter.dt = 0.01;
        let collector = CollectingSink::default();
        let (engine, store) = engine(&config);
        let handle = engine.with_sink(Box::new(collector.clone())).spawn().unwrap();

        store.set_uwb(UwbReading::new(1.0, 2.0, 0.0, true));
        thread::sleep(Duration::from_millis(150));
        assert!(handle.is_running());

        let stats = handle.stop_and_join().unwrap();
        let records = collector.records();

        assert!(stats.cycles > 0);
        assert_eq!(records.len() as u64, stats.cycles - stats.failed_cycles);
        assert!(records.windows(2).all(|w| w[0].ts <= w[1].ts));
    }
}
