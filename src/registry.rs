//! The sensor registry: every known sensor keyed by its gateway id.
//!
//! The registry is filled from the bulk snapshot and then only touched by
//! the stream reader, one entity at a time. Readers (HTTP handlers, verbose
//! dumps) always get clones, so they never hold a guard across an await.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::gateway::Snapshot;
use crate::metrics::MetricsSink;
use crate::sensor::{Sensor, SensorId};

pub struct SensorRegistry {
    // ---
    sensors: DashMap<SensorId, Sensor>,
    sink: Arc<dyn MetricsSink>,
}

impl SensorRegistry {
    // ---
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sensors: DashMap::new(),
            sink,
        }
    }

    /// Replace the whole registry with the given snapshot and publish every
    /// sensor once. Returns the number of sensors loaded.
    ///
    /// Entries are overwritten in place and only then are missing ids
    /// dropped, so concurrent readers never see an empty registry.
    pub fn load_snapshot(&self, snapshot: &Snapshot) -> usize {
        // ---
        for (id, desc) in snapshot {
            let sensor = Sensor::from_description(desc);
            debug!(id, "loaded {}", sensor);
            self.sensors.insert(*id, sensor);
        }
        self.sensors.retain(|id, _| snapshot.contains_key(id));

        let sensors: Vec<Sensor> = self.list().into_iter().map(|(_, s)| s).collect();
        self.sink.observe_all(&sensors);

        info!("Registry holds {} sensors", self.sensors.len());
        self.sensors.len()
    }

    pub fn get(&self, id: SensorId) -> Option<Sensor> {
        self.sensors.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: SensorId) -> bool {
        self.sensors.contains_key(&id)
    }

    /// All sensors, ordered by id.
    pub fn list(&self) -> Vec<(SensorId, Sensor)> {
        // ---
        let mut sensors: Vec<(SensorId, Sensor)> = self
            .sensors
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        sensors.sort_by_key(|(id, _)| *id);
        sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Mutate one sensor in place.
    ///
    /// `f` runs while the entry is locked and reports whether it changed
    /// anything; if so, a copy of the result is handed to the metrics sink
    /// after the lock is released. Returns `None` for an unknown id.
    pub fn update<F>(&self, id: SensorId, f: F) -> Option<bool>
    where
        F: FnOnce(&mut Sensor) -> bool,
    {
        // ---
        let updated = {
            let mut entry = self.sensors.get_mut(&id)?;
            if f(entry.value_mut()) {
                Some(entry.value().clone())
            } else {
                None
            }
        };

        match updated {
            Some(sensor) => {
                self.sink.observe(&sensor);
                Some(true)
            }
            None => Some(false),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;

    use crate::metrics::{sensor_labels, Metric, SensorMetrics};
    use crate::state::SensorState;
    use serde_json::json;

    /// Sink that remembers every sensor it was shown.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) seen: Mutex<Vec<Sensor>>,
    }

    impl MetricsSink for RecordingSink {
        fn observe(&self, sensor: &Sensor) {
            self.seen.lock().unwrap().push(sensor.clone());
        }
    }

    impl RecordingSink {
        pub(crate) fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    pub(crate) fn snapshot(value: serde_json::Value) -> Snapshot {
        serde_json::from_value(value).unwrap()
    }

    pub(crate) fn scenario_snapshot() -> Snapshot {
        snapshot(json!({
            "1": {
                "config": {"battery": 80, "on": true, "reachable": true},
                "manufacturername": "LUMI",
                "modelid": "lumi.weather",
                "name": "Living room",
                "state": {"temperature": 2150, "lastupdated": "2023-01-01T12:00:00"},
                "type": "ZHATemperature",
                "uniqueid": "00:15:8d:00:01:02:03:04-01-0402"
            }
        }))
    }

    #[test]
    fn test_load_snapshot_publishes_each_sensor() {
        // ---
        let sink = Arc::new(RecordingSink::default());
        let registry = SensorRegistry::new(sink.clone());

        let loaded = registry.load_snapshot(&snapshot(json!({
            "1": {"name": "Temp", "type": "ZHATemperature", "state": {"temperature": 2150}},
            "2": {"name": "Humidity", "type": "ZHAHumidity", "state": {"humidity": 4000}},
            "3": {"name": "Switch", "type": "ZHASwitch", "state": {"buttonevent": 1002}}
        })));

        assert_eq!(loaded, 3);
        assert_eq!(sink.count(), 3);
        let ids: Vec<SensorId> = registry.list().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_snapshot_replaces_content() {
        // ---
        let registry = SensorRegistry::new(Arc::new(RecordingSink::default()));
        registry.load_snapshot(&scenario_snapshot());
        assert!(registry.contains(1));

        registry.load_snapshot(&snapshot(json!({
            "7": {"name": "Door", "type": "ZHAOpenClose", "state": {"open": false}}
        })));

        assert!(!registry.contains(1));
        assert!(registry.contains(7));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reload_forgets_removed_sensor_metrics() {
        // ---
        let metrics = Arc::new(SensorMetrics::new());
        let registry = SensorRegistry::new(metrics.clone());
        registry.load_snapshot(&snapshot(json!({
            "1": {"name": "Temp", "type": "ZHATemperature", "state": {"temperature": 2150}},
            "2": {"name": "Door", "type": "ZHAOpenClose", "state": {"open": true}}
        })));
        let door = registry.get(2).unwrap();
        assert_eq!(metrics.gauge(Metric::Open, &sensor_labels(&door)), Some(1.0));

        registry.load_snapshot(&snapshot(json!({
            "1": {"name": "Temp", "type": "ZHATemperature", "state": {"temperature": 2200}}
        })));

        assert!(!registry.contains(2));
        assert_eq!(metrics.gauge(Metric::Open, &sensor_labels(&door)), None);
        let temp = registry.get(1).unwrap();
        assert_eq!(
            metrics.gauge(Metric::Temperature, &sensor_labels(&temp)),
            Some(22.0)
        );
        assert!(!metrics.render().contains("Door"));
    }

    #[test]
    fn test_scenario_snapshot_entity() {
        // ---
        let registry = SensorRegistry::new(Arc::new(RecordingSink::default()));
        registry.load_snapshot(&scenario_snapshot());

        let sensor = registry.get(1).unwrap();
        assert_eq!(sensor.battery, Some(80));
        match sensor.state {
            SensorState::Temperature(ref s) => assert_eq!(s.temperature, 2150),
            ref other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_update_publishes_only_on_change() {
        // ---
        let sink = Arc::new(RecordingSink::default());
        let registry = SensorRegistry::new(sink.clone());
        registry.load_snapshot(&scenario_snapshot());
        assert_eq!(sink.count(), 1);

        assert_eq!(registry.update(1, |_| false), Some(false));
        assert_eq!(sink.count(), 1);

        assert_eq!(
            registry.update(1, |s| {
                s.battery = Some(50);
                true
            }),
            Some(true)
        );
        assert_eq!(sink.count(), 2);
        assert_eq!(registry.get(1).unwrap().battery, Some(50));

        assert_eq!(registry.update(99, |_| true), None);
        assert!(registry.get(99).is_none());
    }
}
