//! Server-side attributes and the foreground slot.
//!
//! Every mutation goes through a setter that publishes a `values` update
//! carrying the changed key, so subscribers never need to poll `refresh`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use shared_types::{
    DumbbellState, HolderType, PortState, Position, PreparedState, PuckState, RobotStatus,
    SampleLocations, ServerSnapshot, PORTS_PER_POSITION, PUCK_SLOTS,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::hardware::HardwareUpdate;
use crate::reporter::SharedOperationReporter;

#[derive(Debug)]
struct Values {
    motors_locked: bool,
    auto_heat_cool_allowed: bool,
    status: RobotStatus,
    pins_mounted: u32,
    pins_lost: u32,
    sample_locations: SampleLocations,
    dumbbell_state: DumbbellState,
    holder_types: BTreeMap<Position, HolderType>,
    height_errors: BTreeMap<Position, Option<f64>>,
    puck_states: BTreeMap<Position, BTreeMap<String, PuckState>>,
    port_states: BTreeMap<Position, Vec<PortState>>,
    port_distances: BTreeMap<Position, Vec<Option<f64>>>,
    last_calibrations: BTreeMap<String, String>,
}

impl Default for Values {
    fn default() -> Self {
        Self {
            motors_locked: false,
            auto_heat_cool_allowed: true,
            status: RobotStatus::default(),
            pins_mounted: 0,
            pins_lost: 0,
            sample_locations: SampleLocations::default(),
            dumbbell_state: DumbbellState::default(),
            holder_types: Position::ALL
                .iter()
                .map(|p| (*p, HolderType::Unknown))
                .collect(),
            height_errors: Position::ALL.iter().map(|p| (*p, None)).collect(),
            puck_states: Position::ALL
                .iter()
                .map(|p| {
                    let slots = PUCK_SLOTS
                        .iter()
                        .map(|slot| (slot.to_string(), PuckState::Unknown))
                        .collect();
                    (*p, slots)
                })
                .collect(),
            port_states: Position::ALL
                .iter()
                .map(|p| (*p, vec![PortState::Unknown; PORTS_PER_POSITION]))
                .collect(),
            port_distances: Position::ALL
                .iter()
                .map(|p| (*p, vec![None; PORTS_PER_POSITION]))
                .collect(),
            last_calibrations: BTreeMap::new(),
        }
    }
}

/// Overwrite `target[start..]` with `values`, dropping anything past the end.
fn splice<T: Clone>(target: &mut [T], start: usize, values: &[T]) {
    for (slot, value) in target.iter_mut().skip(start).zip(values) {
        *slot = value.clone();
    }
}

pub struct ServerState {
    robot_name: String,
    values: Mutex<Values>,
    reporter: SharedOperationReporter,
}

impl ServerState {
    pub fn new(robot_name: impl Into<String>, reporter: SharedOperationReporter) -> Self {
        Self {
            robot_name: robot_name.into(),
            values: Mutex::new(Values::default()),
            reporter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Values> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish<T: Serialize>(&self, entries: &[(&str, &T)]) {
        let mut values = serde_json::Map::new();
        for (key, value) in entries {
            match serde_json::to_value(value) {
                Ok(value) => {
                    values.insert((*key).to_string(), value);
                }
                Err(e) => tracing::warn!(key = *key, error = %e, "Failed to serialize value"),
            }
        }
        if !values.is_empty() {
            self.reporter.values_update(values);
        }
    }

    pub fn motors_locked(&self) -> bool {
        self.lock().motors_locked
    }

    pub fn auto_heat_cool_allowed(&self) -> bool {
        self.lock().auto_heat_cool_allowed
    }

    pub fn set_motors_locked(&self, locked: bool) {
        self.lock().motors_locked = locked;
        self.publish(&[("motors_locked", &locked)]);
    }

    pub fn set_auto_heat_cool_allowed(&self, allowed: bool) {
        self.lock().auto_heat_cool_allowed = allowed;
        self.publish(&[("auto_heat_cool_allowed", &allowed)]);
    }

    pub fn set_mount_counters(&self, pins_mounted: u32, pins_lost: u32) {
        {
            let mut values = self.lock();
            values.pins_mounted = pins_mounted;
            values.pins_lost = pins_lost;
        }
        self.publish(&[("pins_mounted", &pins_mounted), ("pins_lost", &pins_lost)]);
    }

    pub fn set_sample_locations(&self, locations: SampleLocations) {
        self.lock().sample_locations = locations.clone();
        self.publish(&[("sample_locations", &locations)]);
    }

    /// Apply controller telemetry.
    pub fn apply(&self, update: HardwareUpdate) {
        match update {
            HardwareUpdate::CassetteType {
                position,
                holder_type,
                min_height_error,
            } => {
                let (holder_types, height_errors) = {
                    let mut values = self.lock();
                    values.holder_types.insert(position, holder_type);
                    values.height_errors.insert(position, min_height_error);
                    (values.holder_types.clone(), values.height_errors.clone())
                };
                self.publish(&[("holder_types", &holder_types)]);
                self.publish(&[("height_errors", &height_errors)]);
            }
            HardwareUpdate::PuckStates {
                position,
                start,
                values: states,
            } => {
                if states.is_empty() {
                    return;
                }
                let puck_states = {
                    let mut values = self.lock();
                    let slots = values.puck_states.entry(position).or_default();
                    for (slot, state) in PUCK_SLOTS.iter().skip(start).zip(states) {
                        slots.insert(slot.to_string(), state);
                    }
                    values.puck_states.clone()
                };
                self.publish(&[("puck_states", &puck_states)]);
            }
            HardwareUpdate::PortStates {
                position,
                start,
                values: states,
            } => {
                let port_states = {
                    let mut values = self.lock();
                    if let Some(ports) = values.port_states.get_mut(&position) {
                        splice(ports, start, &states);
                    }
                    values.port_states.clone()
                };
                self.publish(&[("port_states", &port_states)]);
            }
            HardwareUpdate::SampleDistances {
                position,
                start,
                values: distances,
            } => {
                let port_distances = {
                    let mut values = self.lock();
                    if let Some(ports) = values.port_distances.get_mut(&position) {
                        splice(ports, start, &distances);
                    }
                    values.port_distances.clone()
                };
                self.publish(&[("port_distances", &port_distances)]);
            }
            HardwareUpdate::SampleLocations(locations) => self.set_sample_locations(locations),
            HardwareUpdate::MountCounters {
                pins_mounted,
                pins_lost,
            } => self.set_mount_counters(pins_mounted, pins_lost),
            HardwareUpdate::Calibration { name, timestamp } => {
                let last_calibrations = {
                    let mut values = self.lock();
                    values.last_calibrations.insert(name, timestamp);
                    values.last_calibrations.clone()
                };
                self.publish(&[("last_calibrations", &last_calibrations)]);
            }
            HardwareUpdate::Dumbbell(state) => {
                self.lock().dumbbell_state = state;
                self.publish(&[("dumbbell_state", &state)]);
            }
            HardwareUpdate::Status(status) => {
                self.lock().status = status;
                self.publish(&[("status", &status)]);
            }
        }
    }

    pub fn snapshot(&self, prepared: PreparedState) -> ServerSnapshot {
        let values = self.lock();
        ServerSnapshot {
            robot_name: self.robot_name.clone(),
            motors_locked: values.motors_locked,
            auto_heat_cool_allowed: values.auto_heat_cool_allowed,
            status: values.status,
            pins_mounted: values.pins_mounted,
            pins_lost: values.pins_lost,
            sample_locations: values.sample_locations.clone(),
            dumbbell_state: values.dumbbell_state,
            holder_types: values.holder_types.clone(),
            height_errors: values.height_errors.clone(),
            puck_states: values.puck_states.clone(),
            port_states: values.port_states.clone(),
            port_distances: values.port_distances.clone(),
            last_calibrations: values.last_calibrations.clone(),
            prepared,
        }
    }
}

/// Single slot shared by all foreground operations. Never waits.
#[derive(Debug, Clone)]
pub struct ForegroundSlot {
    semaphore: Arc<Semaphore>,
}

impl Default for ForegroundSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundSlot {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the slot if free. The slot is released when the permit drops.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    pub fn is_held(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}
