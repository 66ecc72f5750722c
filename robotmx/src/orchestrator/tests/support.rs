use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shared_types::{
    CalibrationTarget, OperationHandle, OperationStage, OperationUpdate, Port, PortState,
    ProbeRequest,
};
use tokio::sync::{Barrier, Notify};

use crate::hardware::{HardwareRobot, RobotError, RobotResult};
use crate::orchestrator::{MountOrchestrator, OrchestratorConfig};
use crate::reporter::OperationReporter;
use crate::safety::{SafetyError, SafetyGateway};

pub(crate) const HANDLE: OperationHandle = OperationHandle(101);

pub(crate) fn port(code: &str) -> Port {
    Port::from_code(code).unwrap()
}

/// Parks a mocked call until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub(crate) async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct Hooks {
    failures: HashMap<String, RobotError>,
    gates: HashMap<&'static str, Arc<Gate>>,
    barriers: HashMap<&'static str, Arc<Barrier>>,
    panics: HashSet<&'static str>,
}

/// Scripted robot: records every call, fails or blocks on request.
#[derive(Default)]
pub(crate) struct MockRobot {
    calls: Mutex<Vec<String>>,
    hooks: Mutex<Hooks>,
    mounted: Mutex<Option<Port>>,
}

impl MockRobot {
    /// Fail the call recorded as `call`, e.g. `go_to_standby` or `mount(L A 1)`.
    pub(crate) fn fail(&self, call: &str, message: &str) {
        self.hooks
            .lock()
            .unwrap()
            .failures
            .insert(call.to_string(), RobotError::Failed(message.to_string()));
    }

    pub(crate) fn gate(&self, method: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.hooks.lock().unwrap().gates.insert(method, gate.clone());
        gate
    }

    pub(crate) fn barrier(&self, method: &'static str, barrier: Arc<Barrier>) {
        self.hooks.lock().unwrap().barriers.insert(method, barrier);
    }

    /// Panic inside `method`, after any gate or barrier on it.
    pub(crate) fn panic_on(&self, method: &'static str) {
        self.hooks.lock().unwrap().panics.insert(method);
    }

    pub(crate) fn set_mounted(&self, port: Option<Port>) {
        *self.mounted.lock().unwrap() = port;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub(crate) fn called(&self, call: &str) -> bool {
        self.count(call) > 0
    }

    pub(crate) fn called_prefix(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    async fn record(&self, method: &'static str, call: String) -> Result<(), RobotError> {
        let (gate, barrier, failure, panics) = {
            let hooks = self.hooks.lock().unwrap();
            (
                hooks.gates.get(method).cloned(),
                hooks.barriers.get(method).cloned(),
                hooks.failures.get(&call).cloned(),
                hooks.panics.contains(method),
            )
        };
        self.calls.lock().unwrap().push(call);
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if panics {
            panic!("{method} panicked");
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn task(&self, method: &'static str, call: String) -> RobotResult {
        self.record(method, call).await?;
        Ok(format!("{method} done"))
    }
}

#[async_trait]
impl HardwareRobot for MockRobot {
    async fn prepare_for_mount(&self) -> RobotResult {
        self.task("prepare_for_mount", "prepare_for_mount".into())
            .await
    }

    async fn mount(&self, port: &Port) -> RobotResult {
        self.task("mount", format!("mount({port})")).await
    }

    async fn dismount(&self, port: &Port) -> RobotResult {
        self.task("dismount", format!("dismount({port})")).await
    }

    async fn prefetch(&self, port: &Port) -> RobotResult {
        self.task("prefetch", format!("prefetch({port})")).await
    }

    async fn return_prefetch(&self) -> RobotResult {
        self.task("return_prefetch", "return_prefetch".into()).await
    }

    async fn return_placer_and_prefetch(&self, port: Option<&Port>) -> RobotResult {
        let arg = port.map_or_else(|| "none".to_string(), |p| p.code());
        self.task(
            "return_placer_and_prefetch",
            format!("return_placer_and_prefetch({arg})"),
        )
        .await
    }

    async fn go_to_standby(&self) -> RobotResult {
        self.task("go_to_standby", "go_to_standby".into()).await
    }

    async fn go_to_home(&self) -> RobotResult {
        self.task("go_to_home", "go_to_home".into()).await
    }

    async fn park_robot(&self, dismount: bool) -> RobotResult {
        self.task("park_robot", format!("park_robot({dismount})"))
            .await
    }

    async fn calibrate(&self, target: CalibrationTarget, run_args: &str) -> RobotResult {
        self.task(
            "calibrate",
            format!("calibrate({}, {run_args})", target.as_str()),
        )
        .await
    }

    async fn probe(&self, ports: &ProbeRequest) -> RobotResult {
        self.task("probe", format!("probe({})", ports.flags(shared_types::Position::Left)))
            .await
    }

    async fn reset_ports(&self, ports: &ProbeRequest) -> RobotResult {
        self.task(
            "reset_ports",
            format!("reset_ports({})", ports.flags(shared_types::Position::Left)),
        )
        .await
    }

    async fn set_port_state(&self, port: &Port, state: PortState) -> RobotResult {
        self.task(
            "set_port_state",
            format!("set_port_state({port}, {})", state.code()),
        )
        .await
    }

    async fn set_gripper(&self, closed: bool) -> Result<(), RobotError> {
        self.record("set_gripper", format!("set_gripper({closed})"))
            .await
    }

    async fn set_lid(&self, open: bool) -> Result<(), RobotError> {
        self.record("set_lid", format!("set_lid({open})")).await
    }

    async fn set_heater(&self, on: bool) -> Result<(), RobotError> {
        self.record("set_heater", format!("set_heater({on})")).await
    }

    async fn set_auto_heat_cool_allowed(&self, allowed: bool) -> Result<(), RobotError> {
        self.record(
            "set_auto_heat_cool_allowed",
            format!("set_auto_heat_cool_allowed({allowed})"),
        )
        .await
    }

    async fn set_motors_locked(&self, locked: bool) -> Result<(), RobotError> {
        self.record("set_motors_locked", format!("set_motors_locked({locked})"))
            .await
    }

    async fn mounted_sample(&self) -> Result<Option<Port>, RobotError> {
        self.record("mounted_sample", "mounted_sample".into()).await?;
        Ok(*self.mounted.lock().unwrap())
    }
}

#[derive(Default)]
pub(crate) struct MockSafety {
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, SafetyError>>,
    barriers: Mutex<HashMap<&'static str, Arc<Barrier>>>,
}

impl MockSafety {
    pub(crate) fn fail_make_safe(&self, message: &str) {
        self.failures.lock().unwrap().insert(
            "move_to_safe_position",
            SafetyError::Failed(message.to_string()),
        );
    }

    pub(crate) fn fail_return(&self, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert("return_positions", SafetyError::Failed(message.to_string()));
    }

    pub(crate) fn barrier(&self, method: &'static str, barrier: Arc<Barrier>) {
        self.barriers.lock().unwrap().insert(method, barrier);
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == method)
            .count()
    }

    pub(crate) fn called(&self, method: &str) -> bool {
        self.count(method) > 0
    }

    async fn record(&self, method: &'static str) -> Result<(), SafetyError> {
        self.calls.lock().unwrap().push(method);
        let barrier = self.barriers.lock().unwrap().get(method).cloned();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        match self.failures.lock().unwrap().get(method).cloned() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SafetyGateway for MockSafety {
    async fn move_to_safe_position(&self) -> Result<(), SafetyError> {
        self.record("move_to_safe_position").await
    }

    async fn return_positions(&self) -> Result<(), SafetyError> {
        self.record("return_positions").await
    }
}

#[derive(Default)]
pub(crate) struct RecordingReporter {
    operations: Mutex<Vec<OperationUpdate>>,
    values: Mutex<Vec<serde_json::Map<String, serde_json::Value>>>,
}

impl RecordingReporter {
    pub(crate) fn updates(&self, handle: OperationHandle) -> Vec<OperationUpdate> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.handle == handle)
            .cloned()
            .collect()
    }

    pub(crate) fn end_update(&self, handle: OperationHandle) -> OperationUpdate {
        let ends: Vec<_> = self
            .updates(handle)
            .into_iter()
            .filter(|u| u.stage == OperationStage::End)
            .collect();
        assert_eq!(ends.len(), 1, "expected exactly one end update");
        ends[0].clone()
    }

    /// Every published value of `key`, in order.
    pub(crate) fn history(&self, key: &str) -> Vec<serde_json::Value> {
        self.values
            .lock()
            .unwrap()
            .iter()
            .filter_map(|values| values.get(key).cloned())
            .collect()
    }
}

impl OperationReporter for RecordingReporter {
    fn operation_update(&self, update: OperationUpdate) {
        self.operations.lock().unwrap().push(update);
    }

    fn values_update(&self, values: serde_json::Map<String, serde_json::Value>) {
        self.values.lock().unwrap().push(values);
    }
}

pub(crate) struct Harness {
    pub orchestrator: Arc<MountOrchestrator>,
    pub robot: Arc<MockRobot>,
    pub safety: Arc<MockSafety>,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_prepare_timeout(Duration::from_secs(120))
    }

    pub(crate) fn with_prepare_timeout(prepare_timeout: Duration) -> Self {
        let robot = Arc::new(MockRobot::default());
        let safety = Arc::new(MockSafety::default());
        let reporter = Arc::new(RecordingReporter::default());
        let orchestrator = Arc::new(MountOrchestrator::new(
            OrchestratorConfig {
                robot_name: "ROBOT_MX_TEST".to_string(),
                prepare_timeout,
            },
            robot.clone(),
            safety.clone(),
            reporter.clone(),
        ));
        Self {
            orchestrator,
            robot,
            safety,
            reporter,
        }
    }

    /// Both flags must be back to their idle values.
    pub(crate) fn assert_guards_released(&self) {
        let state = self.orchestrator.state();
        assert!(!state.motors_locked(), "motors still locked");
        assert!(state.auto_heat_cool_allowed(), "auto heat/cool still disabled");
    }
}
