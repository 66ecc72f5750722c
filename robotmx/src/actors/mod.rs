pub mod robot_server;

pub use robot_server::{
    spawn_telemetry_forwarder, RobotServerActor, RobotServerArguments, RobotServerMsg,
    SubmittedOperation,
};
