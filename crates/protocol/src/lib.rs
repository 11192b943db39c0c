//! Messages exchanged with the tank's motion controller.
//!
//! The controller speaks JSON over HTTP; every request below is the body of
//! one endpoint, and every endpoint answers with a small acknowledgement.

#![cfg_attr(not(feature = "std"), no_std)]

use serde::{Deserialize, Serialize};

pub const MOVE_PATH: &str = "/api/control";
pub const DEPTH_PATH: &str = "/api/control/spindle/depth";
pub const ESTOP_PATH: &str = "/api/control/estop";
pub const TOOL_PATH: &str = "/api/spindle";
pub const TOOL_SPEED_PATH: &str = "/api/spindle/speed";
pub const BUSY_PATH: &str = "/api/status/busy";
pub const STATUS_PATH: &str = "/api/status";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Forward,
    Backward,
    /// Counter-clockwise, in place.
    TurnLeft,
    /// Clockwise, in place.
    TurnRight,
}

impl Direction {
    /// The in-place turn that rotates by a signed angle (counter-clockwise positive).
    pub fn for_rotation(deg: f64) -> Self {
        if deg > 0.0 {
            Direction::TurnLeft
        } else {
            Direction::TurnRight
        }
    }
}

/// Drive both tracks. For turns, `step` is the distance each track travels.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub direction: Direction,
    pub speed: f32,
    pub step: f32,
}

/// Move the depth actuator by a relative amount.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthRequest {
    /// Positive moves down (into the work), negative moves up.
    pub step: f32,
    /// Always positive.
    pub speed: f32,
}

impl DepthRequest {
    pub fn new(step: f32, speed: f32) -> Self {
        DepthRequest {
            step,
            speed: libm::fabsf(speed),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub enable: bool,
}

/// Spindle speed as a percentage of the controller's maximum.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpindleSpeedRequest {
    pub speed: u8,
}

impl SpindleSpeedRequest {
    /// G-code `S` words are in RPM; the controller takes 0-100, one percent
    /// per hundred RPM.
    pub fn from_rpm(rpm: f64) -> Self {
        let percent = libm::round(rpm / 100.0).clamp(0.0, 100.0);
        SpindleSpeedRequest {
            speed: percent as u8,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyStatus {
    pub busy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_names() {
        let req = MoveRequest {
            direction: Direction::TurnLeft,
            speed: 500.0,
            step: 12.5,
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"direction":"turnLeft","speed":500.0,"step":12.5}"#
        );
        let busy: BusyStatus = serde_json::from_str(r#"{"busy":false}"#).unwrap();
        assert!(!busy.busy);
    }

    #[test]
    fn rotation_direction() {
        assert_eq!(Direction::for_rotation(90.0), Direction::TurnLeft);
        assert_eq!(Direction::for_rotation(-0.5), Direction::TurnRight);
    }

    #[test]
    fn depth_speed_is_unsigned() {
        let req = DepthRequest::new(-1.5, -300.0);
        assert_eq!(req.step, -1.5);
        assert_eq!(req.speed, 300.0);
    }

    #[test]
    fn spindle_percent() {
        assert_eq!(SpindleSpeedRequest::from_rpm(12000.0).speed, 100);
        assert_eq!(SpindleSpeedRequest::from_rpm(5049.0).speed, 50);
        assert_eq!(SpindleSpeedRequest::from_rpm(0.0).speed, 0);
    }

    proptest! {
        #[test]
        fn test_spindle_percent_in_range(rpm in -1e6..1e6f64) {
            prop_assert!(SpindleSpeedRequest::from_rpm(rpm).speed <= 100);
        }
    }
}
