//! Conversion from Cartesian commands to things a tank can actually do.
//!
//! A tank can't move sideways, so every XY move becomes "turn in place to
//! face the target, then drive straight." The depth axis is a separate
//! actuator and gets its own primitive.

use serde::{Deserialize, Serialize};
use tankmill_geom::{calculate_move_to_xy, Point, Pose, MIN_DEPTH_MM, XY_EPSILON_MM};

use crate::gcode::{Command, Mode, ToolKind};

/// Speed used when a file never sets a feedrate.
pub const DEFAULT_SPEED: f64 = 500.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Primitive {
    /// A mode change in the source file. Has no physical effect.
    ModeNote { kind: Mode },
    RotateAndMove {
        target_x: f64,
        target_y: f64,
        /// Counter-clockwise positive, in `(-180, 180]`.
        rotation_degrees: f64,
        distance_mm: f64,
        speed: f64,
    },
    DepthMove { target_z: f64, speed: f64 },
    ToolCommand { enable: bool, speed: Option<f64> },
    Comment { text: String },
}

impl Primitive {
    /// Does executing this primitive involve talking to the machine?
    pub fn is_physical(&self) -> bool {
        !matches!(self, Primitive::ModeNote { .. } | Primitive::Comment { .. })
    }
}

/// Simulates the tank while converting, so that each primitive is planned
/// from where the previous one left off.
#[derive(Clone, Debug)]
pub struct Converter {
    pose: Pose,
    last_feedrate: Option<f64>,
    spindle_on: bool,
    held_speed: Option<f64>,
}

impl Converter {
    pub fn new(start: Pose) -> Self {
        Converter {
            pose: start,
            last_feedrate: None,
            spindle_on: false,
            held_speed: None,
        }
    }

    /// Where the tank will be after everything pushed so far.
    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn push(&mut self, cmd: &Command, out: &mut Vec<Primitive>) {
        match cmd {
            Command::Comment { text } => out.push(Primitive::Comment { text: text.clone() }),
            Command::ModeSwitch { kind } => out.push(Primitive::ModeNote { kind: *kind }),
            Command::Move {
                x, y, z, feedrate, ..
            } => self.push_move(*x, *y, *z, *feedrate, out),
            Command::ToolControl { kind, speed } => self.push_tool(*kind, *speed, out),
        }
    }

    fn push_move(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feedrate: Option<f64>,
        out: &mut Vec<Primitive>,
    ) {
        let speed = feedrate.or(self.last_feedrate).unwrap_or(DEFAULT_SPEED);
        if feedrate.is_some() {
            self.last_feedrate = feedrate;
        }

        let target = Point::new(x.unwrap_or(self.pose.x), y.unwrap_or(self.pose.y));
        let mv = calculate_move_to_xy(&self.pose, target);
        if mv.distance > XY_EPSILON_MM {
            out.push(Primitive::RotateAndMove {
                target_x: target.x,
                target_y: target.y,
                rotation_degrees: mv.rotation,
                distance_mm: mv.distance,
                speed,
            });
            self.pose.rotate(mv.rotation);
            // Land exactly on the target, so rounding never accumulates.
            self.pose.x = target.x;
            self.pose.y = target.y;
        }

        if let Some(z) = z {
            if (z - self.pose.z).abs() >= MIN_DEPTH_MM {
                out.push(Primitive::DepthMove { target_z: z, speed });
                self.pose.z = z;
            }
        }
    }

    fn push_tool(&mut self, kind: ToolKind, speed: Option<f64>, out: &mut Vec<Primitive>) {
        match kind {
            ToolKind::SpindleOn => {
                if speed.is_some() {
                    self.held_speed = speed;
                }
                self.spindle_on = true;
                out.push(Primitive::ToolCommand {
                    enable: true,
                    speed: self.held_speed,
                });
            }
            ToolKind::SpindleOff => {
                self.spindle_on = false;
                out.push(Primitive::ToolCommand {
                    enable: false,
                    speed: None,
                });
            }
            ToolKind::SpindleSpeed => {
                if speed.is_some() {
                    self.held_speed = speed;
                }
                if self.spindle_on {
                    out.push(Primitive::ToolCommand {
                        enable: true,
                        speed: self.held_speed,
                    });
                }
            }
        }
    }
}

pub fn convert(commands: &[Command], start: Pose) -> Vec<Primitive> {
    let mut converter = Converter::new(start);
    let mut ret = Vec::with_capacity(commands.len());
    for cmd in commands {
        converter.push(cmd, &mut ret);
    }
    ret
}
