//! Basic geometry of a differential-drive ("tank") machine, including the
//! conversion from a Cartesian target to a rotate-then-drive move.
//!
//! Coordinates are millimeters in the work plane. Headings are degrees,
//! measured counter-clockwise from the +X axis (so 90 degrees faces +Y),
//! which is the usual `atan2` convention and *not* a compass bearing.
//!
//! This crate supports `no_std` and uses `libm` so that the same math can
//! run on the actuator side if it ever needs to.

#![cfg_attr(not(feature = "std"), no_std)]

use core::f64::consts::PI;

pub type Angle = euclid::Angle<f64>;
pub type Point = euclid::Point2D<f64, Mm>;

pub struct Mm;

pub type Len = euclid::Length<f64, Mm>;

pub trait LenExt {
    fn mm(self) -> Len;
}

impl LenExt for f64 {
    fn mm(self) -> Len {
        Len::new(self)
    }
}

/// Turns smaller than this (in degrees) are treated as noise by the executor.
pub const MIN_ROTATION_DEG: f64 = 1.0;

/// Drives shorter than this (in mm) are treated as noise by the executor.
pub const MIN_DISTANCE_MM: f64 = 0.1;

/// Depth changes smaller than this (in mm) are never sent to the actuator.
pub const MIN_DEPTH_MM: f64 = 0.001;

/// Two XY positions closer than this are the same position.
pub const XY_EPSILON_MM: f64 = 1e-6;

/// Normalizes a heading into `[0, 360)`.
pub fn normalize_heading(deg: f64) -> f64 {
    // The second fmod folds the `-tiny + 360 == 360` rounding case back to zero.
    libm::fmod(libm::fmod(deg, 360.0) + 360.0, 360.0)
}

/// Normalizes a relative turn into `(-180, 180]`, so that the machine always
/// takes the shorter way around.
pub fn shortest_turn(deg: f64) -> f64 {
    let d = normalize_heading(deg);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Where the planner believes the machine is, and which way it is facing.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Degrees in `[0, 360)`.
    pub heading: f64,
}

impl Default for Pose {
    fn default() -> Self {
        Pose {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            heading: 90.0,
        }
    }
}

/// A partial overwrite of a [`Pose`], for homing and calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PoseUpdate {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub heading: Option<f64>,
}

impl Pose {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn heading_angle(&self) -> Angle {
        Angle::degrees(self.heading)
    }

    /// Turns in place by `deg` (counter-clockwise positive).
    pub fn rotate(&mut self, deg: f64) {
        self.heading = normalize_heading(self.heading + deg);
    }

    /// Drives straight ahead along the current heading.
    pub fn advance(&mut self, distance: f64) {
        let rad = self.heading_angle().get();
        self.x += distance * libm::cos(rad);
        self.y += distance * libm::sin(rad);
    }

    pub fn apply(&mut self, update: &PoseUpdate) {
        if let Some(x) = update.x {
            self.x = x;
        }
        if let Some(y) = update.y {
            self.y = y;
        }
        if let Some(z) = update.z {
            self.z = z;
        }
        if let Some(heading) = update.heading {
            self.heading = normalize_heading(heading);
        }
    }
}

/// The rotate-then-drive decomposition of a move to an XY target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveToXY {
    /// Absolute direction of travel, in `(-180, 180]`.
    pub target_angle: f64,
    /// How far to turn before driving, in `(-180, 180]`.
    pub rotation: f64,
    pub distance: f64,
}

pub fn calculate_move_to_xy(from: &Pose, target: Point) -> MoveToXY {
    let delta = target - from.position();
    let target_angle = Angle::radians(libm::atan2(delta.y, delta.x)).to_degrees();
    MoveToXY {
        target_angle,
        rotation: shortest_turn(target_angle - from.heading),
        distance: libm::hypot(delta.x, delta.y),
    }
}

pub struct ConfigBuilder {
    track_width: Len,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            track_width: 250.0.mm(),
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> TankConfig {
        TankConfig {
            track_width: self.track_width,
        }
    }

    pub fn with_track_width(&mut self, track_width: Len) -> &mut Self {
        self.track_width = track_width;
        self
    }
}

/// The geometric configuration of a tank.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct TankConfig {
    /// The distance between the two tracks. When turning in place, each
    /// track runs along a circle with this diameter.
    pub track_width: Len,
}

impl Default for TankConfig {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

impl TankConfig {
    /// How far each track has to travel to turn in place by `rotation_deg`.
    pub fn rotation_arc_length(&self, rotation_deg: f64) -> Len {
        self.track_width * PI * (libm::fabs(rotation_deg) / 360.0)
    }
}
