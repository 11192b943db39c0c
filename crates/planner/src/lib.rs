//! Turns Cartesian G-code into a plan a tank can follow.
//!
//! This is a two-stage pipeline: [`gcode::interpret`] resolves the text into
//! [`gcode::Command`]s (with all modal state filled in), and
//! [`kinematics::convert`] turns those into [`Primitive`]s, starting from a
//! given [`Pose`]. Neither stage can fail.

use serde::{Deserialize, Serialize};
use tankmill_geom::Pose;

pub mod gcode;
pub mod kinematics;

pub use kinematics::{Converter, Primitive, DEFAULT_SPEED};

/// Everything needed to run one file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub primitives: Vec<Primitive>,
    pub source_name: String,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }
}

pub fn convert_gcode(text: &str, start: Pose) -> Vec<Primitive> {
    kinematics::convert(&gcode::interpret(text), start)
}

pub fn plan(text: &str, source_name: impl Into<String>, start: Pose) -> ExecutionPlan {
    ExecutionPlan {
        primitives: convert_gcode(text, start),
        source_name: source_name.into(),
    }
}
