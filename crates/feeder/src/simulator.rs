//! A pretend motion controller, for dry runs and tests.
//!
//! It keeps track of where the tank would be if it did exactly what it was
//! told, records every request, and can draw the resulting path as an SVG.

use std::{path::Path as FsPath, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use svg::{
    node::element::{path::Data, Circle, Path},
    Document,
};
use tankmill_geom::{Point, Pose, TankConfig};
use tankmill_protocol::{
    BusyStatus, DepthRequest, Direction, MoveRequest, SpindleSpeedRequest, ToolRequest,
};

use crate::connection::Actuator;

/// A request that reached the simulated controller.
#[derive(Clone, Debug, PartialEq)]
pub enum ActuatorCall {
    Move(MoveRequest),
    Depth(DepthRequest),
    Tool(ToolRequest),
    ToolSpeed(SpindleSpeedRequest),
    EmergencyStop,
}

#[derive(Clone, Copy, Debug)]
struct Segment {
    start: Point,
    end: Point,
    cutting: bool,
}

struct SimState {
    config: TankConfig,
    pose: Pose,
    spindle_on: bool,
    busy_polls: u32,
    busy_polls_left: u32,
    never_idle: bool,
    fail_after: Option<usize>,
    fail_emergency_stop: bool,
    latency: Duration,
    // A motion was sent and no poll has reported idle since.
    in_flight: bool,
    overlapping: usize,
    requests: usize,
    calls: Vec<ActuatorCall>,
    segs: Vec<Segment>,
}

impl SimState {
    // Counts a motion or tool request, failing it if it's the injected failure.
    fn accept(&mut self) -> anyhow::Result<()> {
        self.requests += 1;
        match self.fail_after {
            Some(n) if self.requests > n => {
                anyhow::bail!("simulated controller rejected request {}", self.requests)
            }
            _ => Ok(()),
        }
    }

    fn start_motion(&mut self) {
        if self.in_flight {
            log::warn!("simulated controller got a motion while still moving");
            self.overlapping += 1;
        }
        self.in_flight = true;
        self.busy_polls_left = self.busy_polls;
    }
}

pub struct SimulatedActuator {
    inner: Mutex<SimState>,
}

impl SimulatedActuator {
    pub fn new(config: TankConfig, start: Pose) -> Self {
        SimulatedActuator {
            inner: Mutex::new(SimState {
                config,
                pose: start,
                spindle_on: false,
                busy_polls: 2,
                busy_polls_left: 0,
                never_idle: false,
                fail_after: None,
                fail_emergency_stop: false,
                latency: Duration::ZERO,
                in_flight: false,
                overlapping: 0,
                requests: 0,
                calls: Vec::new(),
                segs: Vec::new(),
            }),
        }
    }

    /// How many busy polls each motion reports before finishing.
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.inner.lock().busy_polls = polls;
        self
    }

    /// Never finish a motion.
    pub fn never_idle(self) -> Self {
        self.inner.lock().never_idle = true;
        self
    }

    /// Accept `n` motion or tool requests, then reject the rest.
    pub fn fail_after(self, n: usize) -> Self {
        self.inner.lock().fail_after = Some(n);
        self
    }

    /// Refuse to acknowledge emergency stops.
    pub fn fail_emergency_stop(self) -> Self {
        self.inner.lock().fail_emergency_stop = true;
        self
    }

    /// Take this long to answer every request.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.inner.lock().latency = latency;
        self
    }

    /// How many motions arrived before the previous one was confirmed finished.
    pub fn overlapping_motions(&self) -> usize {
        self.inner.lock().overlapping
    }

    async fn respond(&self) {
        let latency = self.inner.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.inner.lock().calls.clone()
    }

    /// Where the tank physically is, as opposed to where the planner thinks it is.
    pub fn pose(&self) -> Pose {
        self.inner.lock().pose
    }

    pub fn spindle_on(&self) -> bool {
        self.inner.lock().spindle_on
    }

    pub fn illustrate(&self, out: &FsPath) -> anyhow::Result<()> {
        let segs = self.inner.lock().segs.clone();
        // Multiply all dimensions by 10 because firefox doesn't like to see small svgs.
        let scale = 10.0;
        // SVG's y axis points down.
        let to_svg = |p: Point| ((p.x * scale) as f32, (-p.y * scale) as f32);

        let mut min = (0.0f32, 0.0f32);
        let mut max = (0.0f32, 0.0f32);
        let mut lines = Vec::new();
        let mut points = Vec::new();
        for seg in &segs {
            let start = to_svg(seg.start);
            let end = to_svg(seg.end);
            for (x, y) in [start, end] {
                min = (min.0.min(x), min.1.min(y));
                max = (max.0.max(x), max.1.max(y));
            }

            points.push(
                Circle::new()
                    .set("cx", start.0)
                    .set("cy", start.1)
                    .set("r", 2.0)
                    .set("fill", "blue"),
            );

            let data = Data::new().move_to(start).line_to(end);
            let mut line = Path::new()
                .set("fill", "none")
                .set("stroke", if seg.cutting { "black" } else { "gray" })
                .set("stroke-width", 1)
                .set("d", data);
            if !seg.cutting {
                line = line.set("stroke-dasharray", "4 4");
            }
            lines.push(line);
        }

        let margin = 20.0f32;
        let mut document = Document::new().set(
            "viewBox",
            (
                min.0 - margin,
                min.1 - margin,
                max.0 - min.0 + 2.0 * margin,
                max.1 - min.1 + 2.0 * margin,
            ),
        );
        for line in lines {
            document = document.add(line);
        }
        for p in points {
            document = document.add(p);
        }
        svg::save(out, &document)?;
        log::info!("wrote {} segments to {}", segs.len(), out.display());

        Ok(())
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn move_by(&self, direction: Direction, speed: f64, step: f64) -> anyhow::Result<()> {
        self.respond().await;
        let mut inner = self.inner.lock();
        inner.accept()?;
        inner.calls.push(ActuatorCall::Move(MoveRequest {
            direction,
            speed: speed as f32,
            step: step as f32,
        }));

        let circumference = inner.config.rotation_arc_length(360.0).get();
        let turn = step / circumference * 360.0;
        let start = inner.pose.position();
        match direction {
            Direction::TurnLeft => inner.pose.rotate(turn),
            Direction::TurnRight => inner.pose.rotate(-turn),
            Direction::Forward => inner.pose.advance(step),
            Direction::Backward => inner.pose.advance(-step),
        }
        if matches!(direction, Direction::Forward | Direction::Backward) {
            let seg = Segment {
                start,
                end: inner.pose.position(),
                cutting: inner.spindle_on,
            };
            inner.segs.push(seg);
        }
        inner.start_motion();
        Ok(())
    }

    async fn set_depth(&self, step: f64, speed: f64) -> anyhow::Result<()> {
        self.respond().await;
        let mut inner = self.inner.lock();
        inner.accept()?;
        inner
            .calls
            .push(ActuatorCall::Depth(DepthRequest::new(step as f32, speed as f32)));
        inner.pose.z += step;
        inner.start_motion();
        Ok(())
    }

    async fn set_tool(&self, enable: bool, speed: Option<f64>) -> anyhow::Result<()> {
        self.respond().await;
        let mut inner = self.inner.lock();
        inner.accept()?;
        inner.calls.push(ActuatorCall::Tool(ToolRequest { enable }));
        if let (true, Some(rpm)) = (enable, speed) {
            inner
                .calls
                .push(ActuatorCall::ToolSpeed(SpindleSpeedRequest::from_rpm(rpm)));
        }
        inner.spindle_on = enable;
        Ok(())
    }

    async fn query_busy(&self) -> anyhow::Result<BusyStatus> {
        self.respond().await;
        let mut inner = self.inner.lock();
        if inner.never_idle {
            return Ok(BusyStatus { busy: true });
        }
        let busy = inner.busy_polls_left > 0;
        inner.busy_polls_left = inner.busy_polls_left.saturating_sub(1);
        if !busy {
            inner.in_flight = false;
        }
        Ok(BusyStatus { busy })
    }

    async fn emergency_stop(&self) -> anyhow::Result<()> {
        self.respond().await;
        let mut inner = self.inner.lock();
        inner.calls.push(ActuatorCall::EmergencyStop);
        if inner.fail_emergency_stop {
            anyhow::bail!("simulated controller ignored the emergency stop");
        }
        inner.in_flight = false;
        inner.busy_polls_left = 0;
        inner.never_idle = false;
        inner.spindle_on = false;
        Ok(())
    }

    async fn check_connection(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
