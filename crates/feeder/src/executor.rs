//! Runs execution plans on the machine, one primitive at a time.
//!
//! At most one plan runs at a time. The plan runs on its own task, and
//! [`Planner::stop`] can cut it off at any await point. Each run has an id,
//! and state changes from a run that is no longer current are dropped, so a
//! cancelled run can't clobber whatever came after it.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use anyhow::Context as _;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tankmill_geom::{
    Pose, PoseUpdate, TankConfig, MIN_DEPTH_MM, MIN_DISTANCE_MM, MIN_ROTATION_DEG,
};
use tankmill_planner::{ExecutionPlan, Primitive};
use tankmill_protocol::Direction;
use tokio::{sync::watch, task::AbortHandle};

use crate::{
    completion::{wait_for_completion, PollConfig},
    connection::Actuator,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutorConfig {
    pub tank: TankConfig,
    pub poll: PollConfig,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Complete,
    Error,
    Stopped,
}

impl RunState {
    pub fn is_running(self) -> bool {
        self == RunState::Running
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub state: RunState,
    /// Fraction of primitives finished, in `[0, 1]`.
    pub progress: f64,
    /// How many primitives have finished.
    pub current_index: usize,
    pub total_count: usize,
    pub error: Option<String>,
    pub source_name: String,
}

/// Reported to the progress observer after every primitive.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_index: usize,
    pub total_count: usize,
    pub progress: f64,
    pub source_name: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecuteError {
    #[error("plan already running")]
    AlreadyRunning,
}

type Observer = Arc<dyn Fn(&Progress) + Send + Sync>;

struct Run {
    id: u64,
    task: AbortHandle,
}

struct Shared {
    pose: Mutex<Pose>,
    status: watch::Sender<ExecutionStatus>,
    // Set when a motion request has been accepted and not yet confirmed done.
    moving: AtomicBool,
    // Lock order: `run` before `pose`.
    run: Mutex<Option<Run>>,
    // Held from "wait for the previous motion" until a new motion has been
    // sent (and, for plans, finished), so only one motion is ever in flight.
    motion: tokio::sync::Mutex<()>,
    next_run_id: AtomicU64,
    observer: Mutex<Option<Observer>>,
}

/// The execution engine. Cheap to clone; all clones drive the same machine.
#[derive(Clone)]
pub struct Planner {
    shared: Arc<Shared>,
    actuator: Arc<dyn Actuator>,
    config: ExecutorConfig,
}

impl Planner {
    pub fn new(actuator: Arc<dyn Actuator>, config: ExecutorConfig, start: Pose) -> Self {
        let (status, _) = watch::channel(ExecutionStatus::default());
        Planner {
            shared: Arc::new(Shared {
                pose: Mutex::new(start),
                status,
                moving: AtomicBool::new(false),
                run: Mutex::new(None),
                motion: tokio::sync::Mutex::new(()),
                next_run_id: AtomicU64::new(0),
                observer: Mutex::new(None),
            }),
            actuator,
            config,
        }
    }

    /// Plans a G-code file from the current pose.
    pub fn convert(&self, gcode: &str, source_name: impl Into<String>) -> ExecutionPlan {
        tankmill_planner::plan(gcode, source_name, self.pose())
    }

    /// Starts running `plan` in the background.
    pub fn execute(&self, plan: ExecutionPlan) -> Result<(), ExecuteError> {
        let mut run = self.shared.run.lock();
        if run.is_some() {
            warn!(
                "rejecting {:?}: {:?} is still running",
                plan.source_name,
                self.shared.status.borrow().source_name
            );
            return Err(ExecuteError::AlreadyRunning);
        }

        let id = self.shared.next_run_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "executing {:?}: {} primitives",
            plan.source_name,
            plan.len()
        );
        self.shared.status.send_replace(ExecutionStatus {
            state: RunState::Running,
            progress: 0.0,
            current_index: 0,
            total_count: plan.len(),
            error: None,
            source_name: plan.source_name.clone(),
        });

        // The slot stays locked until the task handle is in it, so the task
        // can't finish before it's registered.
        let this = self.clone();
        let task = tokio::spawn(async move { this.run_plan(id, plan).await });
        *run = Some(Run {
            id,
            task: task.abort_handle(),
        });
        Ok(())
    }

    pub fn status(&self) -> ExecutionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.shared.status.subscribe()
    }

    /// Waits until no plan is running, and returns the final status.
    pub async fn finished(&self) -> ExecutionStatus {
        let mut rx = self.subscribe();
        loop {
            {
                let status = rx.borrow_and_update();
                if !status.state.is_running() {
                    return status.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Emergency stop.
    ///
    /// The local state is always reset, even if the controller can't be
    /// reached; the returned error only says whether the controller heard us.
    pub async fn stop(&self) -> anyhow::Result<()> {
        {
            let mut run = self.shared.run.lock();
            if let Some(run) = run.take() {
                warn!("emergency stop: abandoning the running plan");
                run.task.abort();
            } else {
                warn!("emergency stop");
            }
            self.shared.moving.store(false, Ordering::SeqCst);
            self.shared.status.send_modify(|s| {
                s.state = RunState::Stopped;
                s.progress = 0.0;
                s.current_index = 0;
                s.error = None;
            });
        }

        let ret = self.actuator.emergency_stop().await;
        if let Err(e) = &ret {
            error!("controller did not acknowledge the emergency stop: {e:#}");
        }
        ret
    }

    pub fn pose(&self) -> Pose {
        *self.shared.pose.lock()
    }

    pub fn set_pose(&self, update: &PoseUpdate) -> Pose {
        let mut pose = self.shared.pose.lock();
        pose.apply(update);
        info!("pose set to {:?}", *pose);
        *pose
    }

    /// Registers the progress observer, replacing any previous one.
    pub fn on_progress<F>(&self, observer: F)
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        *self.shared.observer.lock() = Some(Arc::new(observer));
    }

    /// Manual movement, outside of any plan.
    ///
    /// This doesn't wait for the motion to finish (but the next motion will),
    /// and it doesn't update the pose.
    pub async fn jog(&self, direction: Direction, speed: f64, step: f64) -> anyhow::Result<()> {
        let _motion = self.shared.motion.lock().await;
        if self.shared.run.lock().is_some() {
            return Err(ExecuteError::AlreadyRunning.into());
        }
        self.wait_for_movement_completion().await?;
        {
            // A plan may have been accepted while we were waiting.
            let run = self.shared.run.lock();
            if run.is_some() {
                return Err(ExecuteError::AlreadyRunning.into());
            }
            self.shared.moving.store(true, Ordering::SeqCst);
        }
        info!("jog {direction:?} by {step:.2} at {speed}");
        if let Err(e) = self.actuator.move_by(direction, speed, step).await {
            self.shared.moving.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn is_current(&self, id: u64) -> bool {
        self.shared.run.lock().as_ref().is_some_and(|r| r.id == id)
    }

    async fn run_plan(self, id: u64, plan: ExecutionPlan) {
        let total = plan.len();
        for (idx, prim) in plan.primitives.iter().enumerate() {
            if let Err(e) = self.step(id, prim).await {
                error!(
                    "{:?} failed at primitive {} of {total}: {e:#}",
                    plan.source_name,
                    idx + 1
                );
                self.finish(id, |s| {
                    s.state = RunState::Error;
                    s.error = Some(format!("{e:#}"));
                });
                return;
            }
            self.advance(id, idx + 1, total, &plan.source_name);
        }

        info!("finished {:?}", plan.source_name);
        self.finish(id, |s| {
            s.state = RunState::Complete;
            s.progress = 1.0;
            s.current_index = total;
        });
    }

    fn advance(&self, id: u64, current_index: usize, total_count: usize, source_name: &str) {
        let progress = if total_count > 0 {
            current_index as f64 / total_count as f64
        } else {
            0.0
        };
        {
            let run = self.shared.run.lock();
            if !run.as_ref().is_some_and(|r| r.id == id) {
                return;
            }
            self.shared.status.send_modify(|s| {
                s.current_index = current_index;
                s.progress = progress;
            });
        }

        let observer = self.shared.observer.lock().clone();
        if let Some(observer) = observer {
            observer(&Progress {
                current_index,
                total_count,
                progress,
                source_name: source_name.to_owned(),
            });
        }
    }

    fn finish(&self, id: u64, update: impl FnOnce(&mut ExecutionStatus)) {
        let mut run = self.shared.run.lock();
        if run.as_ref().is_some_and(|r| r.id == id) {
            self.shared.status.send_modify(update);
            *run = None;
        }
    }

    fn update_pose(&self, id: u64, update: impl FnOnce(&mut Pose)) -> Pose {
        let run = self.shared.run.lock();
        let mut pose = self.shared.pose.lock();
        if run.as_ref().is_some_and(|r| r.id == id) {
            update(&mut pose);
        }
        *pose
    }

    async fn step(&self, id: u64, prim: &Primitive) -> anyhow::Result<()> {
        let _motion = if prim.is_physical() {
            let guard = self.shared.motion.lock().await;
            self.wait_for_movement_completion().await?;
            Some(guard)
        } else {
            None
        };

        match prim {
            Primitive::RotateAndMove {
                rotation_degrees,
                distance_mm,
                speed,
                ..
            } => {
                if rotation_degrees.abs() > MIN_ROTATION_DEG {
                    self.rotate_in_place(id, *rotation_degrees, *speed).await?;
                } else if *rotation_degrees != 0.0 {
                    debug!("skipping {rotation_degrees:.3}° turn");
                }
                if *distance_mm > MIN_DISTANCE_MM {
                    self.move_forward(id, *distance_mm, *speed).await?;
                } else {
                    debug!("skipping {distance_mm:.3}mm move");
                }
            }
            Primitive::DepthMove { target_z, speed } => {
                self.move_to_z(id, *target_z, *speed).await?;
            }
            Primitive::ToolCommand { enable, speed } => {
                info!(
                    "spindle {}{}",
                    if *enable { "on" } else { "off" },
                    speed.map(|s| format!(" at {s} rpm")).unwrap_or_default()
                );
                self.ensure_current(id)?;
                self.actuator
                    .set_tool(*enable, *speed)
                    .await
                    .context("spindle command failed")?;
            }
            Primitive::ModeNote { kind } => debug!("mode: {kind:?}"),
            Primitive::Comment { text } => debug!("comment: {text}"),
        }
        Ok(())
    }

    fn ensure_current(&self, id: u64) -> anyhow::Result<()> {
        if self.is_current(id) {
            Ok(())
        } else {
            anyhow::bail!("plan was stopped")
        }
    }

    async fn rotate_in_place(&self, id: u64, rotation: f64, speed: f64) -> anyhow::Result<()> {
        let arc = self.config.tank.rotation_arc_length(rotation).get();
        let direction = Direction::for_rotation(rotation);
        info!("turning {direction:?} by {rotation:.2}° ({arc:.2}mm of track)");
        self.start_movement(id, self.actuator.move_by(direction, speed, arc))
            .await
            .context("rotation failed")?;
        let pose = self.update_pose(id, |p| p.rotate(rotation));
        debug!("heading now {:.2}°", pose.heading);
        Ok(())
    }

    async fn move_forward(&self, id: u64, distance: f64, speed: f64) -> anyhow::Result<()> {
        info!("driving forward {distance:.2}mm at {speed}");
        self.start_movement(id, self.actuator.move_by(Direction::Forward, speed, distance))
            .await
            .context("forward move failed")?;
        let pose = self.update_pose(id, |p| p.advance(distance));
        debug!("now at ({:.3}, {:.3})", pose.x, pose.y);
        Ok(())
    }

    async fn move_to_z(&self, id: u64, target_z: f64, speed: f64) -> anyhow::Result<()> {
        let dz = target_z - self.pose().z;
        if dz.abs() < MIN_DEPTH_MM {
            debug!("already at depth {target_z}");
            return Ok(());
        }
        info!("moving depth by {dz:.3}mm to {target_z}");
        self.start_movement(id, self.actuator.set_depth(dz, speed.abs()))
            .await
            .context("depth move failed")?;
        self.update_pose(id, |p| p.z = target_z);
        Ok(())
    }

    /// Sends a motion request and waits for the motion to finish.
    ///
    /// The caller must hold the motion guard.
    async fn start_movement(
        &self,
        id: u64,
        request: impl std::future::Future<Output = anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        {
            // Checked under the same lock that `stop` clears the flag under.
            let run = self.shared.run.lock();
            if !run.as_ref().is_some_and(|r| r.id == id) {
                anyhow::bail!("plan was stopped");
            }
            self.shared.moving.store(true, Ordering::SeqCst);
        }
        if let Err(e) = request.await {
            self.shared.moving.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.wait_for_movement_completion().await
    }

    async fn wait_for_movement_completion(&self) -> anyhow::Result<()> {
        if !self.shared.moving.load(Ordering::SeqCst) {
            return Ok(());
        }
        let ret = wait_for_completion(self.actuator.as_ref(), self.config.poll).await;
        self.shared.moving.store(false, Ordering::SeqCst);
        ret
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::simulator::{ActuatorCall, SimulatedActuator};
    use tankmill_protocol::{DepthRequest, MoveRequest, SpindleSpeedRequest, ToolRequest};

    const SQUARE: &str = "G1 X10 Y0 F500\nG1 X10 Y10\nG1 X0 Y10\nG1 X0 Y0\n";

    fn planner(sim: SimulatedActuator) -> (Planner, Arc<SimulatedActuator>) {
        let sim = Arc::new(sim);
        let planner = Planner::new(sim.clone(), ExecutorConfig::default(), Pose::default());
        (planner, sim)
    }

    fn sim() -> SimulatedActuator {
        SimulatedActuator::new(TankConfig::default(), Pose::default())
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn moves(calls: &[ActuatorCall]) -> Vec<MoveRequest> {
        calls
            .iter()
            .filter_map(|c| match c {
                ActuatorCall::Move(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn runs_a_square() {
        let (planner, sim) = planner(sim());
        let plan = planner.convert(SQUARE, "square.nc");
        planner.execute(plan).unwrap();
        let status = planner.finished().await;

        assert_eq!(status.state, RunState::Complete);
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.current_index, 4);
        assert_eq!(status.source_name, "square.nc");

        let pose = planner.pose();
        assert!(close(pose.x, 0.0) && close(pose.y, 0.0));
        // Four left-hand corners after the first right turn: back to facing -Y.
        assert!(close(pose.heading, 270.0));

        let moves = moves(&sim.calls());
        let dirs: Vec<_> = moves.iter().map(|m| m.direction).collect();
        use Direction::*;
        assert_eq!(
            dirs,
            vec![TurnRight, Forward, TurnLeft, Forward, TurnLeft, Forward, TurnLeft, Forward]
        );
        let quarter = TankConfig::default().rotation_arc_length(90.0).get() as f32;
        assert!((moves[0].step - quarter).abs() < 1e-3);
        assert_eq!(moves[1].step, 10.0);
        assert_eq!(moves[1].speed, 500.0);

        // The simulated machine agrees with the planner about where it is.
        let physical = sim.pose();
        assert!((physical.x - pose.x).abs() < 1e-3);
        assert!((physical.y - pose.y).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_concurrent_execute() {
        let (planner, _sim) = planner(sim());
        planner.execute(planner.convert(SQUARE, "first")).unwrap();
        assert_eq!(
            planner.execute(planner.convert(SQUARE, "second")),
            Err(ExecuteError::AlreadyRunning)
        );
        assert_eq!(planner.status().source_name, "first");
        assert_eq!(planner.finished().await.state, RunState::Complete);

        // Finished runs don't block the next one.
        planner.execute(planner.convert(SQUARE, "second")).unwrap();
        assert_eq!(planner.status().state, RunState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_stops_the_plan() {
        let (planner, sim) = planner(sim().never_idle());
        planner.execute(planner.convert(SQUARE, "stuck")).unwrap();
        let status = planner.finished().await;

        assert_eq!(status.state, RunState::Error);
        assert!(status.error.unwrap().contains("timed out"));
        // Only the first turn went out.
        assert_eq!(sim.calls().len(), 1);
        assert_eq!(status.current_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn actuator_failure_stops_the_plan() {
        let (planner, sim) = planner(sim().fail_after(2));
        planner.execute(planner.convert(SQUARE, "flaky")).unwrap();
        let status = planner.finished().await;

        assert_eq!(status.state, RunState::Error);
        assert!(status.error.unwrap().contains("rotation failed"));
        assert_eq!(status.current_index, 1);
        assert_eq!(sim.calls().len(), 2);

        // Stopping afterwards doesn't keep the old run's error around.
        planner.stop().await.unwrap();
        let status = planner.status();
        assert_eq!(status.state, RunState::Stopped);
        assert_eq!(status.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_plan() {
        let (planner, sim) = planner(sim().with_busy_polls(20));
        planner.execute(planner.convert(SQUARE, "square")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(planner.status().state, RunState::Running);

        planner.stop().await.unwrap();
        let status = planner.status();
        assert_eq!(status.state, RunState::Stopped);
        assert_eq!(status.progress, 0.0);
        assert_eq!(status.current_index, 0);
        assert_eq!(sim.calls().last(), Some(&ActuatorCall::EmergencyStop));

        // The abandoned run doesn't send anything else, or touch the state.
        let calls = sim.calls().len();
        let pose = planner.pose();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sim.calls().len(), calls);
        assert_eq!(planner.pose(), pose);
        assert_eq!(planner.status().state, RunState::Stopped);

        planner.execute(planner.convert("G1 X0 Y5", "again")).unwrap();
        assert_eq!(planner.finished().await.state, RunState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_without_acknowledgement() {
        let (planner, sim) = planner(sim().with_busy_polls(20).fail_emergency_stop());
        planner.execute(planner.convert(SQUARE, "square")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(planner.stop().await.is_err());
        let status = planner.status();
        assert_eq!(status.state, RunState::Stopped);
        assert_eq!(status.progress, 0.0);
        assert_eq!(status.error, None);
        assert!(!planner.shared.moving.load(Ordering::SeqCst));
        assert_eq!(sim.calls().last(), Some(&ActuatorCall::EmergencyStop));

        planner.execute(planner.convert("G1 X0 Y5", "again")).unwrap();
        assert_eq!(planner.finished().await.state, RunState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_in_order() {
        let (planner, _sim) = planner(sim());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        planner.on_progress(move |p| seen2.lock().push((p.current_index, p.progress)));

        // Comments and mode notes count too.
        planner
            .execute(planner.convert("G21\n; hello\nG1 X0 Y10\nM3 S1000", "p"))
            .unwrap();
        planner.finished().await;
        assert_eq!(
            *seen.lock(),
            vec![(1, 0.25), (2, 0.5), (3, 0.75), (4, 1.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tool_and_depth() {
        let (planner, sim) = planner(sim());
        planner
            .execute(planner.convert("G1 Z1.5 F200\nM3 S12000\nG1 Z0.5\nG1 Z0.5004\nM5", "t"))
            .unwrap();
        assert_eq!(planner.finished().await.state, RunState::Complete);
        assert_eq!(
            sim.calls(),
            vec![
                ActuatorCall::Depth(DepthRequest::new(1.5, 200.0)),
                ActuatorCall::Tool(ToolRequest { enable: true }),
                ActuatorCall::ToolSpeed(SpindleSpeedRequest { speed: 100 }),
                ActuatorCall::Depth(DepthRequest::new(-1.0, 200.0)),
                ActuatorCall::Tool(ToolRequest { enable: false }),
            ]
        );
        assert!(close(planner.pose().z, 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn small_turns_are_skipped() {
        let (planner, sim) = planner(sim());
        let plan = ExecutionPlan {
            primitives: vec![Primitive::RotateAndMove {
                target_x: 0.0,
                target_y: 5.0,
                rotation_degrees: 0.5,
                distance_mm: 5.0,
                speed: 300.0,
            }],
            source_name: "nudge".to_owned(),
        };
        planner.execute(plan).unwrap();
        planner.finished().await;

        assert_eq!(
            moves(&sim.calls()),
            vec![MoveRequest {
                direction: Direction::Forward,
                speed: 300.0,
                step: 5.0
            }]
        );
        assert_eq!(planner.pose().heading, 90.0);
        assert!(close(planner.pose().y, 5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn set_pose_changes_planning() {
        let (planner, _sim) = planner(sim());
        let pose = planner.set_pose(&PoseUpdate {
            heading: Some(0.0),
            ..Default::default()
        });
        assert_eq!(pose.heading, 0.0);
        let plan = planner.convert("G1 X10", "p");
        assert!(matches!(
            plan.primitives[0],
            Primitive::RotateAndMove { rotation_degrees, .. } if close(rotation_degrees, 0.0)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn jog_is_waited_for() {
        let (planner, sim) = planner(sim().with_busy_polls(4));
        planner.jog(Direction::Forward, 100.0, 3.0).await.unwrap();
        assert_eq!(planner.pose(), Pose::default());

        planner.execute(planner.convert("M3", "p")).unwrap();
        let err = planner
            .jog(Direction::Backward, 100.0, 3.0)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ExecuteError>(),
            Some(&ExecuteError::AlreadyRunning)
        );
        planner.finished().await;

        // The spindle only came on once the jog finished.
        assert_eq!(sim.calls().len(), 2);
        assert!(sim.spindle_on());
    }

    #[tokio::test(start_paused = true)]
    async fn jog_and_execute_never_overlap() {
        let (planner, sim) = planner(sim().with_latency(Duration::from_millis(100)));
        planner.jog(Direction::Forward, 100.0, 3.0).await.unwrap();

        let other = planner.clone();
        let second = tokio::spawn(async move { other.jog(Direction::Backward, 100.0, 3.0).await });
        tokio::task::yield_now().await;
        planner.execute(planner.convert("G1 X0 Y10", "p")).unwrap();

        // The second jog was still waiting for the first when the plan took over.
        let err = second.await.unwrap().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ExecuteError>(),
            Some(&ExecuteError::AlreadyRunning)
        );
        assert_eq!(planner.finished().await.state, RunState::Complete);

        let dirs: Vec<_> = moves(&sim.calls()).iter().map(|m| (m.direction, m.step)).collect();
        assert_eq!(dirs, vec![(Direction::Forward, 3.0), (Direction::Forward, 10.0)]);
        assert_eq!(sim.overlapping_motions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_jogs_take_turns() {
        let (planner, sim) = planner(sim().with_latency(Duration::from_millis(100)));
        let other = planner.clone();
        let second = tokio::spawn(async move { other.jog(Direction::Backward, 100.0, 3.0).await });
        planner.jog(Direction::Forward, 100.0, 3.0).await.unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(moves(&sim.calls()).len(), 2);
        assert_eq!(sim.overlapping_motions(), 0);
    }
}
