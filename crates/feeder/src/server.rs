//! The HTTP API that the dashboard talks to.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use tankmill_geom::{Pose, PoseUpdate};
use tankmill_planner::{ExecutionPlan, Primitive};
use tankmill_protocol::Direction;

use crate::executor::{ExecuteError, ExecutionStatus, Planner};

const DEFAULT_SOURCE_NAME: &str = "gcode-file";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub gcode: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub status: &'static str,
    pub source_name: String,
    pub primitives: Vec<Primitive>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub primitives: Vec<Primitive>,
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub status: &'static str,
    pub actuator_acknowledged: bool,
}

#[derive(Deserialize)]
pub struct JogRequest {
    pub direction: Direction,
    pub speed: f64,
    pub step: f64,
}

#[derive(Debug, Serialize)]
pub struct JogResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn router(planner: Planner) -> Router {
    Router::new()
        .route("/api/gcode/convert", post(convert))
        .route("/api/gcode/execute", post(execute))
        .route("/api/gcode/status", get(status))
        .route("/api/gcode/stop", post(stop))
        .route("/api/position", get(position).post(set_position))
        .route("/api/control", post(jog))
        .with_state(planner)
}

pub async fn serve(planner: Planner, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(planner)).await?;
    Ok(())
}

async fn convert(
    State(planner): State<Planner>,
    Json(req): Json<ConvertRequest>,
) -> Json<ConvertResponse> {
    let name = req.file_name.unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_owned());
    let plan = planner.convert(&req.gcode, name);
    info!("converted {:?} into {} primitives", plan.source_name, plan.len());
    Json(ConvertResponse {
        status: "success",
        source_name: plan.source_name,
        primitives: plan.primitives,
    })
}

async fn execute(
    State(planner): State<Planner>,
    Json(req): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let plan = ExecutionPlan {
        primitives: req.primitives,
        source_name: req
            .file_name
            .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_owned()),
    };
    match planner.execute(plan) {
        Ok(()) => (
            StatusCode::OK,
            Json(ExecuteResponse {
                accepted: true,
                error: None,
            }),
        ),
        Err(e @ ExecuteError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(ExecuteResponse {
                accepted: false,
                error: Some(e.to_string()),
            }),
        ),
    }
}

async fn status(State(planner): State<Planner>) -> Json<ExecutionStatus> {
    Json(planner.status())
}

async fn stop(State(planner): State<Planner>) -> Json<StopResponse> {
    let acknowledged = planner.stop().await.is_ok();
    Json(StopResponse {
        status: "stopped",
        actuator_acknowledged: acknowledged,
    })
}

async fn position(State(planner): State<Planner>) -> Json<Pose> {
    Json(planner.pose())
}

async fn set_position(
    State(planner): State<Planner>,
    Json(update): Json<PoseUpdate>,
) -> Json<Pose> {
    Json(planner.set_pose(&update))
}

async fn jog(
    State(planner): State<Planner>,
    Json(req): Json<JogRequest>,
) -> (StatusCode, Json<JogResponse>) {
    match planner.jog(req.direction, req.speed, req.step).await {
        Ok(()) => (
            StatusCode::OK,
            Json(JogResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => {
            let code = if e.downcast_ref::<ExecuteError>().is_some() {
                StatusCode::CONFLICT
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                code,
                Json(JogResponse {
                    success: false,
                    error: Some(format!("{e:#}")),
                }),
            )
        }
    }
}
