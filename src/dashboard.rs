//! Dashboard projection — pull-only snapshot of active tasks.
//!
//! A consumer outside the core; only its read contract is defined here:
//! `GET /api/tasks` returns active tasks partitioned into AI-owned and
//! human-owned lists. The dashboard reflects whatever state successfully
//! persisted; there is no error channel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::graph::{Task, TaskGraph, TaskOwner, TaskScope};

/// Snapshot served to the dashboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub agent_tasks: Vec<Task>,
    pub human_tasks: Vec<Task>,
}

/// Build the dashboard router.
pub fn dashboard_routes(graph: Arc<TaskGraph>) -> Router {
    Router::new()
        .route("/api/tasks", get(active_tasks))
        .layer(CorsLayer::permissive())
        .with_state(graph)
}

async fn active_tasks(State(graph): State<Arc<TaskGraph>>) -> Json<TaskSnapshot> {
    let tasks = match graph.get_tasks(TaskScope::Where("status = 'Active'")).await {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(error = %e, "dashboard snapshot query failed");
            HashMap::new()
        }
    };
    Json(partition_snapshot(tasks))
}

fn partition_snapshot(tasks: HashMap<String, Task>) -> TaskSnapshot {
    let (mut agent_tasks, mut human_tasks): (Vec<Task>, Vec<Task>) = tasks
        .into_values()
        .partition(|t| t.agent == TaskOwner::Ai);
    let by_tree = |a: &Task, b: &Task| (a.object.clone(), a.sequence).cmp(&(b.object.clone(), b.sequence));
    agent_tasks.sort_by(by_tree);
    human_tasks.sort_by(by_tree);
    TaskSnapshot {
        agent_tasks,
        human_tasks,
    }
}
