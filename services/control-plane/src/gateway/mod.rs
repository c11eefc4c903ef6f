//! Websocket gateways: the agent channel and the resource change feed.

mod agent;
mod resources;

use axum::{routing::get, Router};
use testlib_proto::{AGENT_CHANNEL_PATH, RESOURCES_CHANNEL_PATH};

pub use agent::AgentHub;
pub use resources::{FeedFrame, FeedWorker, ResourceFeed};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(AGENT_CHANNEL_PATH, get(agent::agent_channel))
        .route(RESOURCES_CHANNEL_PATH, get(resources::resources_channel))
}
