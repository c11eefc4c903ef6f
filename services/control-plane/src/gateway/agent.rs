//! Agent channel.
//!
//! Every connected agent gets an outbound queue in the [`AgentHub`]. New jobs
//! are broadcast to all of them; jobs coming back are handed to the job
//! lifecycle.
//!
//! Broadcasting does not look at the job's environment or pick an owner.
//! With one agent per environment that reaches the right agent. With several
//! agents in one environment each of them runs the job, once per agent.
//! Targeting a single agent is left open until the deployment model is
//! settled; agents still drop jobs for other environments themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use testlib_id::AgentId;
use testlib_proto::{AgentFrame, ProtoError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Outbound queues of the connected agents.
#[derive(Clone, Default)]
pub struct AgentHub {
    agents: Arc<Mutex<HashMap<AgentId, mpsc::UnboundedSender<String>>>>,
}

impl AgentHub {
    fn lock(&self) -> MutexGuard<'_, HashMap<AgentId, mpsc::UnboundedSender<String>>> {
        self.agents.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self) -> (AgentId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = AgentId::new();
        self.lock().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: &AgentId) {
        self.lock().remove(id);
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Sends `frame` to every connected agent, forgetting agents whose
    /// connection is gone. Returns how many agents received it.
    pub fn broadcast(&self, frame: &AgentFrame) -> Result<usize, ProtoError> {
        let text = frame.encode()?;
        let mut agents = self.lock();
        agents.retain(|id, tx| {
            let open = tx.send(text.clone()).is_ok();
            if !open {
                debug!(agent_id = %id, "Dropping closed agent channel");
            }
            open
        });
        debug!(event = frame.event(), agents = agents.len(), "Broadcast to agents");
        Ok(agents.len())
    }
}

/// Upgrades an agent onto the agent channel.
pub async fn agent_channel(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent(socket, state))
}

async fn handle_agent(socket: WebSocket, state: AppState) {
    let hub = state.agents().clone();
    let (agent_id, mut rx) = hub.register();
    info!(agent_id = %agent_id, connected = hub.count(), "Agent connected");

    let (mut sender, mut receiver) = socket.split();

    let writer_id = agent_id;
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                warn!(error = %e, agent_id = %writer_id, "Failed to send frame to agent");
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_frame(&state, &agent_id, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                warn!(error = %e, agent_id = %agent_id, "Agent channel error");
                break;
            }
        }
    }

    hub.unregister(&agent_id);
    writer.abort();
    info!(agent_id = %agent_id, connected = hub.count(), "Agent disconnected");
}

async fn handle_frame(state: &AppState, agent_id: &AgentId, text: &str) {
    let frame = match AgentFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, agent_id = %agent_id, "Ignoring undecodable agent frame");
            return;
        }
    };

    match frame {
        AgentFrame::JobSave(wire) => {
            let job_id = wire.id.clone();
            match state.job_returned(wire).await {
                Ok(outcome) => {
                    debug!(job_id = %job_id, agent_id = %agent_id, outcome = ?outcome, "Returned job handled");
                }
                Err(e) => {
                    error!(error = %e, job_id = %job_id, agent_id = %agent_id, "Failed to handle returned job");
                }
            }
        }
        AgentFrame::JobNew(_) => {
            warn!(agent_id = %agent_id, "Agents may not create jobs; ignoring job:new");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testlib_proto::{Job, JobParams};

    #[tokio::test]
    async fn test_broadcast_reaches_all_and_prunes_closed() {
        let hub = AgentHub::default();
        let (_, mut first) = hub.register();
        let (_, mut second) = hub.register();
        let (_, gone) = hub.register();
        drop(gone);

        let job = Job::new("lab-01", JobParams::Scan, 7);
        let sent = hub.broadcast(&AgentFrame::job_new([&job])).unwrap();
        assert_eq!(sent, 2);
        assert_eq!(hub.count(), 2);

        for rx in [&mut first, &mut second] {
            let frame = AgentFrame::decode(&rx.recv().await.unwrap()).unwrap();
            let AgentFrame::JobNew(jobs) = frame else {
                panic!("expected job:new");
            };
            assert_eq!(jobs[0].id, "SCAN-7");
        }
    }

    #[tokio::test]
    async fn test_broadcast_ignores_job_environment() {
        let hub = AgentHub::default();
        let (_, mut lab) = hub.register();
        let (_, mut prod) = hub.register();

        let job = Job::new("lab-01", JobParams::Scan, 7);
        assert_eq!(hub.broadcast(&AgentFrame::job_new([&job])).unwrap(), 2);
        for rx in [&mut lab, &mut prod] {
            assert!(rx.recv().await.is_some());
        }
    }

    #[test]
    fn test_broadcast_without_agents() {
        let hub = AgentHub::default();
        let job = Job::new("lab-01", JobParams::Scan, 7);
        assert_eq!(hub.broadcast(&AgentFrame::job_save(&job)).unwrap(), 0);
    }
}
