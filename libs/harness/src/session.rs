//! A simulated cluster agent speaking the control protocol.
//!
//! The session owns a TLS connection and a background receive loop. Sends
//! are fire-and-forget; everything the service sends back lands in the
//! session's [`ChannelRegistry`] and in the agent bookkeeping.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cpat_id::{AgentUuid, InstanceId, TraceLabel};
use cpat_proto::{
    read_frame, write_frame, CommandKind, DeletePayload, EventKind, Frame, InstanceState,
    InstanceStat, InstanceStoppedPayload, MessageKind, NodeStatus, Payload, RestartPayload, Role,
    StartPayload, StatsPayload, StopPayload, TraceFrame, TraceReportPayload,
};
use rustls::ClientConfig;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::registry::{ChannelRegistry, Waiter};

type Stream = TlsStream<TcpStream>;

const MEM_TOTAL_MB: u64 = 3896;
const DISK_TOTAL_MB: u64 = 500_000;
const ONLINE_CPUS: u32 = 4;

/// Registry keyed by message kind, carrying the whole frame.
pub type MessageRegistry = ChannelRegistry<MessageKind, Frame>;

/// One instance as the simulated agent sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldInstance {
    pub start: StartPayload,
    pub state: InstanceState,
}

/// Bookkeeping of what the service asked the simulated agent to do.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    /// Instances currently placed on this agent.
    pub instances: BTreeMap<InstanceId, HeldInstance>,
    /// How many `stop` commands arrived per instance.
    pub stop_counts: HashMap<InstanceId, u32>,
    /// How many `delete` commands arrived per instance.
    pub delete_counts: HashMap<InstanceId, u32>,
    /// False once the receive loop ended.
    pub connected: bool,
}

impl AgentState {
    pub fn holds(&self, instance: &InstanceId) -> bool {
        self.instances.contains_key(instance)
    }

    pub fn state_of(&self, instance: &InstanceId) -> Option<InstanceState> {
        self.instances.get(instance).map(|held| held.state)
    }

    pub fn stops(&self, instance: &InstanceId) -> u32 {
        self.stop_counts.get(instance).copied().unwrap_or(0)
    }

    /// Record the effect of an inbound command.
    fn apply(&mut self, frame: &Frame) {
        let Some(MessageKind::Command(kind)) = frame.kind() else {
            return;
        };

        match kind {
            CommandKind::Start => {
                if let Ok(start) = frame.decode::<StartPayload>() {
                    self.instances.insert(
                        start.instance_uuid.clone(),
                        HeldInstance {
                            start,
                            state: InstanceState::Running,
                        },
                    );
                }
            }
            CommandKind::Restart => {
                if let Ok(restart) = frame.decode::<RestartPayload>() {
                    if let Some(held) = self.instances.get_mut(&restart.instance_uuid) {
                        held.state = InstanceState::Running;
                    }
                }
            }
            CommandKind::Stop => {
                if let Ok(stop) = frame.decode::<StopPayload>() {
                    if let Some(held) = self.instances.get_mut(&stop.instance_uuid) {
                        held.state = InstanceState::Exited;
                    }
                    *self.stop_counts.entry(stop.instance_uuid).or_insert(0) += 1;
                }
            }
            CommandKind::Delete => {
                if let Ok(delete) = frame.decode::<DeletePayload>() {
                    self.instances.remove(&delete.instance_uuid);
                    *self.delete_counts.entry(delete.instance_uuid).or_insert(0) += 1;
                }
            }
            CommandKind::Stats | CommandKind::Evacuate => {}
        }
    }
}

/// A connected simulated agent.
pub struct AgentSession {
    role: Role,
    uuid: AgentUuid,
    writer: Arc<tokio::sync::Mutex<WriteHalf<Stream>>>,
    registry: Arc<MessageRegistry>,
    state: Arc<Mutex<AgentState>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl AgentSession {
    /// Connect and complete the handshake.
    ///
    /// Nothing is sent before the service answers `connected`. A refusal, a
    /// closed stream, or no answer within `handshake_timeout` is a
    /// precondition failure.
    pub async fn connect(
        addr: &str,
        tls: Arc<ClientConfig>,
        role: Role,
        uuid: AgentUuid,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let tcp = TcpStream::connect(addr).await.map_err(|e| {
            HarnessError::precondition(format!("control endpoint {} unreachable: {}", addr, e))
        })?;
        let server_name = crate::tls::server_name(addr)?;
        let stream = TlsConnector::from(tls)
            .connect(server_name, tcp)
            .await
            .map_err(|e| HarnessError::precondition(format!("TLS handshake failed: {}", e)))?;

        let (mut reader, mut writer) = tokio::io::split(stream);

        let refused = |e: cpat_proto::ProtoError| {
            HarnessError::precondition(format!("handshake failed: {}", e))
        };
        write_frame(&mut writer, &Frame::Connect { role, uuid })
            .await
            .map_err(refused)?;
        let answer = tokio::time::timeout(handshake_timeout, read_frame(&mut reader))
            .await
            .map_err(|_| {
                HarnessError::precondition(format!(
                    "no handshake answer within {:?}",
                    handshake_timeout
                ))
            })?
            .map_err(refused)?;

        match answer {
            Some(Frame::Connected { role: peer, .. }) => {
                info!(role = %role, uuid = %uuid, peer = %peer, "Agent session connected");
            }
            Some(Frame::Error { code, detail }) => {
                warn!(role = %role, uuid = %uuid, code = %code, "Handshake refused");
                return Err(HarnessError::precondition(format!(
                    "handshake refused ({}): {}",
                    code, detail
                )));
            }
            Some(other) => {
                return Err(HarnessError::precondition(format!(
                    "unexpected {} frame during handshake",
                    other.name()
                )));
            }
            None => {
                return Err(HarnessError::precondition(
                    "connection closed during handshake",
                ));
            }
        }

        let registry = Arc::new(MessageRegistry::new());
        let state = Arc::new(Mutex::new(AgentState {
            connected: true,
            ..AgentState::default()
        }));
        let reader = tokio::spawn(receive_loop(
            reader,
            uuid,
            Arc::clone(&registry),
            Arc::clone(&state),
        ));

        Ok(Self {
            role,
            uuid,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            registry,
            state,
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn uuid(&self) -> AgentUuid {
        self.uuid
    }

    /// Register interest in a kind before causing it.
    pub fn register(&self, kind: impl Into<MessageKind>) -> Result<Waiter<MessageKind, Frame>> {
        self.registry.expect(kind.into())
    }

    /// A copy of the bookkeeping.
    pub fn state(&self) -> AgentState {
        lock(&self.state).clone()
    }

    /// Send a command frame with a raw payload.
    pub async fn send_command(&self, kind: CommandKind, payload: serde_json::Value) -> Result<()> {
        self.write(Frame::Command { kind, payload }).await
    }

    /// Send an event frame with a raw payload.
    pub async fn send_event(&self, kind: EventKind, payload: serde_json::Value) -> Result<()> {
        self.write(Frame::Event { kind, payload }).await
    }

    /// Send a typed command or event.
    pub async fn send<P: Payload>(&self, payload: &P) -> Result<()> {
        self.write(Frame::message(payload)?).await
    }

    /// Build a status report from the bookkeeping and send it.
    pub async fn report_stats(&self) -> Result<StatsPayload> {
        let stats = self.stats_snapshot();
        debug!(
            uuid = %self.uuid,
            instance_count = stats.instances.len(),
            "Reporting node status"
        );
        self.send(&stats).await?;
        Ok(stats)
    }

    /// The status report the agent would send right now.
    pub fn stats_snapshot(&self) -> StatsPayload {
        let state = lock(&self.state);
        let instances: Vec<InstanceStat> = state
            .instances
            .values()
            .map(|held| InstanceStat {
                instance_uuid: held.start.instance_uuid.clone(),
                state: held.state,
                ssh_ip: "127.0.0.1".to_string(),
                ssh_port: 33000,
                vcpu_usage: held.start.vcpus,
                memory_usage_mb: held.start.mem_mb,
                disk_usage_mb: held.start.disk_mb,
            })
            .collect();

        let mem_used: u64 = instances
            .iter()
            .filter(|i| i.state == InstanceState::Running)
            .map(|i| i.memory_usage_mb)
            .sum();
        let disk_used: u64 = instances.iter().map(|i| i.disk_usage_mb).sum();

        StatsPayload {
            node_uuid: self.uuid.node_id(),
            hostname: format!("cpat-agent-{}", &self.uuid.to_string()[..8]),
            status: NodeStatus::Ready,
            mem_total_mb: MEM_TOTAL_MB,
            mem_available_mb: MEM_TOTAL_MB.saturating_sub(mem_used),
            disk_total_mb: DISK_TOTAL_MB,
            disk_available_mb: DISK_TOTAL_MB.saturating_sub(disk_used),
            load: 0,
            online_cpus: ONLINE_CPUS,
            instances,
        }
    }

    /// Report that an instance stopped on its own, and record it.
    pub async fn report_stopped(&self, instance: &InstanceId) -> Result<()> {
        if let Some(held) = lock(&self.state).instances.get_mut(instance) {
            held.state = InstanceState::Exited;
        }
        self.send(&InstanceStoppedPayload {
            instance_uuid: instance.clone(),
        })
        .await
    }

    /// Send trace frames for every held instance started with `label`.
    pub async fn report_traces(&self, label: &TraceLabel) -> Result<TraceReportPayload> {
        let frames: Vec<TraceFrame> = lock(&self.state)
            .instances
            .values()
            .filter(|held| held.start.trace_label.as_ref() == Some(label))
            .enumerate()
            .map(|(i, held)| TraceFrame {
                label: label.clone(),
                instance_uuid: held.start.instance_uuid.clone(),
                node_uuid: self.uuid.node_id(),
                controller_elapsed_ms: 1.5 + i as f64,
                scheduler_elapsed_ms: 0.5,
                launcher_elapsed_ms: 120.0,
            })
            .collect();

        let report = TraceReportPayload { frames };
        self.send(&report).await?;
        Ok(report)
    }

    /// Shut the session down. Idempotent.
    ///
    /// Safe with commands in flight: anything still arriving is discarded.
    pub async fn close(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(reader) = reader else {
            return;
        };

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(uuid = %self.uuid, error = %e, "Error shutting down writer");
            }
        }
        reader.abort();
        let _ = reader.await;
        lock(&self.state).connected = false;
        info!(uuid = %self.uuid, "Agent session closed");
    }

    async fn write(&self, frame: Frame) -> Result<()> {
        if !lock(&self.state).connected {
            return Err(HarnessError::Protocol(format!(
                "session {} lost its connection",
                self.uuid
            )));
        }
        debug!(uuid = %self.uuid, frame = frame.name(), kind = ?frame.kind(), "Sending frame");
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame).await?;
        Ok(())
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

/// Block until a waiter is filled and decode its payload.
pub async fn receive<P: Payload>(waiter: Waiter<MessageKind, Frame>, timeout: Duration) -> Result<P> {
    let frame = waiter.wait(timeout).await?;
    Ok(frame.decode::<P>()?)
}

async fn receive_loop(
    mut reader: ReadHalf<Stream>,
    uuid: AgentUuid,
    registry: Arc<MessageRegistry>,
    state: Arc<Mutex<AgentState>>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                let Some(kind) = frame.kind() else {
                    if let Frame::Error { code, detail } = &frame {
                        warn!(uuid = %uuid, code = %code, detail = %detail, "Service reported error");
                    }
                    continue;
                };
                debug!(uuid = %uuid, kind = %kind, "Received message");

                // Bookkeeping first, so a woken waiter sees the effect.
                lock(&state).apply(&frame);
                registry.deliver(kind, frame);
            }
            Ok(None) => {
                debug!(uuid = %uuid, "Service closed the session");
                break;
            }
            Err(e) => {
                warn!(uuid = %uuid, error = %e, "Receive loop failed");
                break;
            }
        }
    }
    lock(&state).connected = false;
}

fn lock(state: &Mutex<AgentState>) -> MutexGuard<'_, AgentState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpat_id::{TenantId, WorkloadId};

    fn start(id: &str, label: Option<&str>) -> Frame {
        Frame::message(&StartPayload {
            instance_uuid: id.parse().unwrap(),
            tenant_uuid: "tenant".parse::<TenantId>().unwrap(),
            workload_id: "wl".parse::<WorkloadId>().unwrap(),
            vcpus: 2,
            mem_mb: 256,
            disk_mb: 1024,
            trace_label: label.map(|l| l.parse().unwrap()),
        })
        .unwrap()
    }

    fn stop(id: &str) -> Frame {
        Frame::message(&StopPayload {
            instance_uuid: id.parse().unwrap(),
        })
        .unwrap()
    }

    #[test]
    fn test_bookkeeping_follows_commands() {
        let mut state = AgentState::default();
        let id: InstanceId = "a".parse().unwrap();

        state.apply(&start("a", None));
        assert_eq!(state.state_of(&id), Some(InstanceState::Running));

        state.apply(&stop("a"));
        assert_eq!(state.state_of(&id), Some(InstanceState::Exited));
        assert_eq!(state.stops(&id), 1);

        state.apply(
            &Frame::message(&RestartPayload {
                instance_uuid: id.clone(),
            })
            .unwrap(),
        );
        assert_eq!(state.state_of(&id), Some(InstanceState::Running));

        state.apply(
            &Frame::message(&DeletePayload {
                instance_uuid: id.clone(),
            })
            .unwrap(),
        );
        assert!(!state.holds(&id));
        assert_eq!(state.delete_counts.get(&id), Some(&1));
    }

    #[test]
    fn test_stop_for_unknown_instance_is_still_counted() {
        let mut state = AgentState::default();
        state.apply(&stop("ghost"));
        assert_eq!(state.stops(&"ghost".parse().unwrap()), 1);
        assert!(state.instances.is_empty());
    }

    #[test]
    fn test_events_do_not_touch_bookkeeping() {
        let mut state = AgentState::default();
        state.apply(
            &Frame::message(&InstanceStoppedPayload {
                instance_uuid: "a".parse().unwrap(),
            })
            .unwrap(),
        );
        assert!(state.stop_counts.is_empty());
    }
}
