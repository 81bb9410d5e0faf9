//! Control protocol listener.
//!
//! Agents connect over mutually authenticated TLS and must open with a
//! `connect` frame. After the `connected` answer the link carries commands
//! from the controller and statistics and events from the agent. Every
//! accepted agent message is also delivered to an observation registry, so
//! tests can wait on what the controller received.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cpat_harness::ChannelRegistry;
use cpat_id::{AgentUuid, InstanceId, NodeId};
use cpat_proto::{
    read_frame, write_frame, CommandKind, ConcentratorInstanceAddedPayload, DeletePayload,
    ErrorCode, EventKind, Frame, InstanceDeletedPayload, InstanceStoppedPayload, MessageKind,
    NodeConnectedPayload, NodeDisconnectedPayload, Payload, RestartPayload, Role, StatsPayload,
    StopPayload, TraceReportPayload,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::pki::TestPki;
use crate::store::{InstanceRecord, Store};

/// How long a fresh connection may take to send `connect`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the controller received, keyed by message kind.
pub type ObservedRegistry = ChannelRegistry<MessageKind, Frame>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no agent connected to place instance {0}")]
    NoAgent(InstanceId),

    #[error("node {0} is not connected")]
    NodeUnreachable(NodeId),

    #[error(transparent)]
    Encode(#[from] cpat_proto::ProtoError),
}

struct Link {
    id: u64,
    role: Role,
    uuid: AgentUuid,
    tx: mpsc::UnboundedSender<Frame>,
}

/// Connected agents and the paths commands take to reach them.
pub struct ControlHub {
    store: Arc<Store>,
    uuid: AgentUuid,
    links: Mutex<Vec<Link>>,
    next_link: AtomicU64,
    observed: Arc<ObservedRegistry>,
}

impl ControlHub {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            uuid: AgentUuid::new(),
            links: Mutex::new(Vec::new()),
            next_link: AtomicU64::new(1),
            observed: Arc::new(ObservedRegistry::new()),
        }
    }

    pub fn observed(&self) -> Arc<ObservedRegistry> {
        Arc::clone(&self.observed)
    }

    fn links(&self) -> MutexGuard<'_, Vec<Link>> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of live links, for tests and logging.
    pub fn connected(&self) -> usize {
        self.links().len()
    }

    fn attach(&self, role: Role, uuid: AgentUuid) -> (u64, mpsc::UnboundedReceiver<Frame>) {
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.links().push(Link { id, role, uuid, tx });

        self.store.node_connected(&uuid.node_id(), &role.to_string());
        if let Ok(frame) = Frame::message(&NodeConnectedPayload {
            node_uuid: uuid,
            role,
        }) {
            self.observed
                .deliver(MessageKind::Event(EventKind::NodeConnected), frame);
        }
        (id, rx)
    }

    /// Drop a link. The node goes offline only when no newer link for the
    /// same identity took its place.
    fn detach(&self, id: u64) {
        let (removed, replaced) = {
            let mut links = self.links();
            let Some(pos) = links.iter().position(|l| l.id == id) else {
                return;
            };
            let removed = links.remove(pos);
            let replaced = links.iter().any(|l| l.uuid == removed.uuid);
            (removed, replaced)
        };

        if replaced {
            debug!(uuid = %removed.uuid, "Link replaced by a newer connection");
            return;
        }
        self.store.node_disconnected(&removed.uuid.node_id());
        if let Ok(frame) = Frame::message(&NodeDisconnectedPayload {
            node_uuid: removed.uuid,
            role: removed.role,
        }) {
            self.observed
                .deliver(MessageKind::Event(EventKind::NodeDisconnected), frame);
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Send `start` for a new instance to the most recently connected agent
    /// that can still take frames. The instance stays unscheduled until that
    /// agent reports it.
    pub fn place(&self, instance: &InstanceRecord) -> Result<AgentUuid, DispatchError> {
        let frame = Frame::message(&instance.start_payload())?;
        let links = self.links();
        let target = links
            .iter()
            .rev()
            .filter(|l| l.role == Role::Agent)
            .find(|l| l.tx.send(frame.clone()).is_ok())
            .ok_or_else(|| DispatchError::NoAgent(instance.id.clone()))?;

        debug!(instance_id = %instance.id, agent = %target.uuid, "Placed instance");
        Ok(target.uuid)
    }

    /// Send one frame per `(node, payload)` pair. Every node is resolved to
    /// a live link first; when any is unreachable nothing is sent.
    fn to_nodes<P: Payload>(&self, commands: &[(NodeId, P)]) -> Result<(), DispatchError> {
        let links = self.links();
        let mut routed = Vec::with_capacity(commands.len());
        for (node, payload) in commands {
            let link = links
                .iter()
                .rev()
                .find(|l| &l.uuid.node_id() == node && !l.tx.is_closed())
                .ok_or_else(|| DispatchError::NodeUnreachable(node.clone()))?;
            routed.push((link, node, Frame::message(payload)?));
        }

        for (link, node, frame) in routed {
            link.tx
                .send(frame)
                .map_err(|_| DispatchError::NodeUnreachable(node.clone()))?;
        }
        Ok(())
    }

    /// Stop every `(node, instance)` target, or none of them.
    pub fn stop_all(&self, targets: &[(NodeId, InstanceId)]) -> Result<(), DispatchError> {
        let commands: Vec<_> = targets
            .iter()
            .map(|(node, instance)| {
                (
                    node.clone(),
                    StopPayload {
                        instance_uuid: instance.clone(),
                    },
                )
            })
            .collect();
        self.to_nodes(&commands)
    }

    /// Restart every `(node, instance)` target, or none of them.
    pub fn restart_all(&self, targets: &[(NodeId, InstanceId)]) -> Result<(), DispatchError> {
        let commands: Vec<_> = targets
            .iter()
            .map(|(node, instance)| {
                (
                    node.clone(),
                    RestartPayload {
                        instance_uuid: instance.clone(),
                    },
                )
            })
            .collect();
        self.to_nodes(&commands)
    }

    pub fn delete(&self, node: &NodeId, instance: &InstanceId) -> Result<(), DispatchError> {
        self.to_nodes(&[(
            node.clone(),
            DeletePayload {
                instance_uuid: instance.clone(),
            },
        )])
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Apply one frame from an established link. Returns an error frame to
    /// send back when the frame is refused.
    fn handle(&self, role: Role, uuid: AgentUuid, frame: Frame) -> Option<Frame> {
        let Some(kind) = frame.kind() else {
            return Some(refuse(
                ErrorCode::InvalidPayload,
                format!("unexpected {} frame on an established link", frame.name()),
            ));
        };

        let applied = match kind {
            MessageKind::Command(CommandKind::Stats) => frame
                .decode::<StatsPayload>()
                .map(|stats| self.store.apply_stats(&stats)),
            MessageKind::Event(EventKind::InstanceStopped) => frame
                .decode::<InstanceStoppedPayload>()
                .map(|e| self.store.instance_stopped(&e.instance_uuid)),
            MessageKind::Event(EventKind::InstanceDeleted) => frame
                .decode::<InstanceDeletedPayload>()
                .map(|e| self.store.instance_deleted(&e.instance_uuid)),
            MessageKind::Event(EventKind::TraceReport) => frame
                .decode::<TraceReportPayload>()
                .map(|e| self.store.add_trace_frames(&e.frames)),
            MessageKind::Event(EventKind::ConcentratorInstanceAdded) => {
                if role != Role::CnciAgent {
                    return Some(refuse(
                        ErrorCode::InvalidRole,
                        format!("{} may not announce concentrators", role),
                    ));
                }
                frame
                    .decode::<ConcentratorInstanceAddedPayload>()
                    .map(|e| self.store.add_cnci(&e))
            }
            other => {
                return Some(refuse(
                    ErrorCode::InvalidPayload,
                    format!("{} is not accepted from agents", other),
                ));
            }
        };

        if let Err(e) = applied {
            warn!(%uuid, %kind, error = %e, "Refusing malformed payload");
            return Some(refuse(ErrorCode::InvalidPayload, e.to_string()));
        }

        debug!(%uuid, %kind, "Applied agent message");
        self.observed.deliver(kind, frame);
        None
    }
}

fn refuse(code: ErrorCode, detail: impl Into<String>) -> Frame {
    Frame::Error {
        code,
        detail: detail.into(),
    }
}

// =============================================================================
// Serving
// =============================================================================

/// Accept control connections until `shutdown` flips.
pub async fn serve(
    listener: TcpListener,
    pki: Arc<TestPki>,
    hub: Arc<ControlHub>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(pki.server_config()?);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Control accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let pki = Arc::clone(&pki);
                let hub = Arc::clone(&hub);
                connections.spawn(async move {
                    let stream = match acceptor.accept(tcp).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(%peer, error = %e, "Control TLS handshake failed");
                            return;
                        }
                    };
                    let authenticated = pki
                        .identify(stream.get_ref().1.peer_certificates())
                        .is_some();
                    handle_connection(stream, authenticated, hub).await;
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("Control listener shutting down");
    connections.shutdown().await;
    Ok(())
}

/// Run one connection from handshake to close.
pub async fn handle_connection<S>(stream: S, authenticated: bool, hub: Arc<ControlHub>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let (role, uuid) = match handshake(&mut reader, authenticated).await {
        Ok(peer) => peer,
        Err(refusal) => {
            debug!(frame = ?refusal, "Refusing control connection");
            let _ = write_frame(&mut writer, &refusal).await;
            return;
        }
    };

    // Attached before answering, so the agent is listed once it sees
    // `connected`. Commands queue until the writer task starts.
    let (link, mut rx) = hub.attach(role, uuid);
    let connected = Frame::Connected {
        role: Role::Controller,
        uuid: hub.uuid,
    };
    if let Err(e) = write_frame(&mut writer, &connected).await {
        warn!(%uuid, error = %e, "Failed to answer connect");
        hub.detach(link);
        return;
    }
    info!(%role, %uuid, link, "Agent connected");

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(error = %e, "Control write failed");
                break;
            }
        }
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if let Some(refusal) = hub.handle(role, uuid, frame) {
                    let tx = hub
                        .links()
                        .iter()
                        .find(|l| l.id == link)
                        .map(|l| l.tx.clone());
                    if let Some(tx) = tx {
                        let _ = tx.send(refusal);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%uuid, error = %e, "Control read failed");
                break;
            }
        }
    }

    hub.detach(link);
    writer_task.abort();
    info!(%role, %uuid, link, "Agent disconnected");
}

async fn handshake<R>(reader: &mut R, authenticated: bool) -> Result<(Role, AgentUuid), Frame>
where
    R: AsyncRead + Unpin,
{
    if !authenticated {
        return Err(refuse(
            ErrorCode::Unauthenticated,
            "a client certificate is required",
        ));
    }

    let first = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(reader)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            return Err(refuse(ErrorCode::NotConnected, "closed before connect"));
        }
        Ok(Err(e)) => return Err(refuse(ErrorCode::InvalidPayload, e.to_string())),
        Err(_) => return Err(refuse(ErrorCode::NotConnected, "no connect frame in time")),
    };

    match first {
        Frame::Connect { role, uuid } if role.is_agent() => Ok((role, uuid)),
        Frame::Connect { role, .. } => Err(refuse(
            ErrorCode::InvalidRole,
            format!("role {} may not connect here", role),
        )),
        other => Err(refuse(
            ErrorCode::NotConnected,
            format!("expected connect, got {}", other.name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpat_proto::{InstanceState, NodeStatus, StartPayload};
    use tokio::io::{duplex, DuplexStream};

    async fn open(hub: &Arc<ControlHub>, role: Role, uuid: AgentUuid) -> (DuplexStream, Frame) {
        let (mut client, server) = duplex(64 * 1024);
        tokio::spawn(handle_connection(server, true, Arc::clone(hub)));
        write_frame(&mut client, &Frame::Connect { role, uuid })
            .await
            .unwrap();
        let answer = read_frame(&mut client).await.unwrap().unwrap();
        (client, answer)
    }

    fn stats(uuid: AgentUuid, instances: Vec<cpat_proto::InstanceStat>) -> StatsPayload {
        StatsPayload {
            node_uuid: uuid.node_id(),
            hostname: "agent".to_string(),
            status: NodeStatus::Ready,
            mem_total_mb: 1024,
            mem_available_mb: 512,
            disk_total_mb: 2048,
            disk_available_mb: 1024,
            load: 0,
            online_cpus: 2,
            instances,
        }
    }

    #[tokio::test]
    async fn test_handshake_answers_connected() {
        let hub = Arc::new(ControlHub::new(Arc::new(Store::seeded("demo"))));
        let (_client, answer) = open(&hub, Role::Agent, AgentUuid::new()).await;
        assert!(matches!(
            answer,
            Frame::Connected {
                role: Role::Controller,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_peer_is_refused() {
        let hub = Arc::new(ControlHub::new(Arc::new(Store::seeded("demo"))));
        let (mut client, server) = duplex(4096);
        tokio::spawn(handle_connection(server, false, hub));

        let answer = read_frame(&mut client).await.unwrap().unwrap();
        assert!(matches!(
            answer,
            Frame::Error {
                code: ErrorCode::Unauthenticated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_controller_role_is_refused() {
        let hub = Arc::new(ControlHub::new(Arc::new(Store::seeded("demo"))));
        let (_client, answer) = open(&hub, Role::Scheduler, AgentUuid::new()).await;
        assert!(matches!(
            answer,
            Frame::Error {
                code: ErrorCode::InvalidRole,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_message_before_connect_is_refused() {
        let hub = Arc::new(ControlHub::new(Arc::new(Store::seeded("demo"))));
        let (mut client, server) = duplex(4096);
        tokio::spawn(handle_connection(server, true, hub));

        let stats = Frame::message(&stats(AgentUuid::new(), vec![])).unwrap();
        write_frame(&mut client, &stats).await.unwrap();
        let answer = read_frame(&mut client).await.unwrap().unwrap();
        assert!(matches!(
            answer,
            Frame::Error {
                code: ErrorCode::NotConnected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_place_and_report_binds_instance() {
        let store = Arc::new(Store::seeded("demo"));
        let hub = Arc::new(ControlHub::new(Arc::clone(&store)));
        let uuid = AgentUuid::new();
        let (mut client, _) = open(&hub, Role::Agent, uuid).await;

        let tenant = store.tenant_for_user("demo").unwrap();
        let workload = store.workloads(&tenant).unwrap()[0].id.clone();
        let created = store.create_instances(&tenant, &workload, 1, None).unwrap();
        assert_eq!(hub.place(&created[0]).unwrap(), uuid);

        let start: StartPayload = read_frame(&mut client)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(start.instance_uuid, created[0].id);

        let observed = hub.observed().expect(CommandKind::Stats.into()).unwrap();
        let report = stats(
            uuid,
            vec![cpat_proto::InstanceStat {
                instance_uuid: start.instance_uuid.clone(),
                state: InstanceState::Running,
                ssh_ip: "10.0.0.9".to_string(),
                ssh_port: 33001,
                vcpu_usage: 0,
                memory_usage_mb: 0,
                disk_usage_mb: 0,
            }],
        );
        write_frame(&mut client, &Frame::message(&report).unwrap())
            .await
            .unwrap();
        observed.wait(Duration::from_secs(5)).await.unwrap();

        let server = store.server(&tenant, &created[0].id).unwrap();
        assert_eq!(server.node_id, Some(uuid.node_id()));
        assert_eq!(server.status, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_plain_agent_cannot_announce_concentrator() {
        let hub = Arc::new(ControlHub::new(Arc::new(Store::seeded("demo"))));
        let (mut client, _) = open(&hub, Role::Agent, AgentUuid::new()).await;

        let added = ConcentratorInstanceAddedPayload {
            instance_uuid: InstanceId::generate(),
            tenant_uuid: "t".parse().unwrap(),
            concentrator_ip: "192.168.0.1".to_string(),
            concentrator_mac: "02:00:c0:a8:00:01".to_string(),
        };
        write_frame(&mut client, &Frame::message(&added).unwrap())
            .await
            .unwrap();
        let answer = read_frame(&mut client).await.unwrap().unwrap();
        assert!(matches!(
            answer,
            Frame::Error {
                code: ErrorCode::InvalidRole,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_marks_node_offline() {
        let store = Arc::new(Store::seeded("demo"));
        let hub = Arc::new(ControlHub::new(Arc::clone(&store)));
        let uuid = AgentUuid::new();
        let (mut client, _) = open(&hub, Role::Agent, uuid).await;

        let applied = hub.observed().expect(CommandKind::Stats.into()).unwrap();
        write_frame(&mut client, &Frame::message(&stats(uuid, vec![])).unwrap())
            .await
            .unwrap();
        applied.wait(Duration::from_secs(5)).await.unwrap();

        let gone = hub
            .observed()
            .expect(EventKind::NodeDisconnected.into())
            .unwrap();
        drop(client);
        gone.wait(Duration::from_secs(5)).await.unwrap();

        assert_eq!(store.node_summary().status.total_nodes_offline, 1);
        assert_eq!(hub.connected(), 0);
    }

    #[tokio::test]
    async fn test_stop_all_sends_nothing_when_a_node_is_gone() {
        let hub = Arc::new(ControlHub::new(Arc::new(Store::seeded("demo"))));
        let (a, b) = (AgentUuid::new(), AgentUuid::new());
        let (mut live, _) = open(&hub, Role::Agent, a).await;
        let (closing, _) = open(&hub, Role::Agent, b).await;

        let gone = hub
            .observed()
            .expect(EventKind::NodeDisconnected.into())
            .unwrap();
        drop(closing);
        gone.wait(Duration::from_secs(5)).await.unwrap();

        let (kept, lost) = (InstanceId::generate(), InstanceId::generate());
        let result = hub.stop_all(&[
            (a.node_id(), kept.clone()),
            (b.node_id(), lost.clone()),
        ]);
        assert!(matches!(result, Err(DispatchError::NodeUnreachable(node)) if node == b.node_id()));
        assert!(
            tokio::time::timeout(Duration::from_millis(200), read_frame(&mut live))
                .await
                .is_err(),
            "refused batch reached the live agent"
        );

        hub.stop_all(&[(a.node_id(), kept.clone())]).unwrap();
        let stop: StopPayload = read_frame(&mut live)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(stop.instance_uuid, kept);
    }

    #[tokio::test]
    async fn test_place_without_agents_fails() {
        let store = Arc::new(Store::seeded("demo"));
        let hub = ControlHub::new(Arc::clone(&store));
        let tenant = store.tenant_for_user("demo").unwrap();
        let workload = store.workloads(&tenant).unwrap()[0].id.clone();
        let created = store.create_instances(&tenant, &workload, 1, None).unwrap();
        assert!(matches!(
            hub.place(&created[0]),
            Err(DispatchError::NoAgent(_))
        ));
    }
}
