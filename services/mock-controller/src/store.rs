//! In-memory records behind the reference controller.
//!
//! REST handlers, the control listener, and the [`Datastore`] view all read
//! through the same snapshot builders, so what REST reports and what the
//! datastore handle reports come from one place.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use cpat_harness::api::{
    BatchFrameStats, ClusterStatus, ClusterSummary, Cnci, CnciDetails, Cncis, Event, Events,
    Node, NodeServer, NodeServers, Nodes, Quota, ServerDetails, Servers, TenantResources,
    TraceData, TraceSummary, TracesSummary, Usage, UsageHistory,
};
use cpat_harness::admin::Image;
use cpat_id::{InstanceId, NodeId, TenantId, TraceLabel, WorkloadId};
use cpat_proto::{
    ConcentratorInstanceAddedPayload, InstanceState, NodeStatus, StartPayload, StatsPayload,
    TraceFrame,
};

pub const QUOTA_INSTANCES: &str = "tenant-instances-quota";
pub const QUOTA_VCPU: &str = "tenant-vcpu-quota";
pub const QUOTA_MEM: &str = "tenant-mem-quota";
pub const QUOTA_STORAGE: &str = "tenant-storage-quota";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no tenant for user {0}")]
    UnknownUser(String),

    #[error("tenant {0} not found")]
    TenantNotFound(TenantId),

    #[error("workload {workload} not available to tenant {tenant}")]
    WorkloadNotFound {
        tenant: TenantId,
        workload: WorkloadId,
    },

    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("instance {0} is not assigned to a node")]
    Unassigned(InstanceId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("cnci {0} not found")]
    CnciNotFound(InstanceId),

    #[error("trace {0} not found")]
    TraceNotFound(TraceLabel),

    #[error("image {0} not found")]
    ImageNotFound(String),

    #[error("image {0} already exists")]
    ImageExists(String),

    #[error("tenant {tenant} has {used} of {limit} instances; {requested} more exceeds the quota")]
    QuotaExceeded {
        tenant: TenantId,
        requested: u32,
        used: usize,
        limit: i64,
    },
}

/// A launchable workload definition.
#[derive(Debug, Clone)]
pub struct WorkloadRecord {
    pub id: WorkloadId,
    pub vcpus: u32,
    pub mem_mb: u64,
    pub disk_mb: u64,
}

#[derive(Debug, Clone)]
struct TenantRecord {
    id: TenantId,
    user: String,
    workloads: Vec<WorkloadRecord>,
    limits: Vec<(&'static str, i64)>,
}

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub tenant: TenantId,
    pub workload: WorkloadRecord,
    pub node: Option<NodeId>,
    pub status: InstanceState,
    pub ssh_ip: String,
    pub ssh_port: u16,
    pub created: DateTime<Utc>,
    pub trace_label: Option<TraceLabel>,
}

impl InstanceRecord {
    /// The `start` command that launches this instance.
    pub fn start_payload(&self) -> StartPayload {
        StartPayload {
            instance_uuid: self.id.clone(),
            tenant_uuid: self.tenant.clone(),
            workload_id: self.workload.id.clone(),
            vcpus: self.workload.vcpus,
            mem_mb: self.workload.mem_mb,
            disk_mb: self.workload.disk_mb,
            trace_label: self.trace_label.clone(),
        }
    }

    fn details(&self) -> ServerDetails {
        ServerDetails {
            id: self.id.clone(),
            tenant_id: self.tenant.clone(),
            workload_id: self.workload.id.clone(),
            node_id: self.node.clone(),
            status: self.status,
            ssh_ip: self.ssh_ip.clone(),
            ssh_port: self.ssh_port,
            created: self.created,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeRecord {
    stats: StatsPayload,
    status: NodeStatus,
    updated: DateTime<Utc>,
}

#[derive(Default)]
struct StoreInner {
    tenants: Vec<TenantRecord>,
    instances: BTreeMap<InstanceId, InstanceRecord>,
    nodes: BTreeMap<NodeId, NodeRecord>,
    usage: HashMap<TenantId, Vec<Usage>>,
    events: Vec<Event>,
    cncis: BTreeMap<InstanceId, Cnci>,
    traces: BTreeMap<TraceLabel, Vec<TraceFrame>>,
    images: BTreeMap<String, Image>,
}

impl StoreInner {
    fn tenant(&self, id: &TenantId) -> Result<&TenantRecord, StoreError> {
        self.tenants
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::TenantNotFound(id.clone()))
    }

    fn owned(&self, tenant: &TenantId, id: &InstanceId) -> Result<&InstanceRecord, StoreError> {
        self.instances
            .get(id)
            .filter(|i| &i.tenant == tenant)
            .ok_or_else(|| StoreError::InstanceNotFound(id.clone()))
    }

    fn log(&mut self, tenant: Option<&TenantId>, event_type: &str, message: String) {
        debug!(event_type, message = %message, "Logging event");
        self.events.push(Event {
            timestamp: Utc::now(),
            tenant_id: tenant.cloned(),
            event_type: event_type.to_string(),
            message,
        });
    }

    fn tenant_usage_now(&self, tenant: &TenantId) -> Usage {
        let running = self
            .instances
            .values()
            .filter(|i| &i.tenant == tenant && i.status == InstanceState::Running);
        let mut usage = Usage {
            vcpu: 0,
            memory_mb: 0,
            disk_mb: 0,
            timestamp: Utc::now(),
        };
        for instance in running {
            usage.vcpu += u64::from(instance.workload.vcpus);
            usage.memory_mb += instance.workload.mem_mb;
            usage.disk_mb += instance.workload.disk_mb;
        }
        usage
    }
}

/// Thread-safe store.
pub struct Store {
    inner: Mutex<StoreInner>,
}

impl Store {
    /// A store seeded with one tenant owned by `user`, one workload, and
    /// default quotas.
    pub fn seeded(user: &str) -> Self {
        let tenant = TenantRecord {
            id: TenantId::generate(),
            user: user.to_string(),
            workloads: vec![WorkloadRecord {
                id: WorkloadId::generate(),
                vcpus: 2,
                mem_mb: 128,
                disk_mb: 1024,
            }],
            limits: vec![
                (QUOTA_INSTANCES, 1000),
                (QUOTA_VCPU, -1),
                (QUOTA_MEM, -1),
                (QUOTA_STORAGE, -1),
            ],
        };
        info!(tenant_id = %tenant.id, user, "Seeded tenant");

        Self {
            inner: Mutex::new(StoreInner {
                tenants: vec![tenant],
                ..StoreInner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Tenants
    // =========================================================================

    pub fn tenant_for_user(&self, user: &str) -> Result<TenantId, StoreError> {
        self.lock()
            .tenants
            .iter()
            .find(|t| t.user == user)
            .map(|t| t.id.clone())
            .ok_or_else(|| StoreError::UnknownUser(user.to_string()))
    }

    pub fn user_owns(&self, user: &str, tenant: &TenantId) -> bool {
        self.lock()
            .tenants
            .iter()
            .any(|t| t.user == user && &t.id == tenant)
    }

    pub fn workloads(&self, tenant: &TenantId) -> Result<Vec<WorkloadRecord>, StoreError> {
        Ok(self.lock().tenant(tenant)?.workloads.clone())
    }

    pub fn quotas(&self, tenant: &TenantId) -> Result<TenantResources, StoreError> {
        let inner = self.lock();
        let record = inner.tenant(tenant)?;
        let owned: Vec<&InstanceRecord> = inner
            .instances
            .values()
            .filter(|i| &i.tenant == tenant)
            .collect();

        let quotas = record
            .limits
            .iter()
            .map(|(name, limit)| {
                let usage: u64 = match *name {
                    QUOTA_INSTANCES => owned.len() as u64,
                    QUOTA_VCPU => owned.iter().map(|i| u64::from(i.workload.vcpus)).sum(),
                    QUOTA_MEM => owned.iter().map(|i| i.workload.mem_mb).sum(),
                    QUOTA_STORAGE => owned.iter().map(|i| i.workload.disk_mb).sum(),
                    _ => 0,
                };
                Quota {
                    name: name.to_string(),
                    limit: *limit,
                    usage: usage as i64,
                }
            })
            .collect();

        Ok(TenantResources {
            id: tenant.clone(),
            timestamp: Utc::now(),
            quotas,
        })
    }

    pub fn usage(
        &self,
        tenant: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageHistory, StoreError> {
        let inner = self.lock();
        inner.tenant(tenant)?;
        let usages = inner
            .usage
            .get(tenant)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|u| u.timestamp >= start && u.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(UsageHistory { usages })
    }

    // =========================================================================
    // Instances
    // =========================================================================

    pub fn create_instances(
        &self,
        tenant: &TenantId,
        workload: &WorkloadId,
        count: u32,
        trace_label: Option<TraceLabel>,
    ) -> Result<Vec<InstanceRecord>, StoreError> {
        let mut inner = self.lock();
        let record = inner.tenant(tenant)?;
        let workload = record
            .workloads
            .iter()
            .find(|w| &w.id == workload)
            .cloned()
            .ok_or_else(|| StoreError::WorkloadNotFound {
                tenant: tenant.clone(),
                workload: workload.clone(),
            })?;

        // A negative limit is unlimited.
        let limit = record
            .limits
            .iter()
            .find(|(name, _)| *name == QUOTA_INSTANCES)
            .map_or(-1, |(_, limit)| *limit);
        let used = inner.instances.values().filter(|i| &i.tenant == tenant).count();
        if limit >= 0 && used as i64 + i64::from(count) > limit {
            return Err(StoreError::QuotaExceeded {
                tenant: tenant.clone(),
                requested: count,
                used,
                limit,
            });
        }

        let mut created = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = InstanceId::generate();
            let record = InstanceRecord {
                id: id.clone(),
                tenant: tenant.clone(),
                workload: workload.clone(),
                node: None,
                status: InstanceState::Pending,
                ssh_ip: String::new(),
                ssh_port: 0,
                created: Utc::now(),
                trace_label: trace_label.clone(),
            };
            inner.instances.insert(id.clone(), record.clone());
            inner.log(Some(tenant), "info", format!("Created instance {}", id));
            created.push(record);
        }
        Ok(created)
    }

    pub fn servers(&self, tenant: &TenantId) -> Result<Servers, StoreError> {
        let inner = self.lock();
        inner.tenant(tenant)?;
        let servers: Vec<ServerDetails> = inner
            .instances
            .values()
            .filter(|i| &i.tenant == tenant)
            .map(InstanceRecord::details)
            .collect();
        Ok(Servers {
            total_servers: servers.len(),
            servers,
        })
    }

    pub fn server(&self, tenant: &TenantId, id: &InstanceId) -> Result<ServerDetails, StoreError> {
        Ok(self.lock().owned(tenant, id)?.details())
    }

    /// The node an instance is bound to; unassigned instances are refused.
    pub fn assigned_node(&self, tenant: &TenantId, id: &InstanceId) -> Result<NodeId, StoreError> {
        self.lock()
            .owned(tenant, id)?
            .node
            .clone()
            .ok_or_else(|| StoreError::Unassigned(id.clone()))
    }

    /// Remove a bound instance, returning the node it was on.
    pub fn delete_instance(&self, tenant: &TenantId, id: &InstanceId) -> Result<NodeId, StoreError> {
        let mut inner = self.lock();
        let node = inner
            .owned(tenant, id)?
            .node
            .clone()
            .ok_or_else(|| StoreError::Unassigned(id.clone()))?;
        inner.instances.remove(id);
        inner.log(Some(tenant), "info", format!("Deleted instance {}", id));
        Ok(node)
    }

    /// Whether an instance has exited and may be restarted.
    pub fn is_exited(&self, id: &InstanceId) -> bool {
        self.lock()
            .instances
            .get(id)
            .is_some_and(|i| i.status == InstanceState::Exited)
    }

    /// Mark an exited instance as restarting once its restart was sent.
    /// Returns false when it is not exited.
    pub fn begin_restart(&self, id: &InstanceId) -> bool {
        let mut inner = self.lock();
        match inner.instances.get_mut(id) {
            Some(instance) if instance.status == InstanceState::Exited => {
                instance.status = InstanceState::Pending;
                true
            }
            _ => false,
        }
    }

    // =========================================================================
    // Agent reports
    // =========================================================================

    /// Bind reported instances to the node, refresh node statistics, and take
    /// a usage sample for every tenant with instances on the node.
    pub fn apply_stats(&self, stats: &StatsPayload) {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut touched: Vec<TenantId> = Vec::new();

        for reported in &stats.instances {
            if let Some(instance) = inner.instances.get_mut(&reported.instance_uuid) {
                instance.node = Some(stats.node_uuid.clone());
                instance.status = reported.state;
                instance.ssh_ip = reported.ssh_ip.clone();
                instance.ssh_port = reported.ssh_port;
                if !touched.contains(&instance.tenant) {
                    touched.push(instance.tenant.clone());
                }
            }
        }

        inner.nodes.insert(
            stats.node_uuid.clone(),
            NodeRecord {
                stats: stats.clone(),
                status: stats.status,
                updated: now,
            },
        );

        for tenant in touched {
            let sample = inner.tenant_usage_now(&tenant);
            inner.usage.entry(tenant).or_default().push(sample);
        }
        debug!(node_id = %stats.node_uuid, instances = stats.instances.len(), "Applied node stats");
    }

    pub fn instance_stopped(&self, id: &InstanceId) {
        let mut inner = self.lock();
        let Some(instance) = inner.instances.get_mut(id) else {
            return;
        };
        instance.status = InstanceState::Exited;
        let tenant = instance.tenant.clone();
        inner.log(Some(&tenant), "info", format!("Instance {} stopped", id));
    }

    pub fn instance_deleted(&self, id: &InstanceId) {
        let mut inner = self.lock();
        if let Some(instance) = inner.instances.remove(id) {
            inner.log(
                Some(&instance.tenant),
                "info",
                format!("Instance {} deleted by its node", id),
            );
        }
    }

    pub fn add_trace_frames(&self, frames: &[TraceFrame]) {
        let mut inner = self.lock();
        for frame in frames {
            inner
                .traces
                .entry(frame.label.clone())
                .or_default()
                .push(frame.clone());
        }
    }

    pub fn add_cnci(&self, added: &ConcentratorInstanceAddedPayload) {
        let mut inner = self.lock();
        inner.cncis.insert(
            added.instance_uuid.clone(),
            Cnci {
                id: added.instance_uuid.clone(),
                tenant_id: added.tenant_uuid.clone(),
                ipv4: added.concentrator_ip.clone(),
                mac: added.concentrator_mac.clone(),
                subnets: vec!["172.16.0.0/24".to_string()],
            },
        );
        inner.log(
            Some(&added.tenant_uuid),
            "info",
            format!("Concentrator {} active", added.instance_uuid),
        );
    }

    pub fn node_connected(&self, node: &NodeId, role: &str) {
        self.lock()
            .log(None, "info", format!("{} {} connected", role, node));
    }

    /// Marks the node offline. Not logged: a disconnect lands at an
    /// arbitrary point after the agent hangs up.
    pub fn node_disconnected(&self, node: &NodeId) {
        if let Some(record) = self.lock().nodes.get_mut(node) {
            record.status = NodeStatus::Offline;
            record.updated = Utc::now();
        }
    }

    // =========================================================================
    // Cluster views
    // =========================================================================

    pub fn events(&self, tenant: Option<&TenantId>) -> Events {
        let inner = self.lock();
        let events = inner
            .events
            .iter()
            .filter(|e| tenant.is_none() || e.tenant_id.as_ref() == tenant)
            .cloned()
            .collect();
        Events { events }
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
        info!("Cleared event log");
    }

    pub fn nodes(&self) -> Nodes {
        let inner = self.lock();
        let nodes = inner
            .nodes
            .iter()
            .map(|(id, record)| {
                let count = |state: InstanceState| {
                    inner
                        .instances
                        .values()
                        .filter(|i| i.node.as_ref() == Some(id) && i.status == state)
                        .count()
                };
                Node {
                    id: id.clone(),
                    hostname: record.stats.hostname.clone(),
                    status: record.status,
                    updated: record.updated,
                    mem_total_mb: record.stats.mem_total_mb,
                    mem_available_mb: record.stats.mem_available_mb,
                    disk_total_mb: record.stats.disk_total_mb,
                    disk_available_mb: record.stats.disk_available_mb,
                    load: record.stats.load,
                    online_cpus: record.stats.online_cpus,
                    total_instances: inner
                        .instances
                        .values()
                        .filter(|i| i.node.as_ref() == Some(id))
                        .count(),
                    total_running_instances: count(InstanceState::Running),
                    total_pending_instances: count(InstanceState::Pending),
                    total_paused_instances: count(InstanceState::Paused),
                }
            })
            .collect();
        Nodes { nodes }
    }

    pub fn node_summary(&self) -> ClusterStatus {
        let inner = self.lock();
        let count = |status: NodeStatus| inner.nodes.values().filter(|n| n.status == status).count();
        ClusterStatus {
            status: ClusterSummary {
                total_nodes: inner.nodes.len(),
                total_nodes_ready: count(NodeStatus::Ready),
                total_nodes_full: count(NodeStatus::Full),
                total_nodes_offline: count(NodeStatus::Offline),
                total_nodes_maintenance: count(NodeStatus::Maintenance),
            },
        }
    }

    pub fn node_servers(&self, node: &NodeId) -> Result<NodeServers, StoreError> {
        let inner = self.lock();
        if !inner.nodes.contains_key(node) {
            return Err(StoreError::NodeNotFound(node.clone()));
        }
        let servers: Vec<NodeServer> = inner
            .instances
            .values()
            .filter(|i| i.node.as_ref() == Some(node))
            .map(|i| NodeServer {
                id: i.id.clone(),
                tenant_id: i.tenant.clone(),
                status: i.status,
                ssh_ip: i.ssh_ip.clone(),
            })
            .collect();
        Ok(NodeServers {
            total_servers: servers.len(),
            servers,
        })
    }

    pub fn cncis(&self) -> Cncis {
        Cncis {
            cncis: self.lock().cncis.values().cloned().collect(),
        }
    }

    pub fn cnci(&self, id: &InstanceId) -> Result<CnciDetails, StoreError> {
        self.lock()
            .cncis
            .get(id)
            .cloned()
            .map(|cnci| CnciDetails { cnci })
            .ok_or_else(|| StoreError::CnciNotFound(id.clone()))
    }

    pub fn traces(&self) -> TracesSummary {
        let summaries = self
            .lock()
            .traces
            .iter()
            .map(|(label, frames)| TraceSummary {
                label: label.clone(),
                instances: frames.len(),
            })
            .collect();
        TracesSummary { summaries }
    }

    pub fn trace_data(&self, label: &TraceLabel) -> Result<TraceData, StoreError> {
        let inner = self.lock();
        let frames = inner
            .traces
            .get(label)
            .ok_or_else(|| StoreError::TraceNotFound(label.clone()))?;

        let (controller_avg, controller_var) = mean_variance(frames.iter().map(|f| f.controller_elapsed_ms));
        let (scheduler_avg, scheduler_var) = mean_variance(frames.iter().map(|f| f.scheduler_elapsed_ms));
        let (launcher_avg, launcher_var) = mean_variance(frames.iter().map(|f| f.launcher_elapsed_ms));

        Ok(TraceData {
            label: label.clone(),
            summary: BatchFrameStats {
                num_instances: frames.len(),
                average_controller_elapsed_ms: controller_avg,
                average_scheduler_elapsed_ms: scheduler_avg,
                average_launcher_elapsed_ms: launcher_avg,
                variance_controller_ms: controller_var,
                variance_scheduler_ms: scheduler_var,
                variance_launcher_ms: launcher_var,
            },
        })
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub fn add_image(&self, image: Image) -> Result<Image, StoreError> {
        let mut inner = self.lock();
        if inner.images.contains_key(&image.id) {
            return Err(StoreError::ImageExists(image.id));
        }
        inner.images.insert(image.id.clone(), image.clone());
        Ok(image)
    }

    pub fn image(&self, id: &str) -> Result<Image, StoreError> {
        self.lock()
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ImageNotFound(id.to_string()))
    }

    pub fn images(&self) -> Vec<Image> {
        self.lock().images.values().cloned().collect()
    }

    pub fn delete_image(&self, id: &str) -> Result<(), StoreError> {
        self.lock()
            .images
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::ImageNotFound(id.to_string()))
    }
}

/// Population mean and variance; zero for an empty series.
fn mean_variance(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.clone().count();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance)
}
