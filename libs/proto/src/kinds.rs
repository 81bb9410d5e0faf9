//! Roles and message kind tags.

use serde::{Deserialize, Serialize};

/// Role a participant claims when it connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Compute node agent running tenant workloads.
    Agent,
    /// Network node agent hosting tenant concentrator instances.
    CnciAgent,
    /// The controller itself.
    Controller,
    /// Scheduler relaying commands between controller and agents.
    Scheduler,
}

impl Role {
    /// Returns true for roles that execute workloads.
    pub fn is_agent(&self) -> bool {
        matches!(self, Role::Agent | Role::CnciAgent)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Agent => "agent",
            Role::CnciAgent => "cnci_agent",
            Role::Controller => "controller",
            Role::Scheduler => "scheduler",
        };
        write!(f, "{}", s)
    }
}

/// Command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Launch an instance.
    Start,
    /// Stop a running instance, keeping it on the node.
    Stop,
    /// Start an exited instance again.
    Restart,
    /// Remove an instance from the node.
    Delete,
    /// Full status report from a node.
    Stats,
    /// Move every instance off a node.
    Evacuate,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Restart => "restart",
            CommandKind::Delete => "delete",
            CommandKind::Stats => "stats",
            CommandKind::Evacuate => "evacuate",
        };
        write!(f, "{}", s)
    }
}

/// Event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InstanceStopped,
    InstanceDeleted,
    TraceReport,
    ConcentratorInstanceAdded,
    NodeConnected,
    NodeDisconnected,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::InstanceStopped => "instance_stopped",
            EventKind::InstanceDeleted => "instance_deleted",
            EventKind::TraceReport => "trace_report",
            EventKind::ConcentratorInstanceAdded => "concentrator_instance_added",
            EventKind::NodeConnected => "node_connected",
            EventKind::NodeDisconnected => "node_disconnected",
        };
        write!(f, "{}", s)
    }
}

/// Any message that can be correlated: a command or an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command(CommandKind),
    Event(EventKind),
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Command(kind) => write!(f, "command:{}", kind),
            MessageKind::Event(kind) => write!(f, "event:{}", kind),
        }
    }
}

impl From<CommandKind> for MessageKind {
    fn from(kind: CommandKind) -> Self {
        MessageKind::Command(kind)
    }
}

impl From<EventKind> for MessageKind {
    fn from(kind: EventKind) -> Self {
        MessageKind::Event(kind)
    }
}
