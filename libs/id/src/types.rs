//! Typed reference definitions for every resource the harness threads
//! through REST calls and protocol payloads.

use crate::define_ref;

// =============================================================================
// Tenancy
// =============================================================================

define_ref!(TenantId, "tenant");
define_ref!(WorkloadId, "workload");

// =============================================================================
// Runtime
// =============================================================================

define_ref!(InstanceId, "instance");
define_ref!(NodeId, "node");

// =============================================================================
// Tracing
// =============================================================================

define_ref!(TraceLabel, "trace label");

// =============================================================================
// Agent Identity
// =============================================================================

/// Identity of a protocol participant.
///
/// Unlike resource references, identities are chosen by whoever connects, so
/// the harness mints them for the agents it impersonates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentUuid(uuid::Uuid);

impl AgentUuid {
    /// Creates a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates an identity from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(&self) -> uuid::Uuid {
        self.0
    }

    /// Parses an identity from its hyphenated form.
    pub fn parse(s: &str) -> Result<Self, crate::IdError> {
        if s.is_empty() {
            return Err(crate::IdError::Empty);
        }
        s.parse::<uuid::Uuid>()
            .map(Self)
            .map_err(|e| crate::IdError::InvalidUuid(e.to_string()))
    }

    /// The node reference under which the service lists this agent.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        NodeId(self.0.to_string())
    }
}

impl Default for AgentUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentUuid {
    type Err = crate::IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for AgentUuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for AgentUuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_instance_id_parse() {
        let id: InstanceId = "8d3c1a5e-2f4b-4c3e-9a41-0d8b6f1c2e77".parse().unwrap();
        assert_eq!(id.as_str(), "8d3c1a5e-2f4b-4c3e-9a41-0d8b6f1c2e77");
    }

    #[test]
    fn test_reference_empty() {
        let result: Result<TenantId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_reference_rejects_path_separator() {
        let result: Result<InstanceId, _> = "abc/def".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidCharacter { character: '/', kind: "instance", .. }
        ));
    }

    #[test]
    fn test_reference_rejects_whitespace() {
        let result: Result<NodeId, _> = "node 1".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_reference_json_rejects_invalid() {
        let result: Result<TenantId, _> = serde_json::from_str("\"a?b\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_agent_uuid_node_id() {
        let agent = AgentUuid::new();
        assert_eq!(agent.node_id().as_str(), agent.to_string());
    }

    #[test]
    fn test_agent_uuid_invalid() {
        let result = AgentUuid::parse("not-a-uuid");
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUuid(_)));
    }

    proptest! {
        #[test]
        fn prop_valid_references_roundtrip(s in "[A-Za-z0-9._:-]{1,64}") {
            let id = InstanceId::parse(&s).unwrap();
            let json = serde_json::to_string(&id).unwrap();
            let parsed: InstanceId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id.as_str(), s.as_str());
            prop_assert_eq!(parsed, id);
        }
    }
}
