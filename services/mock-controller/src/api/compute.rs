//! Tenant-scoped compute endpoints.
//!
//! Instance lifecycle lives under `/{tenant}/instances`; the v2.1 surface
//! adds bulk actions, usage history, quotas and the tenant's event log.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use cpat_harness::api::{CreateServerRequest, Server, Servers, ServersAction};
use cpat_id::{InstanceId, TenantId};
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::auth::tenant_access;
use crate::api::error::ApiError;
use crate::pki::PeerIdentity;
use crate::state::AppState;

pub const OS_START: &str = "os-start";
pub const OS_STOP: &str = "os-stop";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{tenant}/instances", post(create_servers))
        .route("/{tenant}/instances/detail", get(list_servers))
        .route(
            "/{tenant}/instances/{instance}",
            get(show_server).delete(delete_server),
        )
        .route("/{tenant}/instances/{instance}/action", post(server_action))
        .route("/v2.1/{tenant}/servers/action", post(servers_action))
        .route("/v2.1/{tenant}/resources", get(tenant_resources))
        .route("/v2.1/{tenant}/quotas", get(tenant_quotas))
        .route("/v2.1/{tenant}/events", get(tenant_events))
}

// =============================================================================
// Instances
// =============================================================================

async fn create_servers(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(tenant): Path<TenantId>,
    Json(request): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;

    let server = request.server;
    if server.max_count == 0 || server.min_count > server.max_count {
        return Err(ApiError::bad_request(
            "invalid_count",
            format!(
                "min_count {} and max_count {} do not form a range",
                server.min_count, server.max_count
            ),
        ));
    }

    let created = state.store().create_instances(
        &tenant,
        &server.workload_id,
        server.max_count,
        server.trace_label,
    )?;
    for instance in &created {
        if let Err(e) = state.hub().place(instance) {
            warn!(instance_id = %instance.id, error = %e, "Instance left unscheduled");
        }
    }
    info!(tenant_id = %tenant, count = created.len(), "Created instances");

    let ids: Vec<InstanceId> = created.into_iter().map(|i| i.id).collect();
    let listing = state.store().servers(&tenant)?;
    let servers: Vec<_> = listing
        .servers
        .into_iter()
        .filter(|s| ids.contains(&s.id))
        .collect();

    Ok((
        StatusCode::ACCEPTED,
        Json(Servers {
            total_servers: servers.len(),
            servers,
        }),
    ))
}

async fn list_servers(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(tenant): Path<TenantId>,
) -> Result<Json<Servers>, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;
    Ok(Json(state.store().servers(&tenant)?))
}

async fn show_server(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path((tenant, instance)): Path<(TenantId, InstanceId)>,
) -> Result<Json<Server>, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;
    let server = state.store().server(&tenant, &instance)?;
    Ok(Json(Server { server }))
}

async fn delete_server(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path((tenant, instance)): Path<(TenantId, InstanceId)>,
) -> Result<StatusCode, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;
    let node = state.store().delete_instance(&tenant, &instance)?;
    if let Err(e) = state.hub().delete(&node, &instance) {
        warn!(instance_id = %instance, error = %e, "Delete not delivered");
    }
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Actions
// =============================================================================

/// Body is the bare action name.
async fn server_action(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path((tenant, instance)): Path<(TenantId, InstanceId)>,
    body: String,
) -> Result<StatusCode, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;
    let action = body.trim().trim_matches('"');
    apply_action(&state, &tenant, action, &[instance])
}

async fn servers_action(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(tenant): Path<TenantId>,
    Json(request): Json<ServersAction>,
) -> Result<StatusCode, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;

    // An empty list addresses every instance of the tenant.
    let targets = if request.server_ids.is_empty() {
        state
            .store()
            .servers(&tenant)?
            .servers
            .into_iter()
            .map(|s| s.id)
            .collect()
    } else {
        request.server_ids
    };
    apply_action(&state, &tenant, &request.action, &targets)
}

/// Validate every target before sending anything, so a refused request has
/// no side effects.
fn apply_action(
    state: &AppState,
    tenant: &TenantId,
    action: &str,
    targets: &[InstanceId],
) -> Result<StatusCode, ApiError> {
    if action != OS_START && action != OS_STOP {
        return Err(ApiError::service_unavailable(
            "unsupported_action",
            format!("action {:?} is not supported", action),
        ));
    }

    let mut placed = Vec::with_capacity(targets.len());
    for instance in targets {
        placed.push((state.store().assigned_node(tenant, instance)?, instance.clone()));
    }

    if action == OS_STOP {
        state.hub().stop_all(&placed)?;
    } else {
        // Only exited instances restart; the state changes once the
        // restarts are on their way.
        placed.retain(|(_, instance)| state.store().is_exited(instance));
        state.hub().restart_all(&placed)?;
        for (_, instance) in &placed {
            state.store().begin_restart(instance);
        }
    }
    info!(tenant_id = %tenant, action, count = targets.len(), "Applied action");
    Ok(StatusCode::ACCEPTED)
}

// =============================================================================
// Tenant resources
// =============================================================================

#[derive(Debug, Deserialize)]
struct UsageRange {
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

async fn tenant_resources(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(tenant): Path<TenantId>,
    Query(range): Query<UsageRange>,
) -> Result<impl IntoResponse, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;
    if range.start_date > range.end_date {
        return Err(ApiError::bad_request(
            "invalid_range",
            "start_date is after end_date",
        ));
    }
    Ok(Json(
        state
            .store()
            .usage(&tenant, range.start_date, range.end_date)?,
    ))
}

async fn tenant_quotas(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(tenant): Path<TenantId>,
) -> Result<impl IntoResponse, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;
    Ok(Json(state.store().quotas(&tenant)?))
}

async fn tenant_events(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(tenant): Path<TenantId>,
) -> Result<impl IntoResponse, ApiError> {
    tenant_access(&identity, state.store(), &tenant)?;
    Ok(Json(state.store().events(Some(&tenant))))
}
