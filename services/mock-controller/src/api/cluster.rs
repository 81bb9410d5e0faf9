//! Cluster-wide endpoints under `/v2.1`. Admin only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use cpat_harness::api::{
    ClusterStatus, CnciDetails, Cncis, Events, NodeServers, Nodes, TraceData, TracesSummary,
};
use cpat_id::{InstanceId, NodeId, TraceLabel};

use crate::api::auth::admin_only;
use crate::api::error::ApiError;
use crate::pki::PeerIdentity;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2.1/events", get(list_events).delete(clear_events))
        .route("/v2.1/nodes", get(list_nodes))
        .route("/v2.1/nodes/summary", get(node_summary))
        .route("/v2.1/nodes/{node}/servers/detail", get(node_servers))
        .route("/v2.1/cncis", get(list_cncis))
        .route("/v2.1/cncis/{cnci}/detail", get(cnci_details))
        .route("/v2.1/traces", get(list_traces))
        .route("/v2.1/traces/{label}", get(trace_data))
}

async fn list_events(
    State(state): State<AppState>,
    identity: PeerIdentity,
) -> Result<Json<Events>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().events(None)))
}

async fn clear_events(
    State(state): State<AppState>,
    identity: PeerIdentity,
) -> Result<StatusCode, ApiError> {
    admin_only(&identity)?;
    state.store().clear_events();
    Ok(StatusCode::ACCEPTED)
}

async fn list_nodes(
    State(state): State<AppState>,
    identity: PeerIdentity,
) -> Result<Json<Nodes>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().nodes()))
}

async fn node_summary(
    State(state): State<AppState>,
    identity: PeerIdentity,
) -> Result<Json<ClusterStatus>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().node_summary()))
}

async fn node_servers(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(node): Path<NodeId>,
) -> Result<Json<NodeServers>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().node_servers(&node)?))
}

async fn list_cncis(
    State(state): State<AppState>,
    identity: PeerIdentity,
) -> Result<Json<Cncis>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().cncis()))
}

async fn cnci_details(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(cnci): Path<InstanceId>,
) -> Result<Json<CnciDetails>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().cnci(&cnci)?))
}

async fn list_traces(
    State(state): State<AppState>,
    identity: PeerIdentity,
) -> Result<Json<TracesSummary>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().traces()))
}

async fn trace_data(
    State(state): State<AppState>,
    identity: PeerIdentity,
    Path(label): Path<TraceLabel>,
) -> Result<Json<TraceData>, ApiError> {
    admin_only(&identity)?;
    Ok(Json(state.store().trace_data(&label)?))
}
