//! HTTP API handlers and routing.

mod auth;
mod cluster;
mod compute;
pub mod error;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the compute API router with all routes and middleware.
///
/// Requests must carry a [`crate::pki::PeerIdentity`] extension; the TLS
/// serving layer inserts it from the client certificate.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(compute::routes())
        .merge(cluster::routes())
        .layer(middleware::from_fn(auth::require_identity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use cpat_harness::api::{CreateServerRequest, Servers, ServersAction};
    use cpat_id::TenantId;
    use cpat_proto::{InstanceStat, InstanceState, NodeStatus, StatsPayload};
    use tower::ServiceExt;

    use super::*;
    use crate::control::ControlHub;
    use crate::pki::PeerIdentity;
    use crate::store::Store;

    struct Fixture {
        router: Router,
        store: Arc<Store>,
        tenant: TenantId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::seeded("demo"));
        let hub = Arc::new(ControlHub::new(Arc::clone(&store)));
        let tenant = store.tenant_for_user("demo").unwrap();
        Fixture {
            router: create_router(AppState::new(Arc::clone(&store), hub)),
            store,
            tenant,
        }
    }

    fn request(
        method: Method,
        uri: &str,
        identity: Option<PeerIdentity>,
        body: Option<Vec<u8>>,
    ) -> Request<Body> {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();
        if let Some(identity) = identity {
            request.extensions_mut().insert(identity);
        }
        request
    }

    fn user() -> Option<PeerIdentity> {
        Some(PeerIdentity::User("demo".to_string()))
    }

    async fn create(f: &Fixture, count: u32) -> Servers {
        let workload = f.store.workloads(&f.tenant).unwrap()[0].id.clone();
        let body = serde_json::to_vec(&CreateServerRequest::new("vm", workload, count)).unwrap();
        let response = f
            .router
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/{}/instances", f.tenant),
                user(),
                Some(body),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let f = fixture();
        let response = f
            .router
            .oneshot(request(
                Method::GET,
                &format!("/{}/instances/detail", f.tenant),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
    }

    #[tokio::test]
    async fn test_create_reports_requested_count() {
        let f = fixture();
        let servers = create(&f, 3).await;
        assert_eq!(servers.total_servers, 3);
        assert_eq!(servers.servers.len(), 3);
    }

    #[tokio::test]
    async fn test_other_users_are_forbidden() {
        let f = fixture();
        let response = f
            .router
            .oneshot(request(
                Method::GET,
                &format!("/{}/instances/detail", f.tenant),
                Some(PeerIdentity::User("mallory".to_string())),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_cluster_routes_are_admin_only() {
        let f = fixture();
        let as_user = f
            .router
            .clone()
            .oneshot(request(Method::GET, "/v2.1/nodes", user(), None))
            .await
            .unwrap();
        assert_eq!(as_user.status(), StatusCode::FORBIDDEN);

        let as_admin = f
            .router
            .oneshot(request(
                Method::GET,
                "/v2.1/nodes",
                Some(PeerIdentity::Admin),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(as_admin.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unscheduled_instance_refuses_delete_and_stop() {
        let f = fixture();
        let id = create(&f, 1).await.servers[0].id.clone();

        let delete = f
            .router
            .clone()
            .oneshot(request(
                Method::DELETE,
                &format!("/{}/instances/{}", f.tenant, id),
                user(),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(delete.status(), StatusCode::FORBIDDEN);

        let stop = f
            .router
            .oneshot(request(
                Method::POST,
                &format!("/{}/instances/{}/action", f.tenant, id),
                user(),
                Some(b"os-stop".to_vec()),
            ))
            .await
            .unwrap();
        assert_eq!(stop.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_action_is_unavailable() {
        let f = fixture();
        let ids = vec![create(&f, 1).await.servers[0].id.clone()];
        let body = serde_json::to_vec(&ServersAction {
            action: "os-no-such-action".to_string(),
            server_ids: ids,
        })
        .unwrap();
        let response = f
            .router
            .oneshot(request(
                Method::POST,
                &format!("/v2.1/{}/servers/action", f.tenant),
                user(),
                Some(body),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_beyond_quota_is_forbidden() {
        let f = fixture();
        let workload = f.store.workloads(&f.tenant).unwrap()[0].id.clone();

        for count in [1001, u32::MAX] {
            let body =
                serde_json::to_vec(&CreateServerRequest::new("vm", workload.clone(), count))
                    .unwrap();
            let response = f
                .router
                .clone()
                .oneshot(request(
                    Method::POST,
                    &format!("/{}/instances", f.tenant),
                    user(),
                    Some(body),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "max_count {count}");
        }
        assert_eq!(f.store.servers(&f.tenant).unwrap().total_servers, 0);
    }

    #[tokio::test]
    async fn test_failed_restart_leaves_instance_exited() {
        let f = fixture();
        let id = create(&f, 1).await.servers[0].id.clone();
        f.store.apply_stats(&StatsPayload {
            node_uuid: "node-1".parse().unwrap(),
            hostname: "gone".to_string(),
            status: NodeStatus::Ready,
            mem_total_mb: 1024,
            mem_available_mb: 1024,
            disk_total_mb: 1024,
            disk_available_mb: 1024,
            load: 0,
            online_cpus: 1,
            instances: vec![InstanceStat {
                instance_uuid: id.clone(),
                state: InstanceState::Running,
                ssh_ip: String::new(),
                ssh_port: 0,
                vcpu_usage: 0,
                memory_usage_mb: 0,
                disk_usage_mb: 0,
            }],
        });
        f.store.instance_stopped(&id);

        // node-1 has no live link, so the restart cannot be sent.
        for _ in 0..2 {
            let response = f
                .router
                .clone()
                .oneshot(request(
                    Method::POST,
                    &format!("/{}/instances/{}/action", f.tenant, id),
                    user(),
                    Some(b"os-start".to_vec()),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(
                f.store.server(&f.tenant, &id).unwrap().status,
                InstanceState::Exited
            );
        }
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_found() {
        let f = fixture();
        let response = f
            .router
            .oneshot(request(
                Method::GET,
                &format!("/{}/instances/no-such-instance", f.tenant),
                user(),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clear_events_empties_log() {
        let f = fixture();
        create(&f, 1).await;
        assert!(!f.store.events(None).events.is_empty());

        let response = f
            .router
            .oneshot(request(
                Method::DELETE,
                "/v2.1/events",
                Some(PeerIdentity::Admin),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(f.store.events(None).events.is_empty());
    }
}
