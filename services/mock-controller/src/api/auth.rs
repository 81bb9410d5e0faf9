//! Caller identity and access rules.
//!
//! The serving layer attaches a [`PeerIdentity`] to every request that
//! presented a client certificate signed by the test CA. Requests without
//! one are turned away before routing. Tenant routes admit the admin and the
//! tenant's own user; cluster routes admit only the admin.

use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use cpat_id::TenantId;

use crate::api::error::ApiError;
use crate::pki::PeerIdentity;
use crate::store::Store;

pub async fn require_identity(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.extensions().get::<PeerIdentity>().is_none() {
        return Err(ApiError::unauthorized(
            "client_certificate_required",
            "a client certificate signed by the cluster CA is required",
        ));
    }
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for PeerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<PeerIdentity>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("client_certificate_required", "no identity"))
    }
}

/// Admit the admin, or the user owning `tenant`.
pub fn tenant_access(
    identity: &PeerIdentity,
    store: &Store,
    tenant: &TenantId,
) -> Result<(), ApiError> {
    match identity {
        PeerIdentity::Admin => {
            store.workloads(tenant)?;
            Ok(())
        }
        PeerIdentity::User(user) if store.user_owns(user, tenant) => Ok(()),
        PeerIdentity::User(user) => Err(ApiError::forbidden(
            "tenant_forbidden",
            format!("{} may not access tenant {}", user, tenant),
        )),
        PeerIdentity::Agent => Err(ApiError::forbidden(
            "agent_certificate",
            "agent certificates may not use the compute API",
        )),
    }
}

pub fn admin_only(identity: &PeerIdentity) -> Result<(), ApiError> {
    match identity {
        PeerIdentity::Admin => Ok(()),
        _ => Err(ApiError::forbidden(
            "admin_required",
            "cluster resources require the admin certificate",
        )),
    }
}
