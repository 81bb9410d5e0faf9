//! Tenant-scoped reads: usage, quotas, events.

use chrono::{Duration, SubsecRound, Utc};
use futures_util::future::BoxFuture;
use reqwest::{Method, StatusCode};

use cpat_proto::Role;

use crate::api::{Events, TenantResources, UsageHistory};
use crate::compare::assert_snapshot;
use crate::context::TestContext;
use crate::driver;
use crate::error::Result;
use crate::http::decode;

pub fn list_tenant_resources(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;

        // A status report that includes our instance produces a usage sample.
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            driver::create_on_agent(ctx, &agent, &fixture, 1, None).await?;

            let end = Utc::now().trunc_subsecs(0) + Duration::seconds(1);
            let start = end - Duration::minutes(15);
            let query = format!(
                "/resources?start_date={}&end_date={}",
                start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            );

            let body = ctx
                .user()
                .execute(
                    Method::GET,
                    &ctx.v21_tenant_url(&fixture.tenant, &query),
                    None,
                    StatusCode::OK,
                )
                .await?;
            let actual: UsageHistory = decode("usage history", &body)?;
            crate::ensure!(
                !actual.usages.is_empty(),
                "no usage samples between {} and {}",
                start,
                end
            );

            let expected = ctx
                .datastore()?
                .tenant_usage(&fixture.tenant, start, end)
                .await?;
            assert_snapshot(&expected, &actual)
        })
        .await
    })
}

pub fn list_tenant_quotas(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let body = ctx
            .user()
            .execute(
                Method::GET,
                &ctx.v21_tenant_url(&fixture.tenant, "/quotas"),
                None,
                StatusCode::OK,
            )
            .await?;
        let actual: TenantResources = decode("tenant resources", &body)?;
        let expected = ctx.datastore()?.quotas(&fixture.tenant).await?;
        assert_snapshot(&expected, &actual)
    })
}

pub fn list_events_tenant(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        // Make sure there is at least one event to list.
        driver::create_servers(ctx, &fixture, 1, None).await?;

        let body = ctx
            .user()
            .execute(
                Method::GET,
                &ctx.v21_tenant_url(&fixture.tenant, "/events"),
                None,
                StatusCode::OK,
            )
            .await?;
        let actual: Events = decode("events", &body)?;
        crate::ensure!(!actual.events.is_empty(), "tenant event log is empty");

        let expected = ctx.datastore()?.event_log(Some(&fixture.tenant)).await?;
        assert_snapshot(&expected, &actual)
    })
}
