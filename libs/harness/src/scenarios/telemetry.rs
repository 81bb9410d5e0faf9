//! Trace and event log scenarios.

use futures_util::future::BoxFuture;
use reqwest::{Method, StatusCode};

use cpat_id::TraceLabel;
use cpat_proto::Role;

use crate::api::{Events, TraceData, TracesSummary};
use crate::compare::assert_snapshot;
use crate::context::TestContext;
use crate::driver;
use crate::ensure;
use crate::error::{HarnessError, Result};
use crate::http::decode;

fn fresh_label() -> Result<TraceLabel> {
    format!("cpat-trace-{}", uuid::Uuid::new_v4().simple())
        .parse()
        .map_err(|e| HarnessError::precondition(format!("trace label: {}", e)))
}

/// Launch traced instances on an agent, report their traces, and wait until
/// the datastore shows the label.
async fn traced_launch(ctx: &TestContext, count: u32) -> Result<TraceLabel> {
    let fixture = ctx.fixture().await?;
    let label = fresh_label()?;

    driver::with_agent(ctx, Role::Agent, |agent| {
        let label = label.clone();
        async move {
            driver::create_on_agent(ctx, &agent, &fixture, count, Some(label.clone())).await?;
            let report = agent.report_traces(&label).await?;
            ensure!(
                report.frames.len() == count as usize,
                "agent traced {} of {} instances",
                report.frames.len(),
                count
            );

            let datastore = ctx.datastore()?;
            driver::poll_until(ctx, "trace label recorded", move || {
                let label = label.clone();
                async move {
                    let summary = datastore.batch_frame_summary().await?;
                    Ok(summary.summaries.iter().any(|s| s.label == label))
                }
            })
            .await
        }
    })
    .await?;

    Ok(label)
}

pub fn list_traces(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let label = traced_launch(ctx, 2).await?;

        let body = ctx
            .admin()
            .execute(Method::GET, &ctx.v21_url("/traces"), None, StatusCode::OK)
            .await?;
        let actual: TracesSummary = decode("traces summary", &body)?;
        let ours = actual.summaries.iter().find(|s| s.label == label);
        ensure!(
            ours.is_some_and(|s| s.instances == 2),
            "trace {} should summarize 2 instances, got {:?}",
            label,
            ours
        );

        let expected = ctx.datastore()?.batch_frame_summary().await?;
        assert_snapshot(&expected, &actual)
    })
}

pub fn trace_data(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let label = traced_launch(ctx, 3).await?;

        let body = ctx
            .admin()
            .execute(
                Method::GET,
                &ctx.v21_url(&format!("/traces/{}", label)),
                None,
                StatusCode::OK,
            )
            .await?;
        let actual: TraceData = decode("trace data", &body)?;
        ensure!(
            actual.summary.num_instances == 3,
            "trace {} covers {} instances, expected 3",
            label,
            actual.summary.num_instances
        );

        let expected = ctx.datastore()?.batch_frame_statistics(&label).await?;
        assert_snapshot(&expected, &actual)
    })
}

pub fn list_events(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let body = ctx
            .admin()
            .execute(Method::GET, &ctx.v21_url("/events"), None, StatusCode::OK)
            .await?;
        let actual: Events = decode("events", &body)?;
        let expected = ctx.datastore()?.event_log(None).await?;
        assert_snapshot(&expected, &actual)
    })
}

pub fn clear_events(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        ctx.admin()
            .execute(Method::DELETE, &ctx.v21_url("/events"), None, StatusCode::ACCEPTED)
            .await?;

        let logged = ctx.datastore()?.event_log(None).await?;
        ensure!(
            logged.events.is_empty(),
            "{} events left in the datastore after clearing",
            logged.events.len()
        );

        let body = ctx
            .admin()
            .execute(Method::GET, &ctx.v21_url("/events"), None, StatusCode::OK)
            .await?;
        let actual: Events = decode("events", &body)?;
        ensure!(
            actual.events.is_empty(),
            "{} events still listed after clearing",
            actual.events.len()
        );
        Ok(())
    })
}
