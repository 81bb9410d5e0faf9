//! Image management through the administrative client.

use futures_util::future::BoxFuture;
use tracing::info;

use crate::admin::{self, ImageOptions};
use crate::context::TestContext;
use crate::ensure;
use crate::error::Result;

pub fn image_lifecycle(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let cli = ctx.admin_command()?;
        let who = ctx.invocation(&fixture.tenant, true);

        let before = admin::image_count(cli, &who).await?;

        let options = ImageOptions {
            id: None,
            name: Some(format!("cpat-image-{}", uuid::Uuid::new_v4().simple())),
            visibility: Some("public".to_string()),
        };
        let added = admin::add_generated_image(cli, &who, 1, &options).await?;
        info!(image_id = %added.id, "Added image");
        ensure!(
            Some(&added.name) == options.name.as_ref(),
            "image name {:?} does not match requested {:?}",
            added.name,
            options.name
        );

        let shown = admin::get_image(cli, &who, &added.id).await?;
        ensure!(shown == added, "image {} changed between add and show", added.id);

        let listed = admin::list_images(cli, &who).await?;
        ensure!(
            listed.get(&added.id) == Some(&added),
            "image {} missing from listing",
            added.id
        );

        let during = admin::image_count(cli, &who).await?;
        ensure!(
            during == before + 1,
            "image count went from {} to {} after one add",
            before,
            during
        );

        admin::delete_image(cli, &who, &added.id).await?;
        let after = admin::image_count(cli, &who).await?;
        ensure!(
            after == before,
            "image count is {} after delete, expected {}",
            after,
            before
        );
        Ok(())
    })
}
