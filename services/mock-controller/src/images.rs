//! In-process stand-in for the operator's command-line client.
//!
//! Understands the `image` subcommands the harness issues and renders the
//! three output templates it asks for.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use cpat_harness::admin::{
    AdminCommand, AdminError, Image, Invocation, COUNT_TEMPLATE, IMAGE_MAP_TEMPLATE, JSON_TEMPLATE,
};
use tracing::debug;

use crate::store::Store;

/// Exit status for a request the client understood but the service refused.
const EXIT_REFUSED: i32 = 1;
/// Exit status for arguments the client does not understand.
const EXIT_USAGE: i32 = 2;

pub struct MockAdminCli {
    store: Arc<Store>,
}

impl MockAdminCli {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

/// `-flag value` pairs after the subcommand.
struct Flags(BTreeMap<String, String>);

impl Flags {
    fn parse(args: &[String]) -> Result<Self, AdminError> {
        let mut flags = BTreeMap::new();
        let mut rest = args.iter();
        while let Some(flag) = rest.next() {
            let Some(name) = flag.strip_prefix('-') else {
                return Err(usage(format!("unexpected argument {:?}", flag)));
            };
            let value = rest
                .next()
                .ok_or_else(|| usage(format!("flag -{} needs a value", name)))?;
            flags.insert(name.to_string(), value.clone());
        }
        Ok(Self(flags))
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn require(&self, name: &str) -> Result<&str, AdminError> {
        self.get(name)
            .ok_or_else(|| usage(format!("missing required flag -{}", name)))
    }
}

fn usage(message: String) -> AdminError {
    AdminError::Failed {
        status: EXIT_USAGE,
        stderr: message,
    }
}

fn refused(message: String) -> AdminError {
    AdminError::Failed {
        status: EXIT_REFUSED,
        stderr: message,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, AdminError> {
    serde_json::to_vec(value).map_err(|source| AdminError::Decode {
        what: "image",
        source,
    })
}

fn render_one(image: &Image, template: Option<&str>) -> Result<Vec<u8>, AdminError> {
    match template {
        Some(JSON_TEMPLATE) => to_json(image),
        None => Ok(format!("{}\t{}\n", image.id, image.name).into_bytes()),
        Some(other) => Err(usage(format!("unsupported template {:?}", other))),
    }
}

fn render_list(images: &[Image], template: Option<&str>) -> Result<Vec<u8>, AdminError> {
    match template {
        Some(COUNT_TEMPLATE) => Ok(images.len().to_string().into_bytes()),
        Some(IMAGE_MAP_TEMPLATE) => {
            let by_id: BTreeMap<&str, &Image> =
                images.iter().map(|i| (i.id.as_str(), i)).collect();
            to_json(&by_id)
        }
        Some(JSON_TEMPLATE) => to_json(&images),
        None => Ok(images
            .iter()
            .map(|i| format!("{}\t{}\n", i.id, i.name))
            .collect::<String>()
            .into_bytes()),
        Some(other) => Err(usage(format!("unsupported template {:?}", other))),
    }
}

impl MockAdminCli {
    async fn add(&self, invocation: &Invocation, flags: &Flags) -> Result<Vec<u8>, AdminError> {
        let file = flags.require("file")?;
        let size_bytes = tokio::fs::metadata(file).await?.len();

        let visibility = flags.get("visibility").unwrap_or("private");
        if visibility == "public" && !invocation.as_admin {
            return Err(refused("only the admin may add public images".to_string()));
        }

        let image = Image {
            id: flags
                .get("id")
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: flags.get("name").unwrap_or_default().to_string(),
            visibility: visibility.to_string(),
            size_bytes,
            status: "active".to_string(),
            created_date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let image = self
            .store
            .add_image(image)
            .map_err(|e| refused(e.to_string()))?;
        render_one(&image, flags.get("f"))
    }
}

#[async_trait]
impl AdminCommand for MockAdminCli {
    async fn run(&self, invocation: &Invocation, args: &[String]) -> Result<Vec<u8>, AdminError> {
        debug!(args = ?args, admin = invocation.as_admin, "Mock admin command");

        let (Some(group), Some(action)) = (args.first(), args.get(1)) else {
            return Err(usage("expected a subcommand".to_string()));
        };
        if group != "image" {
            return Err(usage(format!("unknown command {:?}", group)));
        }
        let flags = Flags::parse(&args[2..])?;

        match action.as_str() {
            "add" => self.add(invocation, &flags).await,
            "show" => {
                let image = self
                    .store
                    .image(flags.require("image")?)
                    .map_err(|e| refused(e.to_string()))?;
                render_one(&image, flags.get("f"))
            }
            "list" => render_list(&self.store.images(), flags.get("f")),
            "delete" => {
                self.store
                    .delete_image(flags.require("image")?)
                    .map_err(|e| refused(e.to_string()))?;
                Ok(Vec::new())
            }
            other => Err(usage(format!("unknown image command {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpat_harness::admin::{self, ImageOptions};

    fn cli() -> (MockAdminCli, Invocation) {
        let store = Arc::new(Store::seeded("demo"));
        let tenant = store.tenant_for_user("demo").unwrap();
        (
            MockAdminCli::new(store),
            Invocation {
                tenant,
                as_admin: true,
            },
        )
    }

    #[tokio::test]
    async fn test_image_lifecycle_through_helpers() {
        let (cli, who) = cli();
        assert_eq!(admin::image_count(&cli, &who).await.unwrap(), 0);

        let options = ImageOptions {
            id: Some("img-1".to_string()),
            name: Some("base".to_string()),
            visibility: None,
        };
        let added = admin::add_generated_image(&cli, &who, 1, &options)
            .await
            .unwrap();
        assert_eq!(added.id, "img-1");
        assert_eq!(added.size_bytes, 1024 * 1024);
        assert_eq!(added.visibility, "private");

        assert_eq!(admin::get_image(&cli, &who, "img-1").await.unwrap(), added);
        let listed = admin::list_images(&cli, &who).await.unwrap();
        assert_eq!(listed.get("img-1"), Some(&added));
        assert_eq!(admin::image_count(&cli, &who).await.unwrap(), 1);

        admin::delete_image(&cli, &who, "img-1").await.unwrap();
        assert_eq!(admin::image_count(&cli, &who).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_image_exits_nonzero() {
        let (cli, who) = cli();
        let err = admin::get_image(&cli, &who, "nope").await.unwrap_err();
        assert!(matches!(
            err,
            AdminError::Failed {
                status: EXIT_REFUSED,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_public_image_needs_admin() {
        let (cli, mut who) = cli();
        who.as_admin = false;
        let options = ImageOptions {
            id: None,
            name: Some("shared".to_string()),
            visibility: Some("public".to_string()),
        };
        assert!(admin::add_generated_image(&cli, &who, 1, &options)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_template_is_a_usage_error() {
        let (cli, who) = cli();
        let argv: Vec<String> = ["image", "list", "-f", "{{.Name}}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(
            cli.run(&who, &argv).await,
            Err(AdminError::Failed {
                status: EXIT_USAGE,
                ..
            })
        ));
    }
}
