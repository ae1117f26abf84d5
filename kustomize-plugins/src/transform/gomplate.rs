use std::path::PathBuf;

use anyhow::Context as _;
use serde::Deserialize;

use crate::{
    exec::gomplate::DataSource,
    manifest::PluginMeta,
    plugin::PluginContext,
    resmap::ResourceMap,
    resource::Resource,
};

use super::Transformer;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GomplateConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub data_source: DataSource,
    /// Defaults to `gomplate` on `PATH`.
    #[serde(default)]
    pub gomplate_bin: Option<PathBuf>,
}

/// Renders every resource as a gomplate template.
#[derive(Debug)]
pub struct Gomplate {
    root: PathBuf,
    data_source: DataSource,
    bin: Option<PathBuf>,
}

impl Gomplate {
    pub fn new(config: GomplateConfig, ctx: &PluginContext) -> Self {
        Self { root: ctx.root.clone(), data_source: config.data_source, bin: config.gomplate_bin }
    }
}

#[async_trait::async_trait]
impl Transformer for Gomplate {
    #[tracing::instrument(skip_all, name = "gomplate")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let gomplate = self.data_source.resolve(&self.root)?.with_bin(self.bin.as_deref());

        let mut rendered = Vec::with_capacity(resources.len());
        for resource in resources.iter() {
            let id = resource.id();
            let template = crate::yaml::to_string(resource)?;
            let output = gomplate
                .render(&template)
                .await
                .with_context(|| format!("rendering `{id}` with gomplate"))?;
            let resource = crate::yaml::from_str::<Resource>(&output)
                .with_context(|| format!("parsing rendered `{id}`"))?;
            rendered.push(resource);
        }

        *resources = ResourceMap::try_from_resources(rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn renders_each_resource_and_rebuilds_ids() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::write(root.path().join("key"), "0123456789abcdef\n")?;
        let bin = crate::exec::fake_bin(root.path(), "gomplate", crate::exec::gomplate::FAKE_GOMPLATE)?;

        let config: GomplateConfig = crate::yaml::from_str(&format!(
            r#"
apiVersion: qlik.com/v1
kind: Gomplate
metadata:
  name: render
dataSource:
  ejson:
    privateKeyPath: key
    filePath: secrets.ejson
gomplateBin: {}
"#,
            bin.display()
        ))?;

        let mut resources = ResourceMap::from_yaml_stream(
            r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: ((.data.region))-settings
data:
  region: ((.data.region))
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: static
data:
  a: b
"#,
        )?;
        Gomplate::new(config, &PluginContext::new(root.path())).transform(&mut resources).await?;

        let settings = resources.find("ConfigMap", "eu-west-1-settings").expect("renamed by rendering");
        assert_eq!(settings.root()["data"]["region"], "eu-west-1");
        assert!(resources.get(settings.id()).is_some());
        assert!(resources.find("ConfigMap", "((.data.region))-settings").is_none());
        assert_eq!(
            resources.iter().map(|r| r.name().as_str()).collect::<Vec<_>>(),
            ["eu-west-1-settings", "static"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn unusable_data_source_fails_before_rendering() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let config: GomplateConfig = crate::yaml::from_str(
            r#"
apiVersion: qlik.com/v1
kind: Gomplate
metadata:
  name: render
dataSource:
  vault:
    addressPath: missing/addr
    tokenPath: missing/token
    secretPath: vault:///secret
"#,
        )?;

        let mut resources = ResourceMap::from_yaml_stream(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\ndata:\n  a: ((.data.a))\n",
        )?;
        let before = resources.clone();
        let err = Gomplate::new(config, &PluginContext::new(root.path()))
            .transform(&mut resources)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no usable data source"), "{err}");
        assert_eq!(resources, before);
        Ok(())
    }
}
