use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::{
    manifest::{PluginMeta, Str},
    plugin::PluginContext,
    resmap::ResourceMap,
};

use super::{
    Generator,
    common::{InlineGenerator, MapKind, generate_map},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapGeneratorPlusConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(flatten)]
    pub generator: InlineGenerator,
    /// Appended to the literal sources.
    #[serde(default)]
    pub data: IndexMap<Str, Str>,
}

#[derive(Debug)]
pub struct ConfigMapGeneratorPlus {
    root: PathBuf,
    generator: InlineGenerator,
}

impl ConfigMapGeneratorPlus {
    pub fn new(config: ConfigMapGeneratorPlusConfig, ctx: &PluginContext) -> Self {
        let mut generator = config.generator;
        generator.default_identity(&config.meta.metadata);
        generator.extend_literals(&config.data);
        Self { root: ctx.root.clone(), generator }
    }
}

#[async_trait::async_trait]
impl Generator for ConfigMapGeneratorPlus {
    #[tracing::instrument(skip_all, name = "config_map_generator_plus")]
    async fn generate(&mut self) -> anyhow::Result<ResourceMap> {
        let config_map = generate_map(&self.root, &self.generator, MapKind::ConfigMap).await?;
        Ok(ResourceMap::from_iter([config_map]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_name_wins_over_metadata() -> anyhow::Result<()> {
        let config: ConfigMapGeneratorPlusConfig = crate::yaml::from_str(
            r#"
apiVersion: qlik.com/v1
kind: ConfigMapGeneratorPlus
metadata:
  name: ignored
name: settings
data:
  mode: fast
"#,
        )?;

        let ctx = PluginContext::new(".");
        let resources = ConfigMapGeneratorPlus::new(config, &ctx).generate().await?;
        let config_map = resources.iter().next().expect("one config map");
        assert!(config_map.name().starts_with("settings-"), "{}", config_map.name());
        assert_eq!(config_map.root()["data"]["mode"], "fast");
        Ok(())
    }

    #[tokio::test]
    async fn singular_env_file_is_read() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::write(root.path().join("app.env"), "LOG_LEVEL=debug\n")?;

        let config: ConfigMapGeneratorPlusConfig = crate::yaml::from_str(
            r#"
apiVersion: qlik.com/v1
kind: ConfigMapGeneratorPlus
metadata:
  name: app
env: app.env
options:
  disableNameSuffixHash: true
"#,
        )?;

        let resources = ConfigMapGeneratorPlus::new(config, &PluginContext::new(root.path())).generate().await?;
        let config_map = resources.iter().next().expect("one config map");
        assert_eq!(config_map.name(), "app");
        assert_eq!(config_map.root()["data"], serde_json::json!({"LOG_LEVEL": "debug"}));
        Ok(())
    }
}
