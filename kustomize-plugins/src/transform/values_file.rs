use std::path::PathBuf;

use anyhow::{Context as _, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    PathExt,
    exec::gomplate::DataSource,
    manifest::PluginMeta,
    merge::merge_values,
    plugin::PluginContext,
    resmap::ResourceMap,
    resource::Object,
};

use super::Transformer;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesFileConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub data_source: DataSource,
    pub values_file: PathBuf,
    /// Defaults to `gomplate` on `PATH`.
    #[serde(default)]
    pub gomplate_bin: Option<PathBuf>,
}

/// Renders a values template once and merges the result under `values` of every resource.
/// Values already present in a resource win.
#[derive(Debug)]
pub struct ValuesFile {
    root: PathBuf,
    data_source: DataSource,
    values_file: PathBuf,
    bin: Option<PathBuf>,
}

impl ValuesFile {
    pub fn new(config: ValuesFileConfig, ctx: &PluginContext) -> Self {
        Self {
            root: ctx.root.clone(),
            data_source: config.data_source,
            values_file: ctx.root.join(config.values_file),
            bin: config.gomplate_bin,
        }
    }

    async fn render_values(&self) -> anyhow::Result<Value> {
        let gomplate = self.data_source.resolve(&self.root)?.with_bin(self.bin.as_deref());
        let template = match std::fs::read_to_string(&self.values_file) {
            Ok(template) => template,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                bail!("values file {} not found", self.values_file.pretty())
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.values_file.pretty()));
            }
        };

        let output = gomplate.render(&template).await?;
        match crate::yaml::from_str::<Value>(&output)? {
            values @ Value::Object(_) => Ok(values),
            Value::Null => Ok(Value::Object(Object::new())),
            _ => bail!("rendered values file {} is not a mapping", self.values_file.pretty()),
        }
    }
}

#[async_trait::async_trait]
impl Transformer for ValuesFile {
    #[tracing::instrument(skip_all, name = "values_file")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let values = self.render_values().await?;
        tracing::debug!(values_file = %self.values_file.pretty(), "rendered values file");

        for resource in resources.iter_mut() {
            let mut prefixed = Object::new();
            prefixed.insert("values".into(), values.clone());

            let mut root = Value::Object(std::mem::take(resource.root_mut()));
            merge_values(&mut root, Value::Object(prefixed), false);
            if let Value::Object(root) = root {
                *resource.root_mut() = root;
            }
        }
        Ok(())
    }
}
