use std::path::PathBuf;

use anyhow::Context as _;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    PathExt,
    exec::copy_dir,
    manifest::{PluginMeta, Str, Symbol, kind},
    plugin::PluginContext,
    resmap::ResourceMap,
};

use super::{Transformer, full_path::join_clean};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartHomeFullPathConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub chart_home: Str,
}

/// Points `chartHome` of every resource at a private copy of the chart directory.
#[derive(Debug)]
pub struct ChartHomeFullPath {
    chart_home: PathBuf,
}

impl ChartHomeFullPath {
    pub fn new(config: ChartHomeFullPathConfig, ctx: &PluginContext) -> Self {
        Self { chart_home: join_clean(&ctx.root, &config.chart_home) }
    }

    fn fresh_home(&self, chart_name: &str, copy: bool) -> anyhow::Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix("temp")
            .tempdir()
            .context("creating temporary chart home")?
            .keep();
        let home = dir.join(chart_name);
        std::fs::create_dir_all(&home)
            .with_context(|| format!("creating directory {}", home.pretty()))?;

        if copy {
            copy_dir(&self.chart_home, &home).with_context(|| {
                format!("copying chart home from {} to {}", self.chart_home.pretty(), home.pretty())
            })?;
        }
        Ok(home)
    }
}

#[async_trait::async_trait]
impl Transformer for ChartHomeFullPath {
    #[tracing::instrument(skip_all, name = "chart_home_full_path")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        for resource in resources.iter_mut() {
            let chart_name =
                resource.root().get("chartName").and_then(Value::as_str).unwrap_or_default().to_owned();
            let home = self.fresh_home(&chart_name, resource.kind() == kind::HelmChart::VALUE)?;
            tracing::debug!(id = %resource.id(), home = %home.pretty(), "assigned chart home");
            resource
                .root_mut()
                .insert("chartHome".into(), Value::String(home.to_string_lossy().into_owned()));
        }
        Ok(())
    }
}
