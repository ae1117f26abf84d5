use std::path::{Component, Path, PathBuf};

use anyhow::{Context as _, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    fieldspec::{FieldSpecs, type_name},
    manifest::PluginMeta,
    plugin::PluginContext,
    resmap::ResourceMap,
};

use super::Transformer;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullPathConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub field_specs: FieldSpecs,
}

/// Turns relative paths into absolute ones by joining them onto the plugin root.
#[derive(Debug)]
pub struct FullPath {
    root: PathBuf,
    field_specs: FieldSpecs,
}

impl FullPath {
    pub fn new(config: FullPathConfig, ctx: &PluginContext) -> Self {
        Self { root: ctx.root.clone(), field_specs: config.field_specs }
    }
}

/// Lexically joins `path` onto `root`, an absolute `path` is still placed under `root`.
pub fn join_clean(root: &Path, path: &str) -> PathBuf {
    let mut joined = PathBuf::new();
    for component in root.components().chain(Path::new(path).components()) {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !joined.pop() && !joined.has_root() {
                    joined.push(component);
                }
            }
            Component::RootDir | Component::Prefix(_) if joined.as_os_str().is_empty() => {
                joined.push(component)
            }
            Component::RootDir | Component::Prefix(_) => {}
            Component::Normal(part) => joined.push(part),
        }
    }
    joined
}

#[async_trait::async_trait]
impl Transformer for FullPath {
    #[tracing::instrument(skip_all, name = "full_path")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        for resource in resources.iter_mut() {
            let id = resource.id().clone();
            self.field_specs
                .apply::<Value>(resource, |value| {
                    match value {
                        Value::String(relative) => {
                            *relative = join_clean(&self.root, relative).to_string_lossy().into_owned();
                            Ok(())
                        }
                        other => bail!("expected a relative path string but found {}", type_name(other)),
                    }
                })
                .with_context(|| format!("resolving paths of `{id}`"))?;
        }
        resources.reindex()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn joins_lexically() {
        let root = Path::new("/work/base");
        assert_eq!(join_clean(root, "charts/app"), Path::new("/work/base/charts/app"));
        assert_eq!(join_clean(root, "./charts/../values.yaml"), Path::new("/work/base/values.yaml"));
        assert_eq!(join_clean(root, "../shared"), Path::new("/work/shared"));
        assert_eq!(join_clean(root, "/abs"), Path::new("/work/base/abs"));
    }

    #[tokio::test]
    async fn rewrites_matching_fields() -> anyhow::Result<()> {
        let mut resources = ResourceMap::from_yaml_stream(
            r#"
apiVersion: apps/v1
kind: HelmChart
metadata:
  name: chart
chartHome: charts
valuesFrom: values.yaml
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm
chartHome: charts
"#,
        )?;

        let config: FullPathConfig = crate::yaml::from_str(
            r#"
apiVersion: qlik.com/v1
kind: FullPath
metadata:
  name: full-path
fieldSpecs:
  - kind: HelmChart
    path: chartHome
  - kind: HelmChart
    path: valuesFrom
  - kind: HelmChart
    path: missing
"#,
        )?;
        FullPath::new(config, &PluginContext::new("/work/base")).transform(&mut resources).await?;

        let chart = resources.find("HelmChart", "chart").expect("chart exists");
        assert_eq!(chart.root()["chartHome"], json!("/work/base/charts"));
        assert_eq!(chart.root()["valuesFrom"], json!("/work/base/values.yaml"));
        assert!(chart.root().get("missing").is_none());
        assert!(
            resources.to_string().starts_with(
                "apiVersion: apps/v1\nkind: HelmChart\nmetadata:\n  name: chart\nchartHome: /work/base/charts\n"
            ),
            "{resources}"
        );
        assert_eq!(resources.find("ConfigMap", "cm").expect("cm exists").root()["chartHome"], json!("charts"));
        Ok(())
    }

    #[tokio::test]
    async fn non_string_is_an_error() -> anyhow::Result<()> {
        let mut resources = ResourceMap::from_yaml_stream(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\ndata:\n  a: b\n",
        )?;
        let config: FullPathConfig =
            crate::yaml::from_str("kind: FullPath\nfieldSpecs: [{kind: ConfigMap, path: data}]\n")?;
        let result = FullPath::new(config, &PluginContext::new("/root")).transform(&mut resources).await;
        assert!(result.is_err());
        Ok(())
    }
}
