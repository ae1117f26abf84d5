use serde::Deserialize;
use serde_json::Value;

use crate::{
    manifest::{PluginMeta, Str, Symbol, kind},
    merge::merge_values,
    resmap::ResourceMap,
    resource::{Object, Resource},
};

use super::Transformer;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmValuesConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub chart_name: Option<Str>,
    #[serde(default)]
    pub release_name: Option<Str>,
    #[serde(default)]
    pub release_namespace: Option<Str>,
    #[serde(default)]
    pub values: Object,
    #[serde(default)]
    pub overwrite: bool,
}

/// Merges values and release settings into `HelmChart` resources.
#[derive(Debug)]
pub struct HelmValues {
    config: HelmValuesConfig,
}

/// `"null"` is how an unset templated value arrives, treat it like an empty one.
fn given(value: &Option<Str>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty() && *v != "null")
}

impl HelmValues {
    pub fn new(config: HelmValuesConfig) -> Self {
        Self { config }
    }

    fn merge_into(&self, resource: &mut Resource, chart_name: &str) {
        let overwrite = self.config.overwrite;
        let root = resource.root_mut();

        if given(&self.config.chart_name).is_none_or(|name| name == chart_name) {
            let values = root.entry("values").or_insert(Value::Null);
            merge_values(values, Value::Object(self.config.values.clone()), overwrite);
        }

        let nested = self.config.values.get(chart_name).filter(|v| !v.is_null() && v.as_str() != Some("null"));
        if let Some(nested) = nested.filter(|_| !chart_name.is_empty()) {
            let values = root.entry("values").or_insert(Value::Null);
            if !values.is_object() {
                *values = Value::Object(Object::new());
            }
            if let Value::Object(values) = values {
                let entry = values.entry(chart_name).or_insert(Value::Null);
                merge_values(entry, nested.clone(), overwrite);
            }
        }

        if let Some(release_name) = given(&self.config.release_name) {
            root.insert("releaseName".into(), Value::String(release_name.into()));
        }
        if let Some(release_namespace) = given(&self.config.release_namespace) {
            root.insert("releaseNamespace".into(), Value::String(release_namespace.into()));
        }
    }
}

#[async_trait::async_trait]
impl Transformer for HelmValues {
    #[tracing::instrument(skip_all, name = "helm_values")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        for resource in resources.iter_mut().filter(|r| r.kind() == kind::HelmChart::VALUE) {
            let chart_name =
                resource.root().get("chartName").and_then(Value::as_str).unwrap_or_default().to_owned();
            tracing::debug!(id = %resource.id(), %chart_name, "merging helm values");
            self.merge_into(resource, &chart_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const STREAM: &str = r#"
apiVersion: apps/v1
kind: HelmChart
metadata:
  name: web
chartName: web
releaseName: old
values:
  image:
    tag: "1.0"
  replicas: 1
---
apiVersion: apps/v1
kind: HelmChart
metadata:
  name: db
chartName: db
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm
chartName: web
"#;

    async fn run(config: &str) -> anyhow::Result<ResourceMap> {
        let mut resources = ResourceMap::from_yaml_stream(STREAM)?;
        HelmValues::new(crate::yaml::from_str(config)?).transform(&mut resources).await?;
        Ok(resources)
    }

    #[tokio::test]
    async fn merges_into_named_chart_keeping_existing_values() -> anyhow::Result<()> {
        let resources = run(
            r#"
kind: HelmValues
chartName: web
releaseName: web-release
releaseNamespace: "null"
values:
  image:
    tag: "2.0"
    pullPolicy: Always
"#,
        )
        .await?;

        let web = resources.find("HelmChart", "web").expect("web exists");
        assert_eq!(
            web.root()["values"],
            json!({"image": {"tag": "1.0", "pullPolicy": "Always"}, "replicas": 1})
        );
        assert_eq!(web.root()["releaseName"], json!("web-release"));
        assert!(web.root().get("releaseNamespace").is_none());

        let db = resources.find("HelmChart", "db").expect("db exists");
        assert!(db.root().get("values").is_none());
        assert_eq!(db.root()["releaseName"], json!("web-release"));

        let cm = resources.find("ConfigMap", "cm").expect("cm exists");
        assert!(cm.root().get("releaseName").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_and_per_chart_values() -> anyhow::Result<()> {
        let resources = run(
            r#"
kind: HelmValues
overwrite: true
values:
  image:
    tag: "2.0"
  db:
    storage: 10Gi
"#,
        )
        .await?;

        let web = resources.find("HelmChart", "web").expect("web exists");
        assert_eq!(web.root()["values"]["image"], json!({"tag": "2.0"}));
        assert_eq!(web.root()["values"]["replicas"], json!(1));

        let db = resources.find("HelmChart", "db").expect("db exists");
        assert_eq!(
            db.root()["values"],
            json!({"image": {"tag": "2.0"}, "db": {"storage": "10Gi"}})
        );
        Ok(())
    }
}
