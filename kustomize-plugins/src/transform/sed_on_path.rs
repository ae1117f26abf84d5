use anyhow::{Context as _, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    fieldspec::{FieldPath, FieldSpec, type_name},
    manifest::PluginMeta,
    resmap::ResourceMap,
    resource::GvkMatcher,
    sed::Script,
};

use super::Transformer;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SedOnPathConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(with = "crate::serde_ex::string")]
    pub path: FieldPath,
    #[serde(deserialize_with = "crate::serde_ex::one_or_many::deserialize")]
    pub regex: Vec<String>,
}

/// Runs sed substitutions over the strings found at a path in every resource.
#[derive(Debug)]
pub struct SedOnPath {
    field_spec: FieldSpec,
    scripts: Vec<Script>,
}

impl SedOnPath {
    pub fn new(config: SedOnPathConfig) -> anyhow::Result<Self> {
        let scripts = config.regex.iter().map(|s| s.parse()).collect::<anyhow::Result<Vec<Script>>>()?;
        Ok(Self { field_spec: FieldSpec::new(GvkMatcher::default(), config.path, false), scripts })
    }

    fn edit(&self, s: &mut String) {
        for script in &self.scripts {
            *s = script.apply(s);
        }
    }
}

#[async_trait::async_trait]
impl Transformer for SedOnPath {
    #[tracing::instrument(skip_all, name = "sed_on_path")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let path = &self.field_spec.path;
        for resource in resources.iter_mut() {
            let id = resource.id().clone();
            self.field_spec
                .apply::<Value>(resource, &mut |value| {
                    match value {
                        Value::Null => {}
                        Value::String(s) => self.edit(s),
                        Value::Array(items) => {
                            for item in items {
                                match item {
                                    Value::String(s) => self.edit(s),
                                    other => bail!(
                                        "expected a sequence of strings at `{path}` but it contains {}",
                                        type_name(other)
                                    ),
                                }
                            }
                        }
                        other => bail!(
                            "expected a string or a sequence of strings at `{path}` but found {}",
                            type_name(other)
                        ),
                    }
                    Ok(())
                })
                .with_context(|| format!("running sed on `{path}` of `{id}`"))?;
        }
        resources.reindex()?;
        Ok(())
    }
}
