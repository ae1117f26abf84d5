use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    fieldspec::{FieldPath, FieldSpec},
    manifest::{PluginMeta, Str},
    resmap::ResourceMap,
    resource::{GvkMatcher, Object},
    selector::Target,
};

use super::Transformer;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvUpsertConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub enabled: bool,
    pub target: Option<Target>,
    /// The env sequence to upsert into. Without one there is nothing to do.
    #[serde(default)]
    pub path: Option<Str>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    #[serde(default)]
    pub name: Str,
    #[serde(default)]
    pub value: Option<Str>,
    #[serde(default)]
    pub value_from: Option<Value>,
    #[serde(default)]
    pub delete: bool,
}

impl EnvVar {
    fn has_value(&self) -> bool {
        self.value.as_ref().is_some_and(|v| !v.is_empty()) || self.value_from.as_ref().is_some_and(|v| !v.is_null())
    }

    /// `valueFrom` wins over `value`.
    fn set_on(&self, env: &mut Object) {
        match &self.value_from {
            Some(value_from) if !value_from.is_null() => {
                env.retain(|key, _| key != "value");
                env.insert("valueFrom".into(), value_from.clone());
            }
            _ => {
                env.retain(|key, _| key != "valueFrom");
                env.insert("value".into(), Value::String(self.value.clone().unwrap_or_default().into()));
            }
        }
    }
}

/// Inserts, updates or deletes container environment variables by name.
#[derive(Debug)]
pub struct EnvUpsert {
    enabled: bool,
    target: Target,
    field_spec: Option<FieldSpec>,
    env: Vec<EnvVar>,
}

impl EnvUpsert {
    pub fn new(config: EnvUpsertConfig) -> anyhow::Result<Self> {
        let Some(target) = config.target else {
            bail!("must specify a target in the config for the environment variables upsert");
        };

        for var in &config.env {
            if var.name.is_empty() {
                bail!("env var config has no name: {var:?}");
            }
            if !var.delete && !var.has_value() {
                bail!("env var config has no value or valueFrom: {var:?}");
            }
        }

        let field_spec = match config.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => {
                let path: FieldPath = path.parse().with_context(|| format!("invalid env path `{path}`"))?;
                Some(FieldSpec::new(GvkMatcher::default(), path, false))
            }
            None => None,
        };

        Ok(Self { enabled: config.enabled, target, field_spec, env: config.env })
    }

    fn upsert(&self, present: &mut Vec<Value>) {
        for var in &self.env {
            let position = present
                .iter()
                .position(|env| env.get("name").and_then(Value::as_str) == Some(var.name.as_str()));

            match (position, var.delete) {
                (Some(i), true) => drop(present.remove(i)),
                (Some(i), false) => {
                    if let Value::Object(env) = &mut present[i] {
                        var.set_on(env);
                    }
                }
                (None, true) => {}
                (None, false) => {
                    let mut env = Object::new();
                    env.insert("name".into(), Value::String(var.name.to_string()));
                    var.set_on(&mut env);
                    present.push(Value::Object(env));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transformer for EnvUpsert {
    #[tracing::instrument(skip_all, name = "env_upsert")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(field_spec) = &self.field_spec else {
            tracing::debug!("no env path configured, nothing to do");
            return Ok(());
        };

        for id in resources.select_ids(&self.target) {
            let resource = &mut resources[&id];
            field_spec
                .apply::<Value>(resource, &mut |value| {
                    // Anything other than a sequence is left untouched.
                    if let Value::Array(present) = value {
                        self.upsert(present);
                    }
                    Ok(())
                })
                .with_context(|| format!("upserting env vars of `{id}`"))?;
        }
        resources.reindex()?;
        Ok(())
    }
}
