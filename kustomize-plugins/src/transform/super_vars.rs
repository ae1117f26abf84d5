use std::path::PathBuf;

use anyhow::{Context as _, bail};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    PathExt,
    fieldspec::{FieldRef, FieldSpecs},
    manifest::{PluginMeta, Str},
    plugin::PluginContext,
    refvar,
    resmap::ResourceMap,
    resource::{Gvk, GvkMatcher, Resource},
};

use super::Transformer;

const DEFAULT_FIELD_PATH: &str = "metadata.name";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperVarsConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub vars: Vec<Var>,
    /// Files declaring `varReference` field specs, relative to the plugin root.
    #[serde(default)]
    pub configurations: Vec<PathBuf>,
}

/// A kustomize var: a name bound to a field of some resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Var {
    pub name: Str,
    pub objref: ObjRef,
    #[serde(default)]
    pub fieldref: Option<FieldSelector>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjRef {
    #[serde(default)]
    pub api_version: Option<Str>,
    pub kind: Str,
    pub name: Str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSelector {
    #[serde(with = "crate::serde_ex::string")]
    pub fieldpath: FieldRef,
}

impl ObjRef {
    fn matches(&self, resource: &Resource) -> bool {
        let matcher = match &self.api_version {
            Some(api_version) => {
                let gvk = Gvk::new(api_version, self.kind.clone());
                GvkMatcher { group: Some(gvk.group), version: Some(gvk.version), kind: Some(gvk.kind) }
            }
            None => GvkMatcher::kind(self.kind.clone()),
        };
        matcher.matches(resource.gvk()) && resource.name() == &self.name
    }
}

/// Resolves vars against the stream and expands `$(VAR)` references at the configured paths.
#[derive(Debug)]
pub struct SuperVars {
    vars: Vec<Var>,
    var_references: FieldSpecs,
}

impl SuperVars {
    pub fn new(config: SuperVarsConfig, ctx: &PluginContext) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TransformerConfig {
            #[serde(default)]
            var_reference: FieldSpecs,
        }

        let mut var_references = FieldSpecs::default();
        for file in &config.configurations {
            let path = ctx.root.join(file);
            let config: TransformerConfig = crate::load_yaml(&path)
                .with_context(|| format!("loading var references from {}", path.pretty()))?;
            var_references.merge(config.var_reference)?;
        }

        Ok(Self { vars: config.vars, var_references })
    }

    /// Every var takes its value from the first resource its objref matches.
    fn resolve(&self, resources: &ResourceMap) -> anyhow::Result<IndexMap<Str, Value>> {
        let mut values = IndexMap::with_capacity(self.vars.len());
        for var in &self.vars {
            let Some(resource) = resources.iter().find(|r| var.objref.matches(r)) else {
                bail!("var: '{}' cannot be mapped to a field in the set of known resources", var.name);
            };

            let path = match &var.fieldref {
                Some(selector) => selector.fieldpath.clone(),
                None => DEFAULT_FIELD_PATH.parse()?,
            };
            let Some(value) = resource.field(&path) else {
                bail!("var: '{}' refers to field `{path}` which is missing in `{}`", var.name, resource.id());
            };

            tracing::debug!(var = %var.name, %value, "resolved var");
            values.insert(var.name.clone(), value);
        }
        Ok(values)
    }
}

#[async_trait::async_trait]
impl Transformer for SuperVars {
    #[tracing::instrument(skip_all, name = "super_vars")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let values = self.resolve(resources)?;
        let mut lookup = |name: &str| values.get(name).cloned();

        for resource in resources.iter_mut() {
            let id = resource.id().clone();
            self.var_references
                .apply::<Value>(resource, |value| refvar::expand_value(value, &mut lookup))
                .with_context(|| format!("expanding vars in `{id}`"))?;
        }
        resources.reindex()?;
        Ok(())
    }
}
