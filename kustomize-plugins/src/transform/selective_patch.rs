use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

use crate::{
    PathExt,
    manifest::PluginMeta,
    patch::Patch,
    plugin::PluginContext,
    resmap::ResourceMap,
    selector::Target,
};

use super::Transformer;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectivePatchConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target: Option<Target>,
    /// A patch file relative to the plugin root.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// An inline patch document, applied after the one from `path`.
    #[serde(default)]
    pub patch: Option<String>,
}

/// Applies JSON 6902 and strategic merge patches to the resources selected by a target.
#[derive(Debug)]
pub struct SelectivePatch {
    enabled: bool,
    target: Option<Target>,
    patches: Vec<Patch>,
}

impl SelectivePatch {
    pub fn new(config: SelectivePatchConfig, ctx: &PluginContext) -> anyhow::Result<Self> {
        let mut patches = vec![];
        if let Some(path) = config.path.filter(|p| !p.as_os_str().is_empty()) {
            let path = ctx.root.join(path);
            let patch = std::fs::read_to_string(&path)
                .with_context(|| format!("reading patch {}", path.pretty()))?;
            patches.push(
                Patch::parse(&patch)
                    .with_context(|| format!("neither a strategic merge patch nor a JSON 6902 patch was found in {}", path.pretty()))?,
            );
        }

        if let Some(patch) = config.patch.filter(|p| !p.trim().is_empty()) {
            patches.push(Patch::parse(&patch).context("parsing inline patch")?);
        }

        Ok(Self { enabled: config.enabled, target: config.target, patches })
    }
}

#[async_trait::async_trait]
impl Transformer for SelectivePatch {
    #[tracing::instrument(skip_all, name = "selective_patch")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let Some(target) = self.target.as_ref().filter(|_| self.enabled) else {
            return Ok(());
        };

        resources.try_map(|resource| {
            if !target.matches(&resource) {
                return Ok(resource);
            }

            let id = resource.id().clone();
            self.patches
                .iter()
                .try_fold(resource, |resource, patch| patch.apply(resource))
                .with_context(|| format!("patching `{id}`"))
        })
    }
}
