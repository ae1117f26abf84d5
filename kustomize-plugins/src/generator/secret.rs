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
    common::{DEFAULT_SECRET_TYPE, InlineGenerator, MapKind, generate_map},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretGeneratorPlusConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(flatten)]
    pub generator: InlineGenerator,
    #[serde(default, rename = "type")]
    pub ty: Option<Str>,
    /// Appended to the literal sources.
    #[serde(default)]
    pub string_data: IndexMap<Str, Str>,
}

/// Generates a single Secret, taking its name and namespace from `metadata` when not given.
#[derive(Debug)]
pub struct SecretGeneratorPlus {
    root: PathBuf,
    generator: InlineGenerator,
    ty: Str,
}

impl SecretGeneratorPlus {
    pub fn new(config: SecretGeneratorPlusConfig, ctx: &PluginContext) -> Self {
        let mut generator = config.generator;
        generator.default_identity(&config.meta.metadata);
        generator.extend_literals(&config.string_data);
        Self {
            root: ctx.root.clone(),
            generator,
            ty: config.ty.filter(|ty| !ty.is_empty()).unwrap_or_else(|| DEFAULT_SECRET_TYPE.into()),
        }
    }
}

#[async_trait::async_trait]
impl Generator for SecretGeneratorPlus {
    #[tracing::instrument(skip_all, name = "secret_generator_plus")]
    async fn generate(&mut self) -> anyhow::Result<ResourceMap> {
        let secret = generate_map(&self.root, &self.generator, MapKind::Secret { ty: &self.ty }).await?;
        Ok(ResourceMap::from_iter([secret]))
    }
}
