//! `SuperSecret` and `SuperConfigMap`: add data to a Secret or ConfigMap in the stream and
//! give it a content hashed name, rewriting every reference to it.
//!
//! When the target is not part of the stream it can be assumed to exist later in the build.
//! The name it will get is then computed from a temporary resource built from the same
//! configuration and the references are rewritten without emitting the temporary resource.

use std::path::PathBuf;

use anyhow::Context;
use compact_str::format_compact;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    exec,
    generator::{
        Generator,
        common::{
            DEFAULT_SECRET_TYPE, InlineGenerator, MapKind, append_data, build_map, generate_map,
        },
    },
    manifest::{PluginMeta, Str},
    plugin::PluginContext,
    resmap::ResourceMap,
    resource::{RefSpecs, ResId, Resource},
};

use super::{
    Transformer,
    refs::{Rename, RenameTransformer},
};

/// Settings shared by both plugins.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperMapArgs {
    #[serde(default, alias = "assumeSecretWillExist")]
    pub assume_target_will_exist: Option<bool>,
    /// Prepended to the name of an assumed target.
    #[serde(default)]
    pub prefix: Str,
    /// A kustomization whose build output holds the assumed target's remaining data.
    #[serde(default)]
    pub assume_target_in_kustomization_path: Option<PathBuf>,
    /// Transformer configuration files with additional `nameReference` entries.
    #[serde(default)]
    pub configurations: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperSecretConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(flatten)]
    pub generator: InlineGenerator,
    #[serde(flatten)]
    pub args: SuperMapArgs,
    #[serde(default, rename = "type")]
    pub ty: Option<Str>,
    #[serde(default)]
    pub string_data: IndexMap<Str, Str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperConfigMapConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(flatten)]
    pub generator: InlineGenerator,
    #[serde(flatten)]
    pub args: SuperMapArgs,
    #[serde(default)]
    pub data: IndexMap<Str, Str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TargetKind {
    ConfigMap,
    Secret { ty: Str },
}

#[derive(Debug, Clone)]
pub struct SuperMap {
    root: PathBuf,
    target: TargetKind,
    name: Str,
    data: IndexMap<Str, Str>,
    generator: InlineGenerator,
    assume_target_will_exist: bool,
    prefix: Str,
    kustomization_path: Option<PathBuf>,
    ref_specs: RefSpecs,
}

impl SuperMap {
    pub fn secret(config: SuperSecretConfig, ctx: &PluginContext) -> anyhow::Result<Self> {
        let ty = config
            .ty
            .filter(|ty| !ty.is_empty())
            .unwrap_or_else(|| DEFAULT_SECRET_TYPE.into());
        Self::new(
            TargetKind::Secret { ty },
            config.meta,
            config.generator,
            config.args,
            config.string_data,
            false,
            ctx,
        )
    }

    pub fn config_map(config: SuperConfigMapConfig, ctx: &PluginContext) -> anyhow::Result<Self> {
        Self::new(
            TargetKind::ConfigMap,
            config.meta,
            config.generator,
            config.args,
            config.data,
            true,
            ctx,
        )
    }

    fn new(
        target: TargetKind,
        meta: PluginMeta,
        mut generator: InlineGenerator,
        args: SuperMapArgs,
        data: IndexMap<Str, Str>,
        assume_by_default: bool,
        ctx: &PluginContext,
    ) -> anyhow::Result<Self> {
        generator.default_identity(&meta.metadata);
        generator.extend_literals(&data);
        let name = generator.args.name.clone().unwrap_or_default();
        anyhow::ensure!(!name.is_empty(), "{} requires `metadata.name`", meta.kind);

        let ref_specs = RefSpecs::with_configurations(&ctx.root, &args.configurations)?;
        Ok(Self {
            root: ctx.root.clone(),
            target,
            name,
            data,
            generator,
            assume_target_will_exist: args.assume_target_will_exist.unwrap_or(assume_by_default),
            prefix: args.prefix,
            kustomization_path: args.assume_target_in_kustomization_path,
            ref_specs,
        })
    }

    fn map_kind(&self) -> MapKind<'_> {
        match &self.target {
            TargetKind::ConfigMap => MapKind::ConfigMap,
            TargetKind::Secret { ty } => MapKind::Secret { ty: ty.as_str() },
        }
    }

    fn hashing_disabled(&self) -> bool {
        self.generator.options().disable_name_suffix_hash.unwrap_or(false)
    }

    fn encoded_data(&self) -> impl Iterator<Item = (String, String)> + '_ {
        let encoding = self.map_kind().encoding();
        self.data.iter().map(move |(k, v)| (k.to_string(), encoding.encode(v)))
    }

    async fn rewrite_references(
        &self,
        id: ResId,
        new_name: Str,
        resources: &mut ResourceMap,
    ) -> anyhow::Result<()> {
        let renames = [Rename::new(id, new_name)?];
        RenameTransformer::new(&self.ref_specs, &renames).transform(resources).await
    }

    #[tracing::instrument(skip_all, fields(id = %id))]
    async fn update_existing(&self, id: ResId, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let resource = resources
            .get_mut(&id)
            .with_context(|| format!("resource `{id}` not in resource map"))?;
        append_data(resource, self.encoded_data())?;

        if self.hashing_disabled() {
            return Ok(());
        }

        let hash = resource.shorthash()?;
        let new_id = resources.rename(&id, format_compact!("{}-{hash}", self.name))?;
        tracing::info!(new_name = %new_id.name, "renamed to content hash");
        self.rewrite_references(id, new_id.name, resources).await
    }

    #[tracing::instrument(skip_all, fields(name = %self.name))]
    async fn rename_assumed(&self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let mut temp = build_map(&self.root, &self.generator, self.map_kind())
            .await
            .context("generating temporary resource")?;
        let original_id = temp.id().clone();

        if let Some(path) = &self.kustomization_path {
            self.augment_from_kustomization(&mut temp, &self.root.join(path)).await?;
        }

        temp.set_name(format_compact!("{}{}", self.prefix, self.name));
        let temp = temp.with_name_suffix_hash()?;
        tracing::info!(new_name = %temp.name(), "assuming target will exist");
        self.rewrite_references(original_id, temp.name().clone(), resources).await
    }

    /// Copies the `data` of the target as built from `path` into `temp`, unencoded.
    async fn augment_from_kustomization(
        &self,
        temp: &mut Resource,
        path: &std::path::Path,
    ) -> anyhow::Result<()> {
        let built = exec::kustomize_build(std::path::Path::new(exec::KUSTOMIZE_BIN), path).await?;
        let kind = self.map_kind().kind();
        let Some(found) = built.find(kind, &self.name) else {
            tracing::info!(path = %path.display(), "target not found in kustomization, not augmenting");
            return Ok(());
        };

        let data = match found.root().get("data") {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Object(data)) => data
                .iter()
                .map(|(k, v)| match v {
                    Value::String(v) => (k.clone(), v.clone()),
                    other => (k.clone(), other.to_string()),
                })
                .collect::<Vec<_>>(),
            Some(_) => anyhow::bail!("`data` of `{}` built from {} is not a mapping", found.id(), path.display()),
        };

        append_data(temp, data)
    }
}

#[async_trait::async_trait]
impl Transformer for SuperMap {
    #[tracing::instrument(skip_all, name = "super_map")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let kind = self.map_kind().kind();
        match resources.find(kind, &self.name).map(|r| r.id().clone()) {
            Some(id) => self.update_existing(id, resources).await,
            None if self.assume_target_will_exist && !self.hashing_disabled() => {
                self.rename_assumed(resources).await
            }
            None => {
                tracing::info!(
                    kind,
                    name = %self.name,
                    assume_target_will_exist = self.assume_target_will_exist,
                    disable_name_suffix_hash = self.hashing_disabled(),
                    "target not in stream, nothing to do"
                );
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl Generator for SuperMap {
    #[tracing::instrument(skip_all, name = "super_map")]
    async fn generate(&mut self) -> anyhow::Result<ResourceMap> {
        let resource = generate_map(&self.root, &self.generator, self.map_kind()).await?;
        Ok(ResourceMap::from_iter([resource]))
    }
}
