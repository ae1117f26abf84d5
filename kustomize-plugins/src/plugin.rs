//! Dispatch from a plugin configuration document to the plugin implementing its `kind`.

use std::{fmt, path::PathBuf};

use anyhow::{Context as _, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    PathExt,
    generator::{ConfigMapGeneratorPlus, Generator, HelmChart, SecretGeneratorPlus},
    manifest::{PluginMeta, Str, Symbol, apiversion},
    resmap::ResourceMap,
    transform::{
        ChartHomeFullPath, EnvUpsert, FullPath, Gomplate, HelmValues, SecretHashTransformer,
        SedOnPath, SelectivePatch, SuperMap, SuperVars, Transformer, ValuesFile,
    },
};

/// What a plugin needs to know about where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginContext {
    /// The directory relative paths in the configuration are resolved against.
    pub root: PathBuf,
}

impl PluginContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Whether a plugin generates resources or transforms the ones it is given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Plugins that can do both generate when there are no input resources.
    #[default]
    Auto,
    Transform,
    Generate,
}

/// A configured plugin.
pub struct Plugin {
    kind: Str,
    transformer: Option<Box<dyn Transformer + Send>>,
    generator: Option<Box<dyn Generator + Send>>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("kind", &self.kind)
            .field("transformer", &self.transformer.is_some())
            .field("generator", &self.generator.is_some())
            .finish()
    }
}

fn parse<T: DeserializeOwned>(config: Value, kind: &str) -> anyhow::Result<T> {
    serde_json::from_value(config).with_context(|| format!("parsing `{kind}` configuration"))
}

impl Plugin {
    /// Builds the plugin named by the `kind` of `config`.
    #[tracing::instrument(skip_all, fields(root = %ctx.root.pretty()))]
    pub fn load(config: Value, ctx: &PluginContext) -> anyhow::Result<Self> {
        let meta: PluginMeta = serde_json::from_value(config.clone())
            .context("plugin configuration must be a mapping with a `kind`")?;
        let kind = meta.kind;
        if meta.api_version != apiversion::QlikV1::VALUE {
            tracing::warn!(%kind, api_version = %meta.api_version, "unexpected plugin apiVersion");
        }

        let plugin = match kind.as_str() {
            "ChartHomeFullPath" => {
                Self::transformer(kind.clone(), ChartHomeFullPath::new(parse(config, &kind)?, ctx))
            }
            "EnvUpsert" => Self::transformer(kind.clone(), EnvUpsert::new(parse(config, &kind)?)?),
            "FullPath" => Self::transformer(kind.clone(), FullPath::new(parse(config, &kind)?, ctx)),
            "Gomplate" => Self::transformer(kind.clone(), Gomplate::new(parse(config, &kind)?, ctx)),
            "HelmValues" => Self::transformer(kind.clone(), HelmValues::new(parse(config, &kind)?)),
            "SecretHashTransformer" => {
                Self::transformer(kind.clone(), SecretHashTransformer::new(parse(config, &kind)?))
            }
            "SedOnPath" => Self::transformer(kind.clone(), SedOnPath::new(parse(config, &kind)?)?),
            "SelectivePatch" => {
                Self::transformer(kind.clone(), SelectivePatch::new(parse(config, &kind)?, ctx)?)
            }
            "SuperVars" => Self::transformer(kind.clone(), SuperVars::new(parse(config, &kind)?, ctx)?),
            "ValuesFile" => Self::transformer(kind.clone(), ValuesFile::new(parse(config, &kind)?, ctx)),
            "SuperSecret" => Self::dual(kind.clone(), SuperMap::secret(parse(config, &kind)?, ctx)?),
            "SuperConfigMap" => {
                Self::dual(kind.clone(), SuperMap::config_map(parse(config, &kind)?, ctx)?)
            }
            "HelmChart" => Self::generator(kind.clone(), HelmChart::new(parse(config, &kind)?, ctx)?),
            "SecretGeneratorPlus" => {
                Self::generator(kind.clone(), SecretGeneratorPlus::new(parse(config, &kind)?, ctx))
            }
            "ConfigMapGeneratorPlus" => {
                Self::generator(kind.clone(), ConfigMapGeneratorPlus::new(parse(config, &kind)?, ctx))
            }
            _ => bail!("unknown plugin kind `{kind}`"),
        };

        tracing::debug!(?plugin, "loaded plugin");
        Ok(plugin)
    }

    fn transformer(kind: Str, transformer: impl Transformer + Send + 'static) -> Self {
        Self { kind, transformer: Some(Box::new(transformer)), generator: None }
    }

    fn generator(kind: Str, generator: impl Generator + Send + 'static) -> Self {
        Self { kind, transformer: None, generator: Some(Box::new(generator)) }
    }

    fn dual<P>(kind: Str, plugin: P) -> Self
    where
        P: Transformer + Generator + Clone + Send + 'static,
    {
        Self { kind, transformer: Some(Box::new(plugin.clone())), generator: Some(Box::new(plugin)) }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let Some(transformer) = &mut self.transformer else {
            bail!("`{}` is not a transformer", self.kind);
        };
        transformer.transform(resources).await.with_context(|| format!("running `{}`", self.kind))
    }

    pub async fn generate(&mut self) -> anyhow::Result<ResourceMap> {
        let Some(generator) = &mut self.generator else {
            bail!("`{}` is not a generator", self.kind);
        };
        generator.generate().await.with_context(|| format!("running `{}`", self.kind))
    }

    /// Generated resources are appended to `resources`.
    #[tracing::instrument(skip_all, fields(kind = %self.kind, ?mode))]
    pub async fn run(&mut self, mode: Mode, mut resources: ResourceMap) -> anyhow::Result<ResourceMap> {
        let generate = match mode {
            Mode::Generate => true,
            Mode::Transform => false,
            Mode::Auto => match (&self.transformer, &self.generator) {
                (Some(_), Some(_)) => resources.is_empty(),
                (Some(_), None) => false,
                (None, _) => true,
            },
        };

        if generate {
            let generated = self.generate().await?;
            resources.merge(generated)?;
        } else {
            self.transform(&mut resources).await?;
        }
        Ok(resources)
    }
}
