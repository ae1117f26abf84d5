use std::path::Path;

use anyhow::{Context, bail};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    PathExt,
    manifest::{
        GeneratorArgs, GeneratorOptions, KeyValuePair, KeyValuePairSources, ObjectMeta, Str, Symbol as _, kind,
    },
    resource::{Gvk, Object, Resource},
};

/// Generator arguments and options written inline in a plugin configuration,
/// the way kustomize's `secretGenerator`/`configMapGenerator` entries look.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineGenerator {
    #[serde(flatten)]
    pub args: GeneratorArgs,
    #[serde(flatten)]
    pub options: GeneratorOptions,
}

impl InlineGenerator {
    /// Appends `key=value` literal sources.
    pub fn extend_literals<'a>(&mut self, data: impl IntoIterator<Item = (&'a Str, &'a Str)>) {
        self.args
            .sources
            .literals
            .extend(data.into_iter().map(|(k, v)| KeyValuePair { key: k.clone(), value: v.clone() }));
    }

    /// Falls back to the configuration's `metadata` for an unset name or namespace.
    pub fn default_identity(&mut self, metadata: &ObjectMeta) {
        if self.args.name.as_ref().is_none_or(|name| name.is_empty()) {
            self.args.name = Some(metadata.name.clone());
        }
        if self.args.namespace.as_ref().is_none_or(|ns| ns.is_empty()) {
            self.args.namespace = metadata.namespace.clone();
        }
    }

    /// The generator options with per-generator `options` taking precedence.
    pub fn options(&self) -> GeneratorOptions {
        merge_options(&self.options, self.args.options.as_ref().unwrap_or(GeneratorOptions::static_default()))
    }
}

pub fn merge_options(global: &GeneratorOptions, local: &GeneratorOptions) -> GeneratorOptions {
    GeneratorOptions {
        labels: global.labels.iter().chain(&local.labels).map(|(k, v)| (k.clone(), v.clone())).collect(),
        annotations: global
            .annotations
            .iter()
            .chain(&local.annotations)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        disable_name_suffix_hash: local.disable_name_suffix_hash.or(global.disable_name_suffix_hash),
        immutable: global.immutable || local.immutable,
    }
}

pub const DEFAULT_SECRET_TYPE: &str = "Opaque";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncoding {
    Raw,
    Base64,
}

impl DataEncoding {
    pub fn encode(self, data: &str) -> String {
        match self {
            DataEncoding::Raw => data.to_string(),
            DataEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(data),
        }
    }
}

/// The kind of resource built from key/value sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind<'a> {
    ConfigMap,
    Secret { ty: &'a str },
}

impl MapKind<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            MapKind::ConfigMap => kind::ConfigMap::VALUE,
            MapKind::Secret { .. } => kind::Secret::VALUE,
        }
    }

    pub fn encoding(&self) -> DataEncoding {
        match self {
            MapKind::ConfigMap => DataEncoding::Raw,
            MapKind::Secret { .. } => DataEncoding::Base64,
        }
    }
}

/// Builds a ConfigMap or Secret from generator arguments, with a name suffix hash unless
/// disabled.
pub async fn generate_map(
    root: &Path,
    generator: &InlineGenerator,
    map_kind: MapKind<'_>,
) -> anyhow::Result<Resource> {
    let resource = build_map(root, generator, map_kind).await?;
    apply_hash_suffix_if_needed(resource, generator.options().disable_name_suffix_hash)
}

/// Builds a ConfigMap or Secret named exactly as configured.
pub async fn build_map(
    root: &Path,
    generator: &InlineGenerator,
    map_kind: MapKind<'_>,
) -> anyhow::Result<Resource> {
    let kind = map_kind.kind();
    let Some(name) = generator.args.name.as_ref().filter(|name| !name.is_empty()) else {
        bail!("{kind} generator requires a name");
    };

    let GeneratorOptions { labels, annotations, immutable, .. } = generator.options();

    let data = process_key_value_sources(root, &generator.args.sources, map_kind.encoding(), kind)
        .await
        .with_context(|| format!("collecting data for {kind} `{name}`"))?;

    let mut resource = Resource::new(Gvk::new("v1", kind), name.clone());
    resource.set_namespace(generator.args.namespace.clone().filter(|ns| !ns.is_empty()));

    let mut metadata = resource.make_metadata_mut();
    for (key, value) in labels {
        metadata.insert_label(key, value);
    }
    for (key, value) in annotations {
        metadata.insert_annotation(key, value);
    }
    metadata.set_behavior(generator.args.behavior);

    if let MapKind::Secret { ty } = map_kind {
        resource.root_mut().insert("type".into(), Value::String(ty.to_string()));
    }
    if !data.is_empty() {
        resource.root_mut().insert("data".into(), Value::Object(data));
    }
    if immutable {
        resource.root_mut().insert("immutable".into(), Value::Bool(true));
    }

    Ok(resource)
}

/// Inserts already encoded entries into the resource's `data`, creating it if missing.
pub fn append_data(
    resource: &mut Resource,
    entries: impl IntoIterator<Item = (String, String)>,
) -> anyhow::Result<()> {
    let id = resource.id().clone();
    let data = resource.root_mut().entry("data").or_insert(Value::Null);
    match data {
        Value::Null => *data = Value::Object(Object::new()),
        Value::Object(_) => {}
        other => bail!("`data` of `{id}` is {}, expected a mapping", crate::fieldspec::type_name(other)),
    }

    if let Value::Object(data) = data {
        data.extend(entries.into_iter().map(|(k, v)| (k, Value::String(v))));
    }
    Ok(())
}

pub async fn process_key_value_sources(
    root: &Path,
    sources: &KeyValuePairSources,
    encoding: DataEncoding,
    resource_type: &str,
) -> anyhow::Result<Object> {
    let mut object = Object::new();
    let mut insert = |key: &str, value: &str| -> anyhow::Result<()> {
        if object.insert(key.to_string(), Value::String(encoding.encode(value))).is_some() {
            bail!("duplicate key `{key}` in {resource_type} sources");
        }
        Ok(())
    };

    for path in &sources.envs {
        let path = root.join(path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read env file {}", path.pretty()))?;
        for (key, value) in parse_env_file(&contents) {
            insert(key.as_str(), value.as_str())?;
        }
    }

    for kv in &sources.literals {
        insert(kv.key.as_str(), unquote(&kv.value))?;
    }

    for kv in &sources.files {
        let path = root.join(kv.value.as_str());
        let key = match &kv.key {
            Some(key) => key.clone(),
            None => path.file_name().unwrap_or_default().to_string_lossy().into(),
        };
        let data = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read file {}", path.pretty()))?;
        insert(key.as_str(), data.as_str())?;
    }

    Ok(object)
}

/// `KEY=VALUE` lines; blank lines and `#` comments are skipped and a bare `KEY` takes its
/// value from the environment when set.
fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.split_once('=') {
            Some((key, value)) => Some((key.trim().to_string(), value.to_string())),
            None => std::env::var(line).ok().map(|value| (line.to_string(), value)),
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

pub fn apply_hash_suffix_if_needed(
    resource: Resource,
    disable_name_suffix_hash: Option<bool>,
) -> anyhow::Result<Resource> {
    if disable_name_suffix_hash.unwrap_or(false) {
        Ok(resource)
    } else {
        resource.with_name_suffix_hash()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn sources_are_collected_in_order() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::write(root.path().join("app.env"), "# comment\nLEVEL=debug\n\n")?;
        std::fs::write(root.path().join("config.json"), "{}")?;

        let generator: InlineGenerator = crate::yaml::from_str(
            r#"
name: settings
envs: [app.env]
literals:
  - greeting="hello world"
files:
  - config.json
  - renamed=config.json
disableNameSuffixHash: true
"#,
        )?;

        let resource = generate_map(root.path(), &generator, MapKind::ConfigMap).await?;
        assert_eq!(resource.name(), "settings");
        assert_eq!(
            resource.root()["data"],
            json!({
                "LEVEL": "debug",
                "greeting": "hello world",
                "config.json": "{}",
                "renamed": "{}"
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() -> anyhow::Result<()> {
        let generator: InlineGenerator =
            crate::yaml::from_str("name: s\nliterals: [a=1, a=2]")?;
        let err = generate_map(Path::new("."), &generator, MapKind::Secret { ty: "Opaque" })
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("duplicate key `a`"), "{err:#}");
        Ok(())
    }

    #[tokio::test]
    async fn secrets_are_encoded_and_hashed() -> anyhow::Result<()> {
        let generator: InlineGenerator = crate::yaml::from_str(
            r#"
name: creds
namespace: prod
behavior: merge
literals: [password=hunter2]
options:
  labels:
    app: web
"#,
        )?;

        let resource =
            generate_map(Path::new("."), &generator, MapKind::Secret { ty: "Opaque" }).await?;
        assert!(resource.name().starts_with("creds-"));
        assert_eq!(resource.namespace().map(|ns| ns.as_str()), Some("prod"));
        assert_eq!(resource.root()["data"], json!({"password": "aHVudGVyMg=="}));
        assert_eq!(resource.root()["type"], "Opaque");
        assert_eq!(resource.root()["metadata"]["labels"], json!({"app": "web"}));
        assert_eq!(
            resource.root()["metadata"]["annotations"]["kustomize.config.k8s.io/behavior"],
            "merge"
        );
        Ok(())
    }

    #[test]
    fn local_options_take_precedence() {
        let global = GeneratorOptions { disable_name_suffix_hash: Some(true), ..Default::default() };
        let local = GeneratorOptions { disable_name_suffix_hash: Some(false), ..Default::default() };
        assert_eq!(merge_options(&global, &local).disable_name_suffix_hash, Some(false));
        assert_eq!(
            merge_options(&global, GeneratorOptions::static_default()).disable_name_suffix_hash,
            Some(true)
        );
    }
}
