use compact_str::format_compact;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::{
    generator::common::{DataEncoding, append_data},
    manifest::{PluginMeta, Str},
    resmap::ResourceMap,
    resource::RefSpecs,
};

use super::{
    Transformer,
    refs::{Rename, RenameTransformer},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretHashTransformerConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    #[serde(default)]
    pub secret_name: Str,
    /// Entries added to the secret's `data`, base64 encoded.
    #[serde(default)]
    pub append: IndexMap<Str, Str>,
}

/// Appends data to a Secret and renames it after its content.
#[derive(Debug)]
pub struct SecretHashTransformer {
    config: SecretHashTransformerConfig,
}

impl SecretHashTransformer {
    pub fn new(config: SecretHashTransformerConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Transformer for SecretHashTransformer {
    #[tracing::instrument(skip_all, name = "secret_hash_transformer")]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        let secret_name = &self.config.secret_name;
        let Some(id) = resources.find("Secret", secret_name).map(|r| r.id().clone()) else {
            tracing::info!(%secret_name, "secret not in stream, nothing to do");
            return Ok(());
        };

        let secret = &mut resources[&id];
        append_data(
            secret,
            self.config
                .append
                .iter()
                .map(|(k, v)| (k.to_string(), DataEncoding::Base64.encode(v))),
        )?;

        let hash = secret.shorthash()?;
        let new_id = resources.rename(&id, format_compact!("{secret_name}-{hash}"))?;
        let renames = [Rename::new(id, new_id.name)?];
        RenameTransformer::new(RefSpecs::load_builtin(), &renames).transform(resources).await
    }
}
