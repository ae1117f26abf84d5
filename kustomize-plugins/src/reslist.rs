use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    manifest::{Str, Symbol, apiversion, kind},
    resmap::ResourceMap,
    resource::Resource,
};

/// The KRM function wire format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    // Older kustomize releases send `config.kubernetes.io/v1alpha1`, so the version is not checked.
    #[serde(default = "default_api_version")]
    api_version: Str,
    kind: kind::ResourceList,
    #[serde(default)]
    pub items: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_config: Option<Value>,
}

fn default_api_version() -> Str {
    apiversion::ConfigV1::VALUE.into()
}

impl ResourceList {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: kind::ResourceList,
            items: resources.into_iter().collect(),
            function_config: None,
        }
    }

    pub fn into_resource_map(self) -> anyhow::Result<ResourceMap> {
        Ok(ResourceMap::try_from_resources(self.items)?)
    }
}

impl From<ResourceMap> for ResourceList {
    fn from(resources: ResourceMap) -> Self {
        Self::new(resources)
    }
}

impl IntoIterator for ResourceList {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
