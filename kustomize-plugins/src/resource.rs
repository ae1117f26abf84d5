mod refs;
mod shorthash;
mod view;

use std::{fmt, ops::Deref, path::Path};

use anyhow::{Context, bail};
use compact_str::format_compact;
use serde::{Deserialize, Serialize, ser::SerializeMap as _};
use serde_json::Value;

use crate::{PathExt, fieldspec::FieldRef, manifest::Str};

pub use self::refs::{RefSpec, RefSpecs};
pub use self::view::{AnnotationsView, LabelsView, MetadataView, MetadataViewMut};

pub type Object = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gvk {
    pub group: Str,
    pub version: Str,
    pub kind: Str,
}

impl Gvk {
    pub fn new(api_version: &str, kind: impl Into<Str>) -> Self {
        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        Gvk { group: group.into(), version: version.into(), kind: kind.into() }
    }

    pub fn api_version(&self) -> Str {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format_compact!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct GvkMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Str>,
}

impl fmt::Display for GvkMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "{kind}.")?;
        }

        if let Some(version) = &self.version {
            write!(f, "{version}.")?;
        }

        if let Some(group) = &self.group {
            write!(f, "{group}")
        } else {
            write!(f, "*")
        }
    }
}

impl GvkMatcher {
    pub fn kind(kind: impl Into<Str>) -> Self {
        GvkMatcher { kind: Some(kind.into()), ..Default::default() }
    }

    /// Empty strings are treated the same as absent fields.
    pub fn matches(&self, gvk: &Gvk) -> bool {
        fn field_matches(pattern: &Option<Str>, value: &Str) -> bool {
            pattern.as_ref().is_none_or(|p| p.is_empty() || p == value)
        }

        field_matches(&self.group, &gvk.group)
            && field_matches(&self.version, &gvk.version)
            && field_matches(&self.kind, &gvk.kind)
    }

    pub fn overlaps_with(&self, other: &GvkMatcher) -> bool {
        (self.group.is_none() || other.group.is_none() || self.group == other.group)
            && (self.version.is_none() || other.version.is_none() || self.version == other.version)
            && (self.kind.is_none() || other.kind.is_none() || self.kind == other.kind)
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResId {
    #[serde(flatten)]
    pub gvk: Gvk,
    pub name: Str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Str>,
}

impl Deref for ResId {
    type Target = Gvk;

    fn deref(&self) -> &Self::Target {
        &self.gvk
    }
}

impl fmt::Debug for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "{}/{}.{namespace}", self.gvk, self.name)?;
        } else {
            write!(f, "{}/{}", self.gvk, self.name)?;
        }
        Ok(())
    }
}

/// A single Kubernetes-style document.
///
/// `root` holds everything except `apiVersion` and `kind`, which live in the id.
/// `metadata.name` and `metadata.namespace` are kept in sync with the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    id: ResId,
    root: Object,
}

impl Resource {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("loading resource from path {}", path.pretty()))?;
        crate::yaml::from_reader(file)
            .with_context(|| format!("parsing resource at {}", path.pretty()))
    }

    /// An otherwise empty resource with only its identity filled in.
    pub fn new(gvk: Gvk, name: impl Into<Str>) -> Self {
        let mut resource = Resource {
            id: ResId { gvk, name: Str::default(), namespace: None },
            root: Object::new(),
        };
        resource.set_name(name);
        resource
    }

    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        let Value::Object(mut root) = value else {
            bail!("resource must be a mapping, found `{value}`");
        };

        let api_version = match root.shift_remove("apiVersion") {
            Some(Value::String(api_version)) => api_version,
            _ => bail!("resource is missing a string `apiVersion`"),
        };

        let kind = match root.shift_remove("kind") {
            Some(Value::String(kind)) => kind,
            _ => bail!("resource is missing a string `kind`"),
        };

        let metadata = root.get("metadata").and_then(Value::as_object);
        let Some(name) = metadata.and_then(|m| m.get("name")).and_then(Value::as_str) else {
            bail!("resource of kind `{kind}` is missing `metadata.name`");
        };

        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(Str::from);

        let id = ResId { gvk: Gvk::new(&api_version, kind), name: name.into(), namespace };
        Ok(Resource { id, root })
    }

    pub fn to_value(&self) -> Value {
        let mut object = Object::with_capacity(self.root.len() + 2);
        object.insert("apiVersion".into(), Value::String(self.api_version().into()));
        object.insert("kind".into(), Value::String(self.kind().to_string()));
        object.extend(self.root.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(object)
    }

    pub fn id(&self) -> &ResId {
        &self.id
    }

    pub fn name(&self) -> &Str {
        &self.id.name
    }

    pub fn namespace(&self) -> Option<&Str> {
        self.id.namespace.as_ref()
    }

    pub fn gvk(&self) -> &Gvk {
        &self.id.gvk
    }

    pub fn api_version(&self) -> Str {
        self.id.gvk.api_version()
    }

    pub fn kind(&self) -> &Str {
        &self.id.kind
    }

    pub fn root(&self) -> &Object {
        &self.root
    }

    /// Mutable access to the document body.
    /// Edits to `metadata.name` or `metadata.namespace` only reach the id through
    /// [`Resource::sync_id`], prefer the dedicated setters.
    pub fn root_mut(&mut self) -> &mut Object {
        &mut self.root
    }

    /// Re-reads the name and namespace of the id from `metadata` after the body was edited.
    /// A name that was removed or emptied is restored.
    pub fn sync_id(&mut self) {
        let metadata = self.root.get("metadata").and_then(Value::as_object);
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(Str::from);
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(Str::from);

        match name {
            Some(name) => self.id.name = name,
            None => self.set_name(self.id.name.clone()),
        }
        self.id.namespace = namespace;
    }

    pub fn set_name(&mut self, name: impl Into<Str>) {
        let name = name.into();
        self.make_metadata_mut().set_name(name.as_str());
        self.id.name = name;
    }

    pub fn set_namespace(&mut self, namespace: Option<Str>) {
        self.make_metadata_mut().set_namespace(namespace.as_deref());
        self.id.namespace = namespace;
    }

    /// Appends `-<hash>` of the current content to the name.
    pub fn with_name_suffix_hash(mut self) -> anyhow::Result<Self> {
        let hash = self.shorthash()?;
        self.set_name(format_compact!("{}-{hash}", self.name()));
        Ok(self)
    }

    /// Looks up a dotted field reference (`spec.containers[0].image`) in the whole document.
    pub fn field(&self, path: &FieldRef) -> Option<Value> {
        match path.first_key() {
            Some("apiVersion" | "kind") => path.get(&self.to_value()).cloned(),
            _ => path.get_in_object(&self.root).cloned(),
        }
    }
}

impl Serialize for Resource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.root.len() + 2))?;
        map.serialize_entry("apiVersion", &self.api_version())?;
        map.serialize_entry("kind", self.kind())?;
        for (key, value) in &self.root {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Resource::from_value(value)
            .map_err(|err| serde::de::Error::custom(format!("parsing resource: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn id_tracks_api_version_and_metadata() -> anyhow::Result<()> {
        let resource: Resource = crate::yaml::from_str(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: prod
spec:
  replicas: 1
"#,
        )?;

        assert_eq!(resource.id().to_string(), "Deployment.v1.apps/web.prod");
        assert_eq!(resource.api_version(), "apps/v1");
        assert_eq!(resource.root().get("spec"), Some(&json!({"replicas": 1})));
        Ok(())
    }

    #[test]
    fn serializes_type_meta_first() -> anyhow::Result<()> {
        let mut resource = Resource::new(Gvk::new("v1", "ConfigMap"), "cm");
        resource.root_mut().insert("data".into(), json!({"a": "b"}));
        resource.set_namespace(Some("ns".into()));

        let yaml = crate::yaml::to_string(&resource)?;
        assert_eq!(
            yaml,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n  namespace: ns\ndata:\n  a: b\n"
        );
        Ok(())
    }

    #[test]
    fn set_name_updates_document_and_id() -> anyhow::Result<()> {
        let mut resource =
            Resource::from_value(json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "a"}}))?;
        resource.set_name("b");
        assert_eq!(resource.name(), "b");
        assert_eq!(resource.to_value()["metadata"]["name"], json!("b"));
        Ok(())
    }

    #[test]
    fn body_keeps_document_order() -> anyhow::Result<()> {
        let resource: Resource = crate::yaml::from_str(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\nimmutable: true\ndata:\n  a: b\n",
        )?;
        assert_eq!(resource.root().keys().collect::<Vec<_>>(), ["metadata", "immutable", "data"]);
        assert!(crate::yaml::to_string(&resource)?.starts_with("apiVersion: v1\nkind: ConfigMap\nmetadata:\n"));
        Ok(())
    }

    #[test]
    fn sync_id_follows_metadata_edits() -> anyhow::Result<()> {
        let mut resource = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "a", "namespace": "ns"}
        }))?;

        resource.root_mut()["metadata"]["name"] = json!("b");
        resource.root_mut()["metadata"].as_object_mut().expect("metadata").shift_remove("namespace");
        resource.sync_id();
        assert_eq!(resource.name(), "b");
        assert_eq!(resource.namespace(), None);

        resource.root_mut()["metadata"]["name"] = json!("");
        resource.sync_id();
        assert_eq!(resource.name(), "b");
        assert_eq!(resource.root()["metadata"]["name"], json!("b"));
        Ok(())
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = Resource::from_value(json!({"apiVersion": "v1", "kind": "Secret"})).unwrap_err();
        assert!(err.to_string().contains("metadata.name"), "{err}");
    }

    #[test]
    fn field_lookup() -> anyhow::Result<()> {
        let resource = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p"},
            "spec": {"containers": [{"name": "c", "image": "nginx"}]}
        }))?;

        let image: FieldRef = "spec.containers[0].image".parse()?;
        assert_eq!(resource.field(&image), Some(json!("nginx")));
        assert_eq!(resource.field(&"kind".parse()?), Some(json!("Pod")));
        assert_eq!(resource.field(&"spec.missing".parse()?), None);
        Ok(())
    }
}
