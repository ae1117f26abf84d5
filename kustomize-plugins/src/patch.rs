use anyhow::{Context as _, bail};
use json_patch::Patch as JsonPatch;
use serde_json::{Value, map::Entry};

use crate::resource::{Object, Resource};

const DIRECTIVE: &str = "$patch";

/// A patch document as found in a patch file or inline in a plugin configuration.
#[derive(Debug, Clone)]
pub enum Patch {
    StrategicMerge(Resource),
    Json(JsonPatch),
}

impl Patch {
    /// A YAML sequence is a JSON 6902 patch, a mapping with `kind` a strategic merge patch.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let value: Value = crate::yaml::from_str(s).context("patch is not valid YAML")?;
        match value {
            Value::Array(_) => Ok(Patch::Json(
                serde_json::from_value(value).context("parsing JSON 6902 patch")?,
            )),
            Value::Object(obj) if obj.contains_key("kind") => Ok(Patch::StrategicMerge(
                Resource::from_value(Value::Object(obj)).context("parsing strategic merge patch")?,
            )),
            _ => bail!("patch must be a JSON 6902 operation list or a strategic merge patch"),
        }
    }

    pub fn apply(&self, resource: Resource) -> anyhow::Result<Resource> {
        match self {
            Patch::StrategicMerge(patch) => {
                let mut resource = resource;
                strategic_merge(&mut resource, patch.clone())?;
                Ok(resource)
            }
            Patch::Json(patch) => apply_json_patch(resource, patch),
        }
    }
}

/// Applies an RFC 6902 patch, rebuilding the resource so changes to its identity are honoured.
#[tracing::instrument(skip_all, fields(resource = %resource.id()))]
pub fn apply_json_patch(resource: Resource, patch: &JsonPatch) -> anyhow::Result<Resource> {
    let id = resource.id().clone();
    let mut value = resource.to_value();
    json_patch::patch(&mut value, &patch.0)
        .with_context(|| format!("applying json patch to resource `{id}`"))?;
    Resource::from_value(value)
}

#[tracing::instrument(skip_all, fields(resource = %base.id()))]
pub fn strategic_merge(base: &mut Resource, patch: Resource) -> anyhow::Result<()> {
    let mut patch_root = patch.root().clone();

    if let Some(Value::Object(metadata)) = patch_root.get_mut("metadata") {
        // Don't want to overwrite the name and namespace of the base resource using the patch.
        metadata.shift_remove("name");
        metadata.shift_remove("namespace");
    }

    if directive(&patch_root) == Some("delete") {
        bail!("`$patch: delete` of a whole resource is not supported");
    }

    merge_obj(base.root_mut(), patch_root);
    Ok(())
}

fn directive(obj: &Object) -> Option<&str> {
    obj.get(DIRECTIVE).and_then(Value::as_str)
}

fn merge_obj(base: &mut Object, mut patch: Object) {
    if directive(&patch) == Some("replace") {
        patch.shift_remove(DIRECTIVE);
        *base = patch;
        return;
    }

    for (key, value) in patch {
        if key.starts_with('$') {
            continue;
        }

        match value {
            Value::Null => drop(base.shift_remove(&key)),
            Value::Object(ref obj) if directive(obj) == Some("delete") => drop(base.shift_remove(&key)),
            mut value => match base.entry(key) {
                Entry::Vacant(entry) => {
                    strip_directives(&mut value);
                    entry.insert(value);
                }
                Entry::Occupied(entry) => {
                    let field = entry.key().clone();
                    merge(entry.into_mut(), value, &field)
                }
            },
        }
    }
}

fn merge(base: &mut Value, patch: Value, field: &str) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => merge_obj(base, patch),
        (Value::Array(base), Value::Array(patch)) => merge_list(base, patch, field),
        (base, mut patch) => {
            strip_directives(&mut patch);
            *base = patch
        }
    }
}

fn merge_list(bases: &mut Vec<Value>, patches: Vec<Value>, field: &str) {
    let replace = patches
        .iter()
        .any(|p| p.as_object().is_some_and(|o| directive(o) == Some("replace")));

    let mut patches = patches
        .into_iter()
        .filter(|p| !p.as_object().is_some_and(|o| o.len() == 1 && o.contains_key(DIRECTIVE)))
        .collect::<Vec<_>>();

    let key = merge_key(field, &patches).filter(|_| !replace);
    let Some(key) = key else {
        patches.iter_mut().for_each(strip_directives);
        *bases = patches;
        return;
    };

    for patch in patches {
        let Value::Object(patch) = patch else { continue };
        let position = bases.iter().position(|base| base.get(key) == patch.get(key));
        let delete = directive(&patch) == Some("delete");
        match (position, delete) {
            (Some(pos), true) => drop(bases.remove(pos)),
            (None, true) => {}
            (Some(pos), _) => {
                if let Value::Object(base) = &mut bases[pos] {
                    merge_obj(base, patch);
                }
            }
            (None, _) => {
                let mut patch = Value::Object(patch);
                strip_directives(&mut patch);
                bases.push(patch);
            }
        }
    }
}

/// The merge key of well-known Kubernetes lists. Lists without one are replaced.
fn merge_key(field: &str, patches: &[Value]) -> Option<&'static str> {
    let key = match field {
        "containers" | "initContainers" | "ephemeralContainers" | "env" | "volumes"
        | "imagePullSecrets" => "name",
        "volumeMounts" => "mountPath",
        "volumeDevices" => "devicePath",
        "hostAliases" => "ip",
        "ports" if patches.iter().any(|p| p.get("containerPort").is_some()) => "containerPort",
        "ports" => "port",
        _ => return None,
    };

    patches.iter().all(|p| p.get(key).is_some()).then_some(key)
}

fn strip_directives(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            obj.retain(|key, _| !key.starts_with('$'));
            obj.values_mut().for_each(strip_directives);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_directives),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn deployment() -> anyhow::Result<Resource> {
        crate::yaml::from_str(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app: web
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: app
          image: app:1
          env:
            - name: A
              value: "1"
        - name: sidecar
          image: sidecar:1
"#,
        )
    }

    #[test]
    fn strategic_merge_by_name() -> anyhow::Result<()> {
        let patch = Patch::parse(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: ignored
  labels:
    app: null
    tier: front
spec:
  template:
    spec:
      containers:
        - name: app
          image: app:2
          env:
            - name: B
              value: "2"
        - name: sidecar
          $patch: delete
"#,
        )?;

        let resource = patch.apply(deployment()?)?;
        assert_eq!(resource.name(), "web");
        assert_eq!(resource.root()["metadata"]["labels"], json!({"tier": "front"}));
        assert_eq!(
            resource.root()["spec"]["template"]["spec"]["containers"],
            json!([{
                "name": "app",
                "image": "app:2",
                "env": [{"name": "A", "value": "1"}, {"name": "B", "value": "2"}]
            }])
        );
        Ok(())
    }

    #[test]
    fn unkeyed_lists_and_replace_directive() -> anyhow::Result<()> {
        let mut resource = deployment()?;
        let patch: Resource = crate::yaml::from_str(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      $patch: replace
      args: [a, b]
"#,
        )?;
        strategic_merge(&mut resource, patch)?;
        assert_eq!(resource.root()["spec"]["template"]["spec"], json!({"args": ["a", "b"]}));
        assert_eq!(resource.root()["spec"]["replicas"], json!(1));
        Ok(())
    }

    #[test]
    fn json_patch_can_rename() -> anyhow::Result<()> {
        let patch = Patch::parse(
            r#"
- op: replace
  path: /metadata/name
  value: api
- op: add
  path: /spec/replicas
  value: 3
"#,
        )?;

        let resource = patch.apply(deployment()?)?;
        assert_eq!(resource.name(), "api");
        assert_eq!(resource.root()["spec"]["replicas"], json!(3));
        Ok(())
    }

    #[test]
    fn patch_kind_detection() {
        assert!(Patch::parse("foo: bar").is_err());
        assert!(Patch::parse("- op: bogus\n  path: /x").is_err());
    }
}
