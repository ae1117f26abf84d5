use anyhow::{anyhow, bail};
use serde_json::Value;

use crate::{
    manifest::Str,
    resmap::ResourceMap,
    resource::{Object, RefSpecs, ResId},
};

use super::Transformer;

/// A resource that was renamed from `id.name` to `new_name`.
#[derive(Debug, Clone)]
pub struct Rename {
    id: ResId,
    new_name: Str,
}

impl Rename {
    pub fn new(id: ResId, new_name: impl Into<Str>) -> anyhow::Result<Self> {
        let new_name = new_name.into();
        if new_name.is_empty() {
            bail!("cannot rename `{id}` to an empty name");
        }
        Ok(Self { id, new_name })
    }
}

/// Rewrites every name reference to a renamed resource.
pub struct RenameTransformer<'a> {
    ref_specs: &'a RefSpecs,
    renames: &'a [Rename],
}

impl<'a> RenameTransformer<'a> {
    pub fn new(ref_specs: &'a RefSpecs, renames: &'a [Rename]) -> Self {
        Self { ref_specs, renames }
    }
}

#[async_trait::async_trait]
impl Transformer for RenameTransformer<'_> {
    #[tracing::instrument(skip_all)]
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()> {
        for rename in self.renames {
            self.apply_rename(rename, resources)?;
        }
        Ok(())
    }
}

impl RenameTransformer<'_> {
    fn apply_rename(&self, rename: &Rename, resources: &mut ResourceMap) -> anyhow::Result<()> {
        for referrer_spec in self.ref_specs.referrers(&rename.id.gvk) {
            for resource in resources.iter_mut() {
                if !same_namespace(resource.namespace(), rename.id.namespace.as_ref()) {
                    continue;
                }

                let referrer_namespace = resource.namespace().cloned();
                referrer_spec.apply::<Value>(resource, &mut |reference| {
                    update_reference(reference, rename, referrer_namespace.as_ref())
                })?;
            }
        }

        tracing::debug!(id = %rename.id, new_name = %rename.new_name, "rewrote references");
        Ok(())
    }
}

fn update_reference(
    reference: &mut Value,
    rename: &Rename,
    referrer_namespace: Option<&Str>,
) -> anyhow::Result<()> {
    match reference {
        Value::String(name) => {
            if name == rename.id.name.as_str() {
                *name = rename.new_name.to_string();
            }
        }
        Value::Object(reference) => {
            if reference_matches(reference, &rename.id, referrer_namespace)? {
                reference.insert("name".to_string(), Value::String(rename.new_name.to_string()));
            }
        }
        other => bail!(
            "expected a name reference to be a string or a mapping but found {}",
            crate::fieldspec::type_name(other)
        ),
    }
    Ok(())
}

/// An object reference (`{kind?, name, namespace?}`) without a namespace points into the
/// namespace of the resource holding it.
fn reference_matches(
    reference: &Object,
    id: &ResId,
    referrer_namespace: Option<&Str>,
) -> anyhow::Result<bool> {
    let name = reference
        .get("name")
        .ok_or_else(|| anyhow!("reference object missing `name`"))?
        .as_str()
        .ok_or_else(|| anyhow!("reference `name` is not a string"))?;

    let kind = reference.get("kind").and_then(Value::as_str);
    let namespace = match reference.get("namespace").and_then(Value::as_str) {
        Some(namespace) => Some(Str::from(namespace)),
        None => referrer_namespace.cloned(),
    };

    Ok(name == id.name
        && kind.is_none_or(|kind| kind == id.gvk.kind)
        && same_namespace(namespace.as_ref(), id.namespace.as_ref()))
}

// A missing namespace matches any namespace, kustomize may still place the resource.
fn same_namespace(a: Option<&Str>, b: Option<&Str>) -> bool {
    let is_default = |ns: &Str| ns.is_empty() || ns == "default";
    match (a, b) {
        (Some(a), Some(b)) => a == b || (is_default(a) && is_default(b)),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCES: &str = r#"
apiVersion: v1
kind: Secret
metadata:
  name: creds
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      volumes:
        - name: creds
          secret:
            secretName: creds
        - name: other
          secret:
            secretName: unrelated
      containers:
        - name: app
          env:
            - name: PASSWORD
              valueFrom:
                secretKeyRef:
                  name: creds
                  key: password
          envFrom:
            - secretRef:
                name: creds
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: creds
"#;

    #[tokio::test]
    async fn rewrites_string_and_object_references() -> anyhow::Result<()> {
        let mut resources = ResourceMap::from_yaml_stream(RESOURCES)?;
        let id = resources.find("Secret", "creds").map(|r| r.id().clone()).expect("secret exists");
        let new_id = resources.rename(&id, "creds-abc")?;
        let renames = [Rename::new(id, new_id.name.clone())?];

        RenameTransformer::new(RefSpecs::load_builtin(), &renames).transform(&mut resources).await?;

        let deployment = resources.find("Deployment", "web").expect("deployment exists");
        let spec = &deployment.root()["spec"]["template"]["spec"];
        assert_eq!(spec["volumes"][0]["secret"]["secretName"], "creds-abc");
        assert_eq!(spec["volumes"][1]["secret"]["secretName"], "unrelated");
        assert_eq!(spec["containers"][0]["env"][0]["valueFrom"]["secretKeyRef"]["name"], "creds-abc");
        assert_eq!(spec["containers"][0]["envFrom"][0]["secretRef"]["name"], "creds-abc");
        assert!(resources.find("ConfigMap", "creds").is_some());
        Ok(())
    }

    #[test]
    fn namespaces_must_agree() {
        let prod = Str::from("prod");
        let dev = Str::from("dev");
        assert!(same_namespace(Some(&prod), Some(&prod)));
        assert!(same_namespace(None, Some(&prod)));
        assert!(!same_namespace(Some(&dev), Some(&prod)));
        assert!(same_namespace(Some(&"default".into()), None));
    }

    #[test]
    fn empty_new_name_is_rejected() {
        let id = crate::resource::Resource::new(crate::resource::Gvk::new("v1", "Secret"), "s").id().clone();
        assert!(Rename::new(id, "").is_err());
    }
}
