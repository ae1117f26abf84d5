use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::Context;
use serde::Deserialize;

use crate::{PathExt, fieldspec::FieldSpec};

use super::{Gvk, GvkMatcher};

const REFSPECS: &str = include_str!("./refspecs.yaml");

#[derive(Debug, Clone)]
pub struct RefSpecs {
    // naive implementation, since the list is probably small
    specs: Vec<RefSpec>,
}

impl RefSpecs {
    pub fn load_builtin() -> &'static Self {
        static INSTANCE: OnceLock<RefSpecs> = OnceLock::new();
        INSTANCE.get_or_init(|| RefSpecs {
            specs: serde_yaml::from_str(REFSPECS).expect("valid refspecs.yaml"),
        })
    }

    /// The builtin specs extended with the `nameReference` entries of kustomize
    /// transformer configuration files, resolved relative to `root`.
    pub fn with_configurations(root: &Path, files: &[PathBuf]) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct TransformerConfig {
            #[serde(default)]
            name_reference: Vec<RefSpec>,
        }

        let mut refspecs = Self::load_builtin().clone();
        for file in files {
            let path = root.join(file);
            let config: TransformerConfig = crate::load_yaml(&path)
                .with_context(|| format!("loading name references from {}", path.pretty()))?;
            refspecs.specs.extend(config.name_reference);
        }
        Ok(refspecs)
    }

    pub fn referrers(&self, gvk: &Gvk) -> impl Iterator<Item = &FieldSpec> {
        self.specs
            .iter()
            .filter(move |spec| spec.referee.matches(gvk))
            .flat_map(|spec| &spec.referrers)
    }
}

/// A description of how resources of one type refer to resources of another type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefSpec {
    /// The type of the resource that is referred to by the referrers.
    #[serde(flatten)]
    pub referee: GvkMatcher,
    /// The fields that contain the reference to the referee.
    #[serde(rename = "fieldSpecs", alias = "referrers", default)]
    pub referrers: Vec<FieldSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_refspecs_valid() {
        let secret = Gvk::new("v1", "Secret");
        let paths = RefSpecs::load_builtin()
            .referrers(&secret)
            .map(|spec| spec.path.to_string())
            .collect::<Vec<_>>();
        assert!(paths.contains(&"spec/template/spec/volumes/secret/secretName".to_string()));
        assert!(paths.contains(&"spec/tls/secretName".to_string()));
    }

    #[test]
    fn configurations_extend_builtin() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("refs.yaml"),
            r#"
nameReference:
  - kind: Secret
    fieldSpecs:
      - kind: MyCustom
        path: spec/credentials
"#,
        )?;

        let refspecs = RefSpecs::with_configurations(dir.path(), &["refs.yaml".into()])?;
        let custom = refspecs
            .referrers(&Gvk::new("v1", "Secret"))
            .filter(|spec| spec.matcher.kind.as_deref() == Some("MyCustom"))
            .count();
        assert_eq!(custom, 1);
        Ok(())
    }
}
