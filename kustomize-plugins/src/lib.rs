//! Configuration transformers and generators for kustomize, in the `qlik.com/v1` group.
//!
//! Every plugin is configured from a YAML document and then either transforms a
//! [`ResourceMap`](resmap::ResourceMap) or generates one. [`plugin::Plugin`] maps a
//! configuration document's `kind` to the implementation.

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

pub mod exec;
pub mod fieldspec;
pub mod generator;
pub mod manifest;
pub mod merge;
pub mod patch;
pub mod plugin;
pub mod refvar;
pub mod reslist;
pub mod resmap;
pub mod resource;
pub mod sed;
pub mod selector;
pub mod transform;
pub mod yaml;

mod serde_ex;

pub use self::plugin::{Mode, Plugin, PluginContext};
pub use self::resmap::ResourceMap;
pub use self::resource::Resource;

pub trait PathExt {
    fn pretty(&self) -> std::path::Display<'_>;
}

impl<P: AsRef<Path> + ?Sized> PathExt for P {
    fn pretty(&self) -> std::path::Display<'_> {
        self.as_ref().display()
    }
}

/// Reads and deserializes a single YAML document from `path`.
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening {}", path.pretty()))?;
    yaml::from_reader(file).with_context(|| format!("parsing yaml at {}", path.pretty()))
}
