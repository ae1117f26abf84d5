mod chart_home;
mod env_upsert;
mod full_path;
mod gomplate;
mod helm_values;
mod refs;
mod secret_hash;
mod sed_on_path;
mod selective_patch;
mod super_vars;
mod supermap;
mod values_file;

pub use self::chart_home::{ChartHomeFullPath, ChartHomeFullPathConfig};
pub use self::env_upsert::{EnvUpsert, EnvUpsertConfig, EnvVar};
pub use self::full_path::{FullPath, FullPathConfig};
pub use self::gomplate::{Gomplate, GomplateConfig};
pub use self::helm_values::{HelmValues, HelmValuesConfig};
pub use self::refs::{Rename, RenameTransformer};
pub use self::secret_hash::{SecretHashTransformer, SecretHashTransformerConfig};
pub use self::sed_on_path::{SedOnPath, SedOnPathConfig};
pub use self::selective_patch::{SelectivePatch, SelectivePatchConfig};
pub use self::super_vars::{SuperVars, SuperVarsConfig, Var};
pub use self::supermap::{SuperConfigMapConfig, SuperMap, SuperMapArgs, SuperSecretConfig};
pub use self::values_file::{ValuesFile, ValuesFileConfig};

use crate::resmap::ResourceMap;

#[async_trait::async_trait]
pub trait Transformer {
    async fn transform(&mut self, resources: &mut ResourceMap) -> anyhow::Result<()>;
}
