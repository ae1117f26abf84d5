pub mod common;
mod configmap;
mod helm_chart;
mod secret;

pub use self::configmap::{ConfigMapGeneratorPlus, ConfigMapGeneratorPlusConfig};
pub use self::helm_chart::{HelmChart, HelmChartConfig};
pub use self::secret::{SecretGeneratorPlus, SecretGeneratorPlusConfig};

use crate::resmap::ResourceMap;

#[async_trait::async_trait]
pub trait Generator {
    async fn generate(&mut self) -> anyhow::Result<ResourceMap>;
}
