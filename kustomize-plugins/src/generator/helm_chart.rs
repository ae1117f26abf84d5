use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::{
    PathExt, exec,
    manifest::{PluginMeta, Str},
    plugin::PluginContext,
    resmap::ResourceMap,
    resource::Object,
};

use super::Generator;

pub const DEFAULT_HELM_BIN: &str = "helm";
pub const DEFAULT_CHART_REPO: &str = "https://kubernetes-charts.storage.googleapis.com";
pub const DEFAULT_RELEASE_NAME: &str = "release-name";
pub const DEFAULT_RELEASE_NAMESPACE: &str = "default";

const HELM_OUTPUT: &str = "helmoutput.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartConfig {
    #[serde(flatten)]
    pub meta: PluginMeta,
    pub chart_name: Str,
    #[serde(default)]
    pub chart_home: Option<PathBuf>,
    #[serde(default)]
    pub chart_version: Option<Str>,
    #[serde(default)]
    pub chart_repo: Option<Str>,
    /// An additional values file passed after the inline `values`.
    #[serde(default)]
    pub values_from: Option<PathBuf>,
    #[serde(default)]
    pub values: Object,
    #[serde(default)]
    pub helm_home: Option<PathBuf>,
    #[serde(default)]
    pub helm_bin: Option<PathBuf>,
    #[serde(default)]
    pub release_name: Option<Str>,
    #[serde(default)]
    pub release_namespace: Option<Str>,
    /// Whitespace separated arguments appended to `helm template`.
    #[serde(default)]
    pub extra_args: Option<String>,
    /// A kustomization directory, relative to the chart, run over the rendered chart.
    #[serde(default)]
    pub chart_patches: Option<PathBuf>,
    /// The kustomize used for `chartPatches`.
    #[serde(default)]
    pub kustomize_bin: Option<PathBuf>,
}

/// Renders a helm chart, fetching it first when it is not on disk.
#[derive(Debug)]
pub struct HelmChart {
    root: PathBuf,
    config: HelmChartConfig,
}

// Values such as `null` in the YAML are treated as unset.
fn given<T: AsRef<str>>(value: &Option<T>) -> Option<&str> {
    value.as_ref().map(|v| v.as_ref()).filter(|v| !v.is_empty() && *v != "null")
}

fn given_path(value: &Option<PathBuf>) -> Option<&Path> {
    value.as_deref().filter(|p| !p.as_os_str().is_empty() && *p != Path::new("null"))
}

impl HelmChart {
    pub fn new(config: HelmChartConfig, ctx: &PluginContext) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.chart_name.is_empty(), "HelmChart requires a `chartName`");
        Ok(Self { root: ctx.root.clone(), config })
    }

    fn helm_bin(&self) -> &Path {
        given_path(&self.config.helm_bin).unwrap_or(Path::new(DEFAULT_HELM_BIN))
    }

    fn kustomize_bin(&self) -> &Path {
        given_path(&self.config.kustomize_bin).unwrap_or(Path::new(exec::KUSTOMIZE_BIN))
    }

    fn helm(&self, helm_home: &Path) -> Command {
        let mut cmd = Command::new(self.helm_bin());
        cmd.env("HELM_CACHE_HOME", helm_home.join("cache"))
            .env("HELM_CONFIG_HOME", helm_home.join("config"))
            .env("HELM_DATA_HOME", helm_home.join("data"));
        cmd
    }

    fn fetch_command(&self, helm_home: &Path, untar_dir: &Path) -> Command {
        let mut cmd = self.helm(helm_home);
        cmd.arg("pull")
            .arg(self.config.chart_name.as_str())
            .arg("--repo")
            .arg(given(&self.config.chart_repo).unwrap_or(DEFAULT_CHART_REPO))
            .arg("--untar")
            .arg("--untardir")
            .arg(untar_dir);
        if let Some(version) = given(&self.config.chart_version) {
            cmd.arg("--version").arg(version);
        }
        cmd
    }

    fn template_command(&self, helm_home: &Path, chart_home: &Path, values_file: &Path) -> Command {
        let mut cmd = self.helm(helm_home);
        cmd.arg("template")
            .arg(given(&self.config.release_name).unwrap_or(DEFAULT_RELEASE_NAME))
            .arg(chart_home)
            .arg("--namespace")
            .arg(given(&self.config.release_namespace).unwrap_or(DEFAULT_RELEASE_NAMESPACE))
            .arg("--values")
            .arg(values_file);

        if let Some(extra_args) = given(&self.config.extra_args) {
            cmd.args(extra_args.split_whitespace());
        }

        if let Some(values_from) = given_path(&self.config.values_from) {
            cmd.arg("--values").arg(self.root.join(values_from));
        }
        cmd
    }

    #[tracing::instrument(skip_all)]
    async fn fetch(&self, helm_home: &Path, chart_home: &Path) -> anyhow::Result<()> {
        let untar_dir = tempfile::tempdir().context("creating chart download directory")?;
        exec::run(&mut self.fetch_command(helm_home, untar_dir.path()), None)
            .await
            .with_context(|| format!("fetching chart `{}`", self.config.chart_name))?;
        exec::copy_dir(&untar_dir.path().join(self.config.chart_name.as_str()), chart_home)
    }

    #[tracing::instrument(skip_all)]
    async fn template(&self, helm_home: &Path, chart_home: &Path) -> anyhow::Result<String> {
        let values_file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .context("creating values file")?;
        std::fs::write(values_file.path(), crate::yaml::to_string(&self.config.values)?)
            .context("writing values file")?;

        let output =
            exec::run(&mut self.template_command(helm_home, chart_home, values_file.path()), None)
                .await
                .with_context(|| format!("templating chart `{}`", self.config.chart_name))?;
        String::from_utf8(output).context("helm output is not valid utf-8")
    }
}

#[async_trait::async_trait]
impl Generator for HelmChart {
    #[tracing::instrument(skip_all, name = "helm_chart")]
    async fn generate(&mut self) -> anyhow::Result<ResourceMap> {
        let tmp = tempfile::tempdir().context("creating helm working directory")?;
        let helm_home = match given_path(&self.config.helm_home) {
            Some(helm_home) => self.root.join(helm_home),
            None => tmp.path().join("dotHelm"),
        };
        let chart_home = match given_path(&self.config.chart_home) {
            Some(chart_home) => self.root.join(chart_home),
            None => tmp.path().join(self.config.chart_name.as_str()),
        };

        if !chart_home.exists() {
            self.fetch(&helm_home, &chart_home).await?;
        }

        delete_requirements(&chart_home)?;
        let rendered = self.template(&helm_home, &chart_home).await?;

        match given_path(&self.config.chart_patches) {
            Some(patches) => {
                let dir = chart_home.join(patches);
                write_helm_output(&dir, &rendered)?;
                exec::kustomize_build(self.kustomize_bin(), &dir).await
            }
            None => ResourceMap::from_yaml_stream(&rendered).context("parsing helm output"),
        }
    }
}

/// Removes `requirements.*` so helm does not try to resolve chart dependencies.
fn delete_requirements(chart_home: &Path) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(chart_home)
        .with_context(|| format!("listing chart directory {}", chart_home.pretty()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && path.file_stem().is_some_and(|stem| stem == "requirements") {
            tracing::debug!(path = %path.pretty(), "removing chart requirements");
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.pretty()))?;
        }
    }
    Ok(())
}

/// Writes the rendered chart next to the patch kustomization and makes it the only resource.
fn write_helm_output(dir: &Path, rendered: &str) -> anyhow::Result<()> {
    let kustomization_path = dir.join("kustomization.yaml");
    let mut kustomization: Object = crate::load_yaml(&kustomization_path)?;

    std::fs::write(dir.join(HELM_OUTPUT), rendered)
        .with_context(|| format!("writing helm output to {}", dir.pretty()))?;

    kustomization.insert("resources".into(), Value::Array(vec![Value::String(HELM_OUTPUT.into())]));
    std::fs::write(&kustomization_path, crate::yaml::to_string(&kustomization)?)
        .with_context(|| format!("writing {}", kustomization_path.pretty()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;

    fn args(cmd: &Command) -> Vec<&OsStr> {
        cmd.as_std().get_args().collect()
    }

    #[test]
    fn template_arguments() -> anyhow::Result<()> {
        let config: HelmChartConfig = crate::yaml::from_str(
            r#"
apiVersion: qlik.com/v1
kind: HelmChart
metadata:
  name: redis
chartName: redis
releaseName: cache
releaseNamespace: "null"
extraArgs: --include-crds --skip-tests
valuesFrom: values.yaml
"#,
        )?;
        let chart = HelmChart::new(config, &PluginContext::new("/work"))?;
        let cmd = chart.template_command(Path::new("/h"), Path::new("/charts/redis"), Path::new("/v.yaml"));

        assert_eq!(cmd.as_std().get_program(), "helm");
        assert_eq!(
            args(&cmd),
            [
                "template", "cache", "/charts/redis", "--namespace", "default", "--values", "/v.yaml",
                "--include-crds", "--skip-tests", "--values", "/work/values.yaml"
            ]
        );
        Ok(())
    }

    #[test]
    fn fetch_arguments_use_defaults() -> anyhow::Result<()> {
        let config = HelmChartConfig {
            chart_name: "redis".into(),
            chart_version: Some("1.2.3".into()),
            helm_bin: Some("/usr/bin/helm3".into()),
            ..Default::default()
        };
        let chart = HelmChart::new(config, &PluginContext::new("/work"))?;
        let cmd = chart.fetch_command(Path::new("/h"), Path::new("/untar"));

        assert_eq!(cmd.as_std().get_program(), "/usr/bin/helm3");
        assert_eq!(
            args(&cmd),
            [
                "pull", "redis", "--repo", DEFAULT_CHART_REPO, "--untar", "--untardir", "/untar",
                "--version", "1.2.3"
            ]
        );
        Ok(())
    }

    #[test]
    fn chart_name_is_required() {
        assert!(HelmChart::new(HelmChartConfig::default(), &PluginContext::new(".")).is_err());
    }

    #[test]
    fn requirements_are_deleted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("requirements.yaml"), "")?;
        std::fs::write(dir.path().join("requirements.lock"), "")?;
        std::fs::write(dir.path().join("Chart.yaml"), "")?;
        std::fs::create_dir(dir.path().join("requirements"))?;

        delete_requirements(dir.path())?;

        let mut remaining = std::fs::read_dir(dir.path())?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        remaining.sort();
        assert_eq!(remaining, ["Chart.yaml", "requirements"]);
        Ok(())
    }

    #[test]
    fn patch_kustomization_points_at_helm_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("kustomization.yaml"),
            "resources:\n  - old.yaml\npatchesStrategicMerge:\n  - patch.yaml\n",
        )?;

        write_helm_output(dir.path(), "kind: ConfigMap\n")?;

        let kustomization: Object = crate::load_yaml(dir.path().join("kustomization.yaml"))?;
        assert_eq!(kustomization["resources"], serde_json::json!([HELM_OUTPUT]));
        assert_eq!(kustomization["patchesStrategicMerge"], serde_json::json!(["patch.yaml"]));
        assert_eq!(std::fs::read_to_string(dir.path().join(HELM_OUTPUT))?, "kind: ConfigMap\n");
        Ok(())
    }

    /// `pull` unpacks a chart with a `requirements.yaml`; `template` refuses charts that still
    /// have one and renders a ConfigMap carrying the `greeting` value.
    #[cfg(unix)]
    const FAKE_HELM: &str = r#"
[ -n "$HELM_CACHE_HOME" ]
cmd="$1"; shift
case "$cmd" in
  pull)
    chart="$1"
    while [ $# -gt 0 ]; do
      if [ "$1" = --untardir ]; then dir="$2"; fi
      shift
    done
    mkdir -p "$dir/$chart/templates"
    printf 'name: %s\n' "$chart" > "$dir/$chart/Chart.yaml"
    printf 'dependencies: []\n' > "$dir/$chart/requirements.yaml"
    ;;
  template)
    release="$1"; chart="$2"; shift 2
    while [ $# -gt 0 ]; do
      case "$1" in
        --namespace) ns="$2"; shift ;;
        --values) values="$2"; shift ;;
      esac
      shift
    done
    [ -f "$chart/Chart.yaml" ]
    [ ! -e "$chart/requirements.yaml" ]
    greeting=$(sed -n 's/^greeting: //p' "$values")
    printf 'apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: %s-config\n  namespace: %s\ndata:\n  greeting: %s\n' "$release" "$ns" "$greeting"
    ;;
  *) exit 1 ;;
esac
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn fetches_and_templates_missing_chart() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let helm = exec::fake_bin(root.path(), "helm", FAKE_HELM)?;

        let config: HelmChartConfig = crate::yaml::from_str(&format!(
            r#"
apiVersion: qlik.com/v1
kind: HelmChart
metadata:
  name: cache
chartName: redis
chartVersion: 1.0.0
releaseName: cache
releaseNamespace: apps
helmBin: {}
values:
  greeting: hello
"#,
            helm.display()
        ))?;

        let resources = HelmChart::new(config, &PluginContext::new(root.path()))?.generate().await?;

        assert_eq!(resources.len(), 1);
        let cm = resources.find("ConfigMap", "cache-config").expect("rendered by helm template");
        assert_eq!(cm.namespace().map(|ns| ns.as_str()), Some("apps"));
        assert_eq!(cm.root()["data"]["greeting"], "hello");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chart_patches_run_over_rendered_chart() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let chart = root.path().join("charts/web");
        std::fs::create_dir_all(chart.join("patches"))?;
        std::fs::write(chart.join("Chart.yaml"), "name: web\n")?;
        std::fs::write(chart.join("requirements.yaml"), "dependencies: []\n")?;
        std::fs::write(chart.join("patches/kustomization.yaml"), "resources: []\n")?;

        let helm = exec::fake_bin(root.path(), "helm", FAKE_HELM)?;
        let kustomize = exec::fake_bin(
            root.path(),
            "kustomize",
            r#"
[ "$1" = build ]
grep -q helmoutput.yaml "$2/kustomization.yaml"
sed 's/greeting: hello/greeting: patched/' "$2/helmoutput.yaml"
"#,
        )?;

        let config: HelmChartConfig = crate::yaml::from_str(&format!(
            r#"
apiVersion: qlik.com/v1
kind: HelmChart
metadata:
  name: web
chartName: web
chartHome: charts/web
chartPatches: patches
helmBin: {}
kustomizeBin: {}
values:
  greeting: hello
"#,
            helm.display(),
            kustomize.display()
        ))?;

        let resources = HelmChart::new(config, &PluginContext::new(root.path()))?.generate().await?;

        let cm = resources.find("ConfigMap", "release-name-config").expect("rendered and patched");
        assert_eq!(cm.namespace().map(|ns| ns.as_str()), Some(DEFAULT_RELEASE_NAMESPACE));
        assert_eq!(cm.root()["data"]["greeting"], "patched");
        assert!(!chart.join("requirements.yaml").exists());
        assert!(chart.join("patches").join(HELM_OUTPUT).exists());
        Ok(())
    }
}
