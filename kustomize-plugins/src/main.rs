use std::{
    io::{Read as _, Write as _},
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Parser;
use kustomize_plugins::{Mode, PathExt, Plugin, PluginContext, ResourceMap, reslist::ResourceList};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "KUSTOMIZE_PLUGINS_LOG";
const DEFAULT_LOG_FILTER: &str = "kustomize_plugins=warn";

#[derive(Parser)]
#[clap(version, about)]
struct Args {
    /// Directory relative paths in plugin configurations are resolved against.
    /// Defaults to the working directory, which kustomize sets to the kustomization root.
    #[clap(long, global = true, env = "KUSTOMIZE_PLUGIN_CONFIG_ROOT")]
    root: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Run as a KRM function, reading a ResourceList from stdin.
    Fn {
        #[clap(long, value_enum, default_value_t = Mode::Auto)]
        mode: Mode,
    },
    /// Run as an exec transformer plugin, reading resources from stdin.
    Transform { config: PathBuf },
    /// Run as an exec generator plugin.
    Generate { config: PathBuf },
}

fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).context("reading stdin")?;
    Ok(input)
}

fn plugin_root(root: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match root.filter(|root| !root.as_os_str().is_empty()) {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("reading the working directory"),
    }
}

/// Loads the plugin configured at `path`. kustomize writes exec plugin configs to a temporary
/// file, so `root` is unrelated to where the config lives.
fn load_plugin(path: &Path, root: PathBuf) -> anyhow::Result<Plugin> {
    let config: Value = kustomize_plugins::load_yaml(path)?;
    Plugin::load(config, &PluginContext::new(root))
        .with_context(|| format!("loading plugin from {}", path.pretty()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let root = plugin_root(args.root)?;
    tracing::debug!(root = %root.pretty(), "resolved plugin root");

    let mut stdout = std::io::stdout().lock();
    match args.command {
        Command::Fn { mode } => {
            let input: ResourceList = kustomize_plugins::yaml::from_str(&read_stdin()?)
                .context("parsing ResourceList from stdin")?;
            let config = input
                .function_config
                .clone()
                .context("ResourceList has no functionConfig")?;
            let mut plugin = Plugin::load(config, &PluginContext::new(root))?;
            let resources = plugin.run(mode, input.into_resource_map()?).await?;
            let output = ResourceList::from(resources);
            write!(stdout, "{}", kustomize_plugins::yaml::to_string(&output)?)?;
        }
        Command::Transform { config } => {
            let mut plugin = load_plugin(&config, root)?;
            let resources = ResourceMap::from_yaml_stream(&read_stdin()?)
                .context("parsing resources from stdin")?;
            let resources = plugin.run(Mode::Transform, resources).await?;
            write!(stdout, "{resources}")?;
        }
        Command::Generate { config } => {
            let mut plugin = load_plugin(&config, root)?;
            let resources = plugin.run(Mode::Generate, ResourceMap::new()).await?;
            write!(stdout, "{resources}")?;
        }
    }
    stdout.flush()?;

    Ok(())
}
