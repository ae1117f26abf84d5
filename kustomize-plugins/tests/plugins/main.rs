use std::path::Path;

use anyhow::Context;
use kustomize_plugins::{Mode, Plugin, PluginContext, ResourceMap};
use regex::Regex;
use serde_json::Value;

datatest_stable::harness! {
    { test = test, root = "tests/plugins/testdata", pattern = r".*/config.yaml" },
}

fn test(path: &Path) -> datatest_stable::Result<()> {
    let dir = path.parent().context("config has a parent directory")?.canonicalize()?;
    let dir = dir.as_path();
    let config: Value = kustomize_plugins::load_yaml(path)?;

    let input_path = dir.join("input.yaml");
    let input = match input_path.exists() {
        true => ResourceMap::from_yaml_stream(&std::fs::read_to_string(&input_path)?)?,
        false => ResourceMap::new(),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let output = runtime.block_on(async {
        let mut plugin = Plugin::load(config, &PluginContext::new(dir))?;
        plugin.run(Mode::Auto, input).await
    });

    match output {
        Ok(resources) => snapshot(&dir.join("expected.yaml"), &normalize(dir, &resources.to_string()))?,
        Err(err) => {
            eprintln!("Error running plugin at {}: {err:?}", path.display());
            return Err(err.into());
        }
    }
    Ok(())
}

/// Replaces machine specific paths: the case directory becomes `$ROOT` and temporary chart
/// homes become `$TMP`.
fn normalize(dir: &Path, output: &str) -> String {
    let temp_prefix = std::env::temp_dir().join("temp");
    let temp_homes = Regex::new(&format!("{}[[:alnum:]]+", regex::escape(&temp_prefix.to_string_lossy())))
        .expect("escaped path is a valid regex");
    let output = output.replace(&*dir.to_string_lossy(), "$ROOT");
    temp_homes.replace_all(&output, "$$TMP").into_owned()
}

/// Documents are compared as values so formatting differences are not failures.
fn snapshot(path: &Path, actual: &str) -> datatest_stable::Result<()> {
    if !path.exists() || std::env::var("UPDATE_SNAPSHOTS").is_ok() {
        std::fs::write(path, actual).context("writing snapshot")?;
        return Ok(());
    }

    let expected = std::fs::read_to_string(path).context("reading snapshot")?;
    let parse = kustomize_plugins::yaml::from_str_multi::<Value>;
    if parse(&expected)? == parse(actual)? {
        return Ok(());
    }

    let formatted = format_chunks(dissimilar::diff(&expected, actual));
    eprintln!("Snapshot mismatch for {}:\n{}", path.display(), formatted);

    Err(format!("Snapshot mismatch for {}", path.display()).into())
}

fn format_chunks(chunks: Vec<dissimilar::Chunk>) -> String {
    let mut buf = String::new();
    for chunk in chunks {
        let formatted = match chunk {
            dissimilar::Chunk::Equal(text) => text.into(),
            dissimilar::Chunk::Delete(text) => format!("\x1b[4m\x1b[31m{text}\x1b[0m"),
            dissimilar::Chunk::Insert(text) => format!("\x1b[4m\x1b[32m{text}\x1b[0m"),
        };
        buf.push_str(&formatted);
    }
    buf
}
