//! External processes and file system helpers shared by the plugins.

pub mod gomplate;

use std::{path::Path, process::Stdio, time::Instant};

use anyhow::{Context, bail};
use tokio::{io::AsyncWriteExt as _, process::Command};

use crate::{PathExt, resmap::ResourceMap};

/// Runs `cmd` to completion, feeding it `stdin`, and returns what it wrote to stdout.
/// A non-zero exit status is an error carrying the process' stderr.
pub async fn run(cmd: &mut Command, stdin: Option<Vec<u8>>) -> anyhow::Result<Vec<u8>> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let now = Instant::now();
    let mut proc = cmd.spawn().with_context(|| format!("spawn `{program}`"))?;

    // Written from a separate task so a chatty process can't deadlock on a full stdout pipe.
    let writer = match (stdin, proc.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(tokio::spawn(async move {
            pipe.write_all(&input).await?;
            pipe.shutdown().await
        })),
        _ => None,
    };

    let output = proc.wait_with_output().await.with_context(|| format!("wait for `{program}`"))?;

    tracing::info!(
        duration = ?now.elapsed(),
        cmd = ?cmd.as_std(),
        "executed process"
    );

    if !output.status.success() {
        bail!(
            "`{program}` failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    if let Some(writer) = writer {
        writer
            .await
            .context("stdin writer task panicked")?
            .with_context(|| format!("write to `{program}` stdin"))?;
    }

    Ok(output.stdout)
}

pub const KUSTOMIZE_BIN: &str = "kustomize";
pub const GOMPLATE_BIN: &str = "gomplate";

/// Runs `<bin> build <path>` and parses its output.
#[tracing::instrument]
pub async fn kustomize_build(bin: &Path, path: &Path) -> anyhow::Result<ResourceMap> {
    let mut cmd = Command::new(bin);
    cmd.arg("build").arg(path);
    let stdout = run(&mut cmd, None).await?;
    let stdout = String::from_utf8(stdout).context("kustomize output is not valid utf-8")?;
    ResourceMap::from_yaml_stream(&stdout)
        .with_context(|| format!("parsing `kustomize build {}` output", path.pretty()))
}

/// Recursively copies the contents of `src` into `dest`, creating `dest` if needed.
pub fn copy_dir(src: &Path, dest: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("creating directory {}", dest.pretty()))?;

    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("walking {}", src.pretty()))?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("copying {} to {}", entry.path().pretty(), target.pretty())
            })?;
        }
    }

    Ok(())
}

/// Writes an executable shell script standing in for an external tool.
#[cfg(all(test, unix))]
pub(crate) fn fake_bin(dir: &Path, name: &str, script: &str) -> anyhow::Result<std::path::PathBuf> {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\nset -e\n{script}"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}
