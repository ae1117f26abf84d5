use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::PathExt;

const EJSON_KEY: &str = "EJSON_KEY";

/// Where gomplate's `data` datasource comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ejson: Option<EjsonSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EjsonSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSource {
    pub address_path: PathBuf,
    pub token_path: PathBuf,
    pub secret_path: PathBuf,
}

/// A resolved data source, ready to render templates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gomplate {
    bin: PathBuf,
    datasource: PathBuf,
    env: Vec<(String, String)>,
}

impl DataSource {
    /// Reads the credentials the data source needs. ejson wins over vault.
    pub fn resolve(&self, root: &Path) -> anyhow::Result<Gomplate> {
        let mut env = vec![];

        let mut vault_ready = false;
        if let Some(vault) = &self.vault {
            let address = read_secret_file(root, &vault.address_path)?;
            let token = read_secret_file(root, &vault.token_path)?;
            vault_ready = address.is_some() && token.is_some();
            env.extend(address.map(|address| ("VAULT_ADDR".to_string(), address)));
            env.extend(token.map(|token| ("VAULT_TOKEN".to_string(), token)));
        }

        let mut ejson_key = None;
        if let Some(ejson) = &self.ejson {
            if let Some(path) = &ejson.private_key_path {
                ejson_key = read_secret_file(root, path)?;
            }
        }
        let ejson_key = ejson_key.or_else(|| std::env::var(EJSON_KEY).ok().filter(|k| !k.is_empty()));

        let datasource = match (&self.ejson, ejson_key) {
            (Some(ejson), Some(key)) => {
                env.push((EJSON_KEY.to_string(), key));
                &ejson.file_path
            }
            _ => match &self.vault {
                Some(vault) if vault_ready => &vault.secret_path,
                _ => bail!(
                    "no usable data source: ejson needs a private key (file or `{EJSON_KEY}`), vault needs readable address and token files"
                ),
            },
        };

        Ok(Gomplate { bin: super::GOMPLATE_BIN.into(), datasource: root.join(datasource), env })
    }
}

fn read_secret_file(root: &Path, path: &Path) -> anyhow::Result<Option<String>> {
    let path = root.join(path);
    if !path.exists() {
        tracing::debug!(path = %path.pretty(), "data source credential file does not exist");
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading data source credential {}", path.pretty()))?;
    Ok(Some(contents.trim_end().to_string()))
}

impl Gomplate {
    /// Runs `bin` instead of the `gomplate` found on `PATH`.
    pub fn with_bin(mut self, bin: Option<&Path>) -> Self {
        if let Some(bin) = bin {
            self.bin = bin.to_path_buf();
        }
        self
    }

    pub fn datasource(&self) -> &Path {
        &self.datasource
    }

    /// Renders `template` with `((` `))` delimiters and the datasource bound to `data`.
    #[tracing::instrument(skip_all, fields(datasource = %self.datasource.pretty()))]
    pub async fn render(&self, template: &str) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--left-delim=((")
            .arg("--right-delim=))")
            .arg(format!("--datasource=data={}", self.datasource.display()))
            .arg(format!("--in={template}"))
            .envs(self.env.iter().map(|(k, v)| (k, v)));

        let output = super::run(&mut cmd, None).await?;
        String::from_utf8(output).context("gomplate output is not valid utf-8")
    }
}

/// Substitutes `((.data.region))` in the `--in` template, failing unless an ejson key and
/// the expected datasource are passed.
#[cfg(all(test, unix))]
pub(crate) const FAKE_GOMPLATE: &str = r#"
for arg in "$@"; do
  case "$arg" in
    --datasource=data=*) ds="${arg#--datasource=data=}" ;;
    --in=*) in="${arg#--in=}" ;;
  esac
done
[ -n "$EJSON_KEY" ]
case "$ds" in */secrets.ejson) ;; *) exit 1 ;; esac
printf '%s\n' "$in" | sed 's/((\.data\.region))/eu-west-1/g'
"#;
