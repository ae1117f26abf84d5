use std::borrow::Cow;
use std::collections::BTreeMap;

use anyhow::bail;
use serde_json::Value;

use crate::manifest::Str;

use super::Resource;

impl Resource {
    pub fn shorthash(&self) -> anyhow::Result<Str> {
        let encoded = match self.kind().as_str() {
            "ConfigMap" => encode_config_map(self)?,
            "Secret" => encode_secret(self)?,
            kind => bail!("cannot hash resource of kind `{kind}`, only ConfigMap and Secret are supported"),
        };

        // go's json.Marshal escapes html characters and kustomize hashes that output
        let encoded = html_escape(&encoded);
        let hex = sha256::digest(&*encoded);
        encode_hex(&hex)
    }
}

fn encode_config_map(resource: &Resource) -> anyhow::Result<String> {
    // Field order matches go's `json.Marshal` of a map
    #[derive(serde::Serialize)]
    struct ConfigMap {
        #[serde(rename = "binaryData", skip_serializing_if = "Option::is_none")]
        binary_data: Option<Value>,
        data: Value,
        kind: &'static str,
        name: &'static str,
    }

    let config_map = ConfigMap {
        binary_data: sorted(resource, "binaryData"),
        data: sorted(resource, "data").unwrap_or_else(|| Value::String(String::new())),
        kind: "ConfigMap",
        // kustomize hashes before the name is known
        name: "",
    };

    Ok(serde_json::to_string(&config_map)?)
}

fn encode_secret(resource: &Resource) -> anyhow::Result<String> {
    #[derive(serde::Serialize)]
    struct Secret {
        data: Value,
        kind: &'static str,
        name: &'static str,
        #[serde(rename = "stringData", skip_serializing_if = "Option::is_none")]
        string_data: Option<Value>,
        #[serde(rename = "type")]
        secret_type: Value,
    }

    let secret = Secret {
        data: sorted(resource, "data").unwrap_or_else(|| Value::String(String::new())),
        kind: "Secret",
        name: "",
        string_data: sorted(resource, "stringData"),
        secret_type: resource
            .root()
            .get("type")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())),
    };

    Ok(serde_json::to_string(&secret)?)
}

/// The object at `key` with its entries in key order.
fn sorted(resource: &Resource, key: &str) -> Option<Value> {
    let object = resource.root().get(key)?.as_object()?;
    let sorted = object.iter().collect::<BTreeMap<_, _>>();
    Some(Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
}

/// Escapes `<`, `>`, `&`, U+2028 and U+2029 the way go's `json.HTMLEscape` does.
fn html_escape(src: &str) -> Cow<'_, str> {
    fn html_escape_slow(bytes: &[u8], first_escape: usize) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut dst = Vec::with_capacity(bytes.len());
        dst.extend_from_slice(&bytes[..first_escape]);

        let mut i = first_escape;
        while i < bytes.len() {
            let c = bytes[i];
            if c == b'<' || c == b'>' || c == b'&' {
                dst.extend_from_slice(b"\\u00");
                dst.push(HEX[(c >> 4) as usize]);
                dst.push(HEX[(c & 0xF) as usize]);
                i += 1;
            } else if c == 0xE2
                && i + 2 < bytes.len()
                && bytes[i + 1] == 0x80
                && (bytes[i + 2] & !1) == 0xA8
            {
                dst.extend_from_slice(b"\\u202");
                dst.push(HEX[(bytes[i + 2] & 0xF) as usize]);
                i += 3;
            } else {
                dst.push(c);
                i += 1;
            }
        }

        // only ascii escapes replace whole characters
        String::from_utf8(dst).expect("escaping preserves utf-8")
    }

    let bytes = src.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'<' || c == b'>' || c == b'&' {
            return Cow::Owned(html_escape_slow(bytes, i));
        }
        if c == 0xE2 && i + 2 < bytes.len() && bytes[i + 1] == 0x80 && (bytes[i + 2] & !1) == 0xA8 {
            return Cow::Owned(html_escape_slow(bytes, i));
        }
        i += 1;
    }

    Cow::Borrowed(src)
}

// Drops vowels and vowel-like digits so hashes never spell words.
fn encode_hex(hex: &str) -> anyhow::Result<Str> {
    if hex.len() < 10 {
        bail!("input hex string must be at least 10 characters long");
    }

    let mut out = Str::with_capacity(10);
    for c in hex.chars().take(10) {
        let c = match c {
            '0' => 'g',
            '1' => 'h',
            '3' => 'k',
            'a' => 'm',
            'e' => 't',
            _ => c,
        };
        out.push(c);
    }

    Ok(out)
}

#[cfg(test)]
mod tests;
