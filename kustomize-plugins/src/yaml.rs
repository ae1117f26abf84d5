use serde::{Deserialize, de::DeserializeOwned};

pub fn from_str<T>(s: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    serde_yaml::from_str(s).map_err(Into::into)
}

pub fn from_reader<R, T>(reader: R) -> anyhow::Result<T>
where
    R: std::io::Read,
    T: DeserializeOwned,
{
    serde_yaml::from_reader(reader).map_err(Into::into)
}

/// Parses every document of a (possibly multi-document) YAML stream, skipping empty documents.
pub fn from_str_multi<T>(s: &str) -> anyhow::Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut out = vec![];
    for document in serde_yaml::Deserializer::from_str(s) {
        let value = serde_json::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        out.push(serde_json::from_value(value)?);
    }
    Ok(out)
}

pub fn to_string<T>(value: &T) -> anyhow::Result<String>
where
    T: serde::Serialize,
{
    serde_yaml::to_string(value).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #[test]
    fn multi_document_stream_skips_empty_documents() -> anyhow::Result<()> {
        let docs: Vec<serde_json::Value> = super::from_str_multi("---\na: 1\n---\n---\nb: 2\n")?;
        assert_eq!(docs, vec![serde_json::json!({"a": 1}), serde_json::json!({"b": 2})]);
        Ok(())
    }
}
