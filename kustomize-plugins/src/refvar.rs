//! `$(VAR)` reference expansion as done by Kubernetes for container commands and env.

use serde_json::Value;

const OPERATOR: char = '$';
const OPENER: char = '(';
const CLOSER: char = ')';

/// Expands every `$(NAME)` in `input` using `mapping`.
///
/// `$$` is an escaped `$`. References `mapping` cannot resolve are kept as written.
pub fn expand(input: &str, mut mapping: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(OPERATOR) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let mut chars = after.chars();
        match chars.next() {
            None => {
                out.push(OPERATOR);
                rest = after;
            }
            Some(OPERATOR) => {
                out.push(OPERATOR);
                rest = &after[1..];
            }
            Some(OPENER) => match after.find(CLOSER) {
                Some(end) => {
                    let name = &after[1..end];
                    match mapping(name) {
                        Some(value) => out.push_str(&value),
                        None => {
                            out.push(OPERATOR);
                            out.push_str(&after[..=end]);
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push(OPERATOR);
                    out.push(OPENER);
                    rest = &after[1..];
                }
            },
            Some(c) => {
                out.push(OPERATOR);
                out.push(c);
                rest = &after[c.len_utf8()..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Expands references inside a field value: a string, a sequence of strings or the string
/// values of a mapping. A string that is exactly one reference takes the variable's value
/// with its type.
pub fn expand_value(
    value: &mut Value,
    lookup: &mut impl FnMut(&str) -> Option<Value>,
) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            if let Some(name) = whole_reference(s) {
                if let Some(replacement) = lookup(name) {
                    *value = replacement;
                }
                return Ok(());
            }
            *s = expand(s, |name| lookup(name).map(|v| to_display(&v)));
        }
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item {
                    *s = expand(s, |name| lookup(name).map(|v| to_display(&v)));
                }
            }
        }
        Value::Object(obj) => {
            for item in obj.values_mut() {
                if let Value::String(s) = item {
                    *s = expand(s, |name| lookup(name).map(|v| to_display(&v)));
                }
            }
        }
        Value::Null => {}
        other => anyhow::bail!(
            "expected a string, sequence or mapping for variable expansion but found {}",
            crate::fieldspec::type_name(other)
        ),
    }
    Ok(())
}

fn whole_reference(s: &str) -> Option<&str> {
    let name = s.strip_prefix("$(")?.strip_suffix(')')?;
    (!name.is_empty() && !name.contains([OPERATOR, OPENER, CLOSER])).then_some(name)
}

fn to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "SERVICE" => Some("api".into()),
            "PORT" => Some("8080".into()),
            _ => None,
        }
    }

    #[test]
    fn expansion_cases() {
        let cases = [
            ("http://$(SERVICE):$(PORT)/", "http://api:8080/"),
            ("$(MISSING) stays", "$(MISSING) stays"),
            ("$$(SERVICE) is escaped", "$(SERVICE) is escaped"),
            ("cost $5", "cost $5"),
            ("trailing $", "trailing $"),
            ("$(unclosed", "$(unclosed"),
            ("$(SERVICE)$(SERVICE)", "apiapi"),
            ("", ""),
        ];

        for (input, expected) in cases {
            assert_eq!(expand(input, vars), expected, "input: {input}");
        }
    }

    #[test]
    fn whole_reference_keeps_type() -> anyhow::Result<()> {
        let mut lookup = |name: &str| match name {
            "REPLICAS" => Some(json!(3)),
            "NAME" => Some(json!("web")),
            _ => None,
        };

        let mut value = json!("$(REPLICAS)");
        expand_value(&mut value, &mut lookup)?;
        assert_eq!(value, json!(3));

        let mut value = json!(["--replicas=$(REPLICAS)", "$(NAME)", 7]);
        expand_value(&mut value, &mut lookup)?;
        assert_eq!(value, json!(["--replicas=3", "web", 7]));

        let mut value = json!({"a": "$(NAME)-x", "b": {"c": "$(NAME)"}});
        expand_value(&mut value, &mut lookup)?;
        assert_eq!(value, json!({"a": "web-x", "b": {"c": "$(NAME)"}}));

        assert!(expand_value(&mut json!(true), &mut lookup).is_err());
        Ok(())
    }
}
