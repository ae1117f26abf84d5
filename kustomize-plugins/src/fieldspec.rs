use core::fmt;
use std::{ops::Deref, str::FromStr};

use anyhow::{Context as _, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    manifest::Str,
    resource::{GvkMatcher, Object, Resource},
};

/// A kustomize field spec: the resources a path applies to and whether missing fields are created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(flatten)]
    pub matcher: GvkMatcher,
    #[serde(with = "crate::serde_ex::string")]
    pub path: FieldPath,
    /// Whether the field should be created if it does not exist.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub create: bool,
}

impl FieldSpec {
    pub fn new(matcher: GvkMatcher, path: FieldPath, create: bool) -> Self {
        FieldSpec { matcher, path, create }
    }

    pub fn overlaps_with(&self, other: &FieldSpec) -> bool {
        self.matcher.overlaps_with(&other.matcher)
            && self.path == other.path
            && self.create == other.create
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Box<[FieldPathSegment]>,
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#""{self}""#)
    }
}

impl Deref for FieldPath {
    type Target = [FieldPathSegment];

    fn deref(&self) -> &Self::Target {
        &self.segments
    }
}

pub type PathRef<'a> = &'a [FieldPathSegment];

impl FromStr for FieldPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_matches('/');
        if s.is_empty() {
            bail!("path cannot be empty");
        }

        let segments = s
            .split('/')
            .map(|segment| segment.parse::<FieldPathSegment>())
            .collect::<Result<Box<_>, _>>()?;
        Ok(FieldPath { segments })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPathSegment {
    /// A mapping key. Landing on a sequence applies the rest of the path to every item.
    Field(Str),
    /// `name[]`, the sequence at `name`.
    Array(Str),
}

impl fmt::Display for FieldPathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPathSegment::Field(field) => write!(f, "{field}"),
            FieldPathSegment::Array(field) => write!(f, "{field}[]"),
        }
    }
}

impl FromStr for FieldPathSegment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            bail!("path segments cannot be empty");
        }

        if let Some(s) = s.strip_suffix("[]") {
            Ok(FieldPathSegment::Array(s.into()))
        } else {
            Ok(FieldPathSegment::Field(s.into()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSpecs {
    specs: Vec<FieldSpec>,
}

impl Deref for FieldSpecs {
    type Target = [FieldSpec];

    fn deref(&self) -> &Self::Target {
        &self.specs
    }
}

impl FromIterator<FieldSpec> for FieldSpecs {
    fn from_iter<I: IntoIterator<Item = FieldSpec>>(iter: I) -> Self {
        FieldSpecs { specs: iter.into_iter().collect() }
    }
}

#[derive(Debug)]
pub struct Conflict {
    pub conflicts_with: Box<FieldSpec>,
    pub field_spec: Box<FieldSpec>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot add field spec `{}` `{}` because it conflicts with existing field spec `{}` `{}`",
            self.field_spec.matcher,
            self.field_spec.path,
            self.conflicts_with.matcher,
            self.conflicts_with.path
        )
    }
}

impl std::error::Error for Conflict {}

impl FieldSpecs {
    pub fn merge(&mut self, other: FieldSpecs) -> Result<(), Conflict> {
        for spec in other.specs {
            self.add(spec)?;
        }

        Ok(())
    }

    /// Adds a spec, ignoring exact duplicates.
    pub fn add(&mut self, spec: FieldSpec) -> Result<(), Conflict> {
        if self.specs.contains(&spec) {
            return Ok(());
        }

        if let Some(conflicts_with) = self.specs.iter().find(|s| s.overlaps_with(&spec)) {
            Err(Conflict {
                conflicts_with: Box::new(conflicts_with.clone()),
                field_spec: Box::new(spec),
            })
        } else {
            self.specs.push(spec);
            Ok(())
        }
    }

    pub fn apply<T: JsonValue>(
        &self,
        resource: &mut Resource,
        mut f: impl FnMut(&mut T) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        for spec in &self.specs {
            spec.apply(resource, &mut f)?;
        }

        Ok(())
    }
}

impl FieldSpec {
    /// Calls `f` with every value at `path` in `resource` if the resource matches.
    pub fn apply<T>(
        &self,
        resource: &mut Resource,
        f: &mut impl FnMut(&mut T) -> anyhow::Result<()>,
    ) -> anyhow::Result<()>
    where
        T: JsonValue,
    {
        if !self.matcher.matches(resource.id()) {
            return Ok(());
        }

        let mut root = Value::Object(std::mem::take(resource.root_mut()));
        let result = apply_path(&mut root, &self.path, f, self.create);
        if let Value::Object(root) = root {
            *resource.root_mut() = root;
        }
        resource.sync_id();

        result.with_context(|| {
            format!("applying field spec `{}` `{}` to resource {}", self.matcher, self.path, resource.id())
        })
    }
}

/// Walks `path` from `curr`, calling `f` on each value reached.
pub fn apply_path<T>(
    curr: &mut Value,
    path: PathRef<'_>,
    f: &mut impl FnMut(&mut T) -> anyhow::Result<()>,
    create: bool,
) -> anyhow::Result<()>
where
    T: JsonValue,
{
    let Some((segment, rest)) = path.split_first() else {
        return f(T::try_as_mut(curr)?);
    };

    match (segment, curr) {
        (_, Value::Null) => Ok(()),
        (FieldPathSegment::Field(_), Value::Array(items)) => {
            for item in items {
                apply_path(item, path, f, create)?;
            }
            Ok(())
        }
        (FieldPathSegment::Field(field), Value::Object(obj)) => {
            if !obj.contains_key(field.as_str()) {
                if !create {
                    return Ok(());
                }

                let value =
                    if rest.is_empty() { T::default().into_value() } else { Value::Object(Object::new()) };
                obj.insert(field.to_string(), value);
            }

            match obj.get_mut(field.as_str()) {
                Some(next) => apply_path(next, rest, f, create),
                None => Ok(()),
            }
        }
        (FieldPathSegment::Array(field), Value::Object(obj)) => match obj.get_mut(field.as_str()) {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Array(items)) => {
                for item in items {
                    apply_path(item, rest, f, create)?;
                }
                Ok(())
            }
            Some(other) => bail!("expected a sequence at `{field}` but found {}", type_name(other)),
        },
        (segment, other) => bail!("expected a mapping at `{segment}` but found {}", type_name(other)),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

pub trait JsonValue: Default {
    fn try_as_mut(value: &mut Value) -> anyhow::Result<&mut Self>;

    fn into_value(self) -> Value
    where
        Self: Sized;
}

impl JsonValue for Value {
    fn try_as_mut(value: &mut Value) -> anyhow::Result<&mut Self> {
        Ok(value)
    }

    fn into_value(self) -> Value {
        self
    }
}

impl JsonValue for Object {
    fn try_as_mut(value: &mut Value) -> anyhow::Result<&mut Self> {
        match value {
            Value::Object(obj) => Ok(obj),
            other => bail!("expected a mapping but found {}", type_name(other)),
        }
    }

    fn into_value(self) -> Value {
        Value::Object(self)
    }
}

impl JsonValue for Vec<Value> {
    fn try_as_mut(value: &mut Value) -> anyhow::Result<&mut Self> {
        match value {
            Value::Array(arr) => Ok(arr),
            other => bail!("expected a sequence but found {}", type_name(other)),
        }
    }

    fn into_value(self) -> Value {
        Value::Array(self)
    }
}

impl JsonValue for String {
    fn try_as_mut(value: &mut Value) -> anyhow::Result<&mut Self> {
        match value {
            Value::String(s) => Ok(s),
            other => bail!("expected a string but found {}", type_name(other)),
        }
    }

    fn into_value(self) -> Value {
        Value::String(self)
    }
}

/// A dotted field reference such as `spec.containers[0].image` or `metadata.labels[app.kubernetes.io/name]`.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldRef {
    segments: Box<[FieldRefSegment]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldRefSegment {
    Key(Str),
    Index(usize),
}

impl FieldRef {
    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first()? {
            FieldRefSegment::Key(key) => Some(key),
            FieldRefSegment::Index(_) => None,
        }
    }

    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(value, |curr, segment| match segment {
            FieldRefSegment::Key(key) => curr.as_object()?.get(key.as_str()),
            FieldRefSegment::Index(index) => curr.as_array()?.get(*index),
        })
    }

    pub fn get_in_object<'a>(&self, object: &'a Object) -> Option<&'a Value> {
        let (FieldRefSegment::Key(key), rest) = self.segments.split_first()? else {
            return None;
        };

        FieldRef { segments: rest.into() }.get(object.get(key.as_str())?)
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#""{self}""#)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                FieldRefSegment::Key(key) if key.contains(['.', '[', ']']) => write!(f, "[{key}]")?,
                FieldRefSegment::Key(key) if i > 0 => write!(f, ".{key}")?,
                FieldRefSegment::Key(key) => write!(f, "{key}")?,
                FieldRefSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = vec![];
        let mut key = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !key.is_empty() {
                        segments.push(FieldRefSegment::Key(std::mem::take(&mut key).into()));
                    }
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(FieldRefSegment::Key(std::mem::take(&mut key).into()));
                    }

                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) => inner.push(c),
                            None => bail!("unclosed `[` in field reference `{s}`"),
                        }
                    }

                    let inner = inner.trim().trim_matches(|c| c == '"' || c == '\'');
                    segments.push(match inner.parse::<usize>() {
                        Ok(index) => FieldRefSegment::Index(index),
                        Err(_) => FieldRefSegment::Key(inner.into()),
                    });
                }
                c => key.push(c),
            }
        }

        if !key.is_empty() {
            segments.push(FieldRefSegment::Key(key.into()));
        }

        if segments.is_empty() {
            bail!("field reference cannot be empty");
        }

        Ok(FieldRef { segments: segments.into_boxed_slice() })
    }
}
