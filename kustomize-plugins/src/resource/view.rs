use serde_json::Value;

use crate::{manifest::Behavior, selector::StringMap};

use super::{Object, Resource};

const BEHAVIOR: &str = "kustomize.config.k8s.io/behavior";

impl Resource {
    pub fn metadata(&self) -> Option<MetadataView<'_>> {
        self.root.get("metadata").and_then(|v| v.as_object()).map(MetadataView)
    }

    pub fn labels(&self) -> Option<LabelsView<'_>> {
        self.metadata()?.labels()
    }

    pub fn annotations(&self) -> Option<AnnotationsView<'_>> {
        self.metadata()?.annotations()
    }

    pub fn make_metadata_mut(&mut self) -> MetadataViewMut<'_> {
        MetadataViewMut(make_object(&mut self.root, "metadata"))
    }
}

fn make_object<'a>(parent: &'a mut Object, key: &str) -> &'a mut Object {
    let value = parent.entry(key).or_insert_with(|| Value::Object(Object::new()));
    if !value.is_object() {
        *value = Value::Object(Object::new());
    }
    value.as_object_mut().expect("value was just made an object")
}

#[derive(Debug)]
pub struct MetadataView<'a>(&'a Object);

impl<'a> MetadataView<'a> {
    pub fn annotations(&self) -> Option<AnnotationsView<'a>> {
        self.0.get("annotations").and_then(|v| v.as_object()).map(AnnotationsView)
    }

    pub fn labels(&self) -> Option<LabelsView<'a>> {
        self.0.get("labels").and_then(|v| v.as_object()).map(LabelsView)
    }
}

#[derive(Debug)]
pub struct LabelsView<'a>(&'a Object);

impl<'a> LabelsView<'a> {
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

impl StringMap for LabelsView<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        LabelsView::get(self, key)
    }
}

#[derive(Debug)]
pub struct AnnotationsView<'a>(&'a Object);

impl<'a> AnnotationsView<'a> {
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

impl StringMap for AnnotationsView<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        AnnotationsView::get(self, key)
    }
}

#[derive(Debug)]
pub struct MetadataViewMut<'a>(&'a mut Object);

impl MetadataViewMut<'_> {
    // Crate private since the id must be updated alongside.
    pub(super) fn set_name(&mut self, name: &str) {
        self.0.insert("name".to_string(), Value::String(name.to_string()));
    }

    pub(super) fn set_namespace(&mut self, namespace: Option<&str>) {
        match namespace {
            None => self.0.shift_remove("namespace"),
            Some(namespace) => {
                self.0.insert("namespace".to_string(), Value::String(namespace.to_string()))
            }
        };
    }

    pub fn insert_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        make_object(&mut *self.0, "labels").insert(key.into(), Value::String(value.into()));
    }

    pub fn insert_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        make_object(&mut *self.0, "annotations").insert(key.into(), Value::String(value.into()));
    }

    /// Records a non-default generator behavior so kustomize can merge the output.
    pub fn set_behavior(&mut self, behavior: Behavior) {
        if behavior != Behavior::Create {
            self.insert_annotation(BEHAVIOR, behavior.to_string());
        }
    }
}
