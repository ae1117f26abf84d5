use core::fmt;
use std::ops::{Index, IndexMut};

use anyhow::Context as _;
use indexmap::{IndexMap, map::Entry};

use crate::{
    manifest::Str,
    resource::{ResId, Resource},
    selector::Target,
};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResourceMap {
    resources: IndexMap<ResId, Resource>,
}

impl fmt::Debug for ResourceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.resources.values()).finish()
    }
}

/// Multi-document YAML.
impl fmt::Display for ResourceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, resource) in self.iter().enumerate() {
            if i > 0 {
                writeln!(f, "---")?;
            }
            let yaml = serde_yaml::to_string(resource).map_err(|_| fmt::Error)?;
            write!(f, "{yaml}")?;
        }

        Ok(())
    }
}

impl FromIterator<Resource> for ResourceMap {
    /// Later resources with an already seen id replace earlier ones.
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let resources = iter.into_iter().map(|resource| (resource.id().clone(), resource)).collect();
        ResourceMap { resources }
    }
}

impl IntoIterator for ResourceMap {
    type Item = Resource;
    type IntoIter = indexmap::map::IntoValues<ResId, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_values()
    }
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a multi-document YAML stream.
    pub fn from_yaml_stream(yaml: &str) -> anyhow::Result<Self> {
        let mut resources = ResourceMap::new();
        for resource in crate::yaml::from_str_multi::<Resource>(yaml)? {
            resources.insert(resource)?;
        }
        Ok(resources)
    }

    pub fn try_from_resources(
        resources: impl IntoIterator<Item = Resource>,
    ) -> Result<Self, Conflict> {
        let mut map = ResourceMap::new();
        for resource in resources {
            map.insert(resource)?;
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn insert(&mut self, resource: Resource) -> Result<(), Conflict> {
        match self.resources.entry(resource.id().clone()) {
            Entry::Occupied(_) => Err(Conflict { resource: Box::new(resource) }),
            Entry::Vacant(entry) => {
                entry.insert(resource);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, id: &ResId) -> Option<Resource> {
        self.resources.shift_remove(id)
    }

    pub fn get(&self, id: &ResId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn get_mut(&mut self, id: &ResId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Resource> + DoubleEndedIterator {
        self.resources.values()
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl ExactSizeIterator<Item = &mut Resource> + DoubleEndedIterator {
        self.resources.values_mut()
    }

    /// The first resource of `kind` with the given current name, in any namespace.
    pub fn find(&self, kind: &str, name: &str) -> Option<&Resource> {
        self.iter().find(|r| r.kind() == kind && r.name() == name)
    }

    pub fn select<'a>(&'a self, target: &'a Target) -> impl Iterator<Item = &'a Resource> + 'a {
        self.iter().filter(move |r| target.matches(r))
    }

    /// Ids of the resources selected by `target`, for callers that go on to mutate them.
    pub fn select_ids(&self, target: &Target) -> Vec<ResId> {
        self.select(target).map(|r| r.id().clone()).collect()
    }

    /// Renames the resource keeping its position in the map, returning the new id.
    pub fn rename(&mut self, id: &ResId, name: impl Into<Str>) -> anyhow::Result<ResId> {
        let index = self
            .resources
            .get_index_of(id)
            .with_context(|| format!("resource `{id}` not in resource map"))?;

        let mut resource = self.resources[index].clone();
        resource.set_name(name);
        let new_id = resource.id().clone();
        if new_id != *id && self.resources.contains_key(&new_id) {
            return Err(Conflict { resource: Box::new(resource) }.into());
        }

        self.replace_at(index, resource);
        Ok(new_id)
    }

    /// Replaces every resource with the result of `f`, which may change identities.
    pub fn try_map(
        &mut self,
        mut f: impl FnMut(Resource) -> anyhow::Result<Resource>,
    ) -> anyhow::Result<()> {
        let resources = std::mem::take(&mut self.resources);
        for (_, resource) in resources {
            self.insert(f(resource)?)?;
        }
        Ok(())
    }

    /// Re-keys the map after resources were edited in place, keeping their order.
    pub fn reindex(&mut self) -> Result<(), Conflict> {
        if self.resources.iter().all(|(id, resource)| id == resource.id()) {
            return Ok(());
        }

        let resources = std::mem::take(&mut self.resources);
        for (_, resource) in resources {
            self.insert(resource)?;
        }
        Ok(())
    }

    /// In-place merge of two `ResourceMap`s, any conflicting resources will be an error
    pub fn merge(&mut self, other: ResourceMap) -> Result<(), Conflict> {
        for (_, resource) in other.resources {
            self.insert(resource)?;
        }
        Ok(())
    }

    fn replace_at(&mut self, index: usize, resource: Resource) {
        if let Some(existing) = self.resources.get_mut(resource.id()) {
            *existing = resource;
            return;
        }

        let id = resource.id().clone();
        self.resources.insert(id, resource);
        let last = self.resources.len() - 1;
        self.resources.move_index(last, index);
        self.resources.shift_remove_index(index + 1);
    }
}

impl Index<&ResId> for ResourceMap {
    type Output = Resource;

    fn index(&self, id: &ResId) -> &Self::Output {
        self.resources
            .get(id)
            .unwrap_or_else(|| panic!("resource with id `{id}` not in ResourceMap"))
    }
}

impl IndexMut<&ResId> for ResourceMap {
    fn index_mut(&mut self, id: &ResId) -> &mut Self::Output {
        self.resources
            .get_mut(id)
            .unwrap_or_else(|| panic!("resource with id `{id}` not in ResourceMap"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub resource: Box<Resource>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "may not add resource with an already registered id `{}`", self.resource.id())
    }
}

impl std::error::Error for Conflict {}
