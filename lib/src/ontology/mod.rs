//! In-memory ontology model: classes, properties and namespaces stored in arenas and
//! referenced by index, plus the lookups the update engine needs.

pub mod diff;
pub mod loader;

use crate::consts;
use crate::errors::{Result, StoreError};
use crate::value::PropertyType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassIdx(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyIdx(pub(crate) usize);

/// Where ontology definitions are read from. The built-in base vocabulary is always
/// loaded ahead of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OntologySource {
    /// Every `*.ontology` file (or file with a known RDF extension) below a directory, by name.
    Directory(PathBuf),
    Files(Vec<PathBuf>),
    /// Named Turtle documents held in memory.
    Inline(Vec<InlineOntology>),
}

impl Default for OntologySource {
    fn default() -> Self {
        OntologySource::Inline(Vec::new())
    }
}

impl OntologySource {
    pub fn inline(name: impl Into<String>, turtle: impl Into<String>) -> Self {
        OntologySource::Inline(vec![InlineOntology {
            name: name.into(),
            content: turtle.into(),
        }])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineOntology {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub uri: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub(crate) id: i64,
    uri: String,
    name: String,
    pub(crate) super_classes: Vec<ClassIdx>,
    pub(crate) domain_indexes: Vec<PropertyIdx>,
    pub(crate) notify: bool,
}

impl Class {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// `prefix:local` form, also the name of the class table.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_classes(&self) -> &[ClassIdx] {
        &self.super_classes
    }

    pub fn domain_indexes(&self) -> &[PropertyIdx] {
        &self.domain_indexes
    }

    pub fn notify(&self) -> bool {
        self.notify
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub(crate) id: i64,
    uri: String,
    name: String,
    pub(crate) domain: ClassIdx,
    pub(crate) range: ClassIdx,
    pub(crate) data_type: PropertyType,
    pub(crate) multiple_values: bool,
    pub(crate) indexed: bool,
    pub(crate) secondary_index: Option<PropertyIdx>,
    pub(crate) fulltext_indexed: bool,
    pub(crate) weight: i32,
    pub(crate) inverse_functional: bool,
    pub(crate) super_properties: Vec<PropertyIdx>,
    pub(crate) domain_indexes: Vec<ClassIdx>,
}

impl Property {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// `prefix:local` form, also the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> ClassIdx {
        self.domain
    }

    pub fn range(&self) -> ClassIdx {
        self.range
    }

    pub fn data_type(&self) -> PropertyType {
        self.data_type
    }

    pub fn multiple_values(&self) -> bool {
        self.multiple_values
    }

    pub fn indexed(&self) -> bool {
        self.indexed
    }

    pub fn secondary_index(&self) -> Option<PropertyIdx> {
        self.secondary_index
    }

    pub fn fulltext_indexed(&self) -> bool {
        self.fulltext_indexed
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn inverse_functional(&self) -> bool {
        self.inverse_functional
    }

    pub fn super_properties(&self) -> &[PropertyIdx] {
        &self.super_properties
    }

    pub fn domain_indexes(&self) -> &[ClassIdx] {
        &self.domain_indexes
    }
}

/// A class or property, as resolved from a resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Class(ClassIdx),
    Property(PropertyIdx),
}

/// A closed ontology snapshot. Lookup maps are not persisted and are rebuilt by
/// [`Ontologies::reindex`] after deserialization or id assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ontologies {
    namespaces: Vec<Namespace>,
    classes: Vec<Class>,
    properties: Vec<Property>,
    #[serde(skip)]
    class_lookup: HashMap<String, ClassIdx>,
    #[serde(skip)]
    property_lookup: HashMap<String, PropertyIdx>,
    #[serde(skip)]
    id_lookup: HashMap<i64, Entity>,
}

impl Ontologies {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut ontologies: Ontologies = serde_json::from_str(json)?;
        ontologies.reindex();
        Ok(ontologies)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn reindex(&mut self) {
        self.class_lookup = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.uri.clone(), ClassIdx(i)))
            .collect();
        self.property_lookup = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.uri.clone(), PropertyIdx(i)))
            .collect();
        self.id_lookup.clear();
        for (i, class) in self.classes.iter().enumerate() {
            if class.id != 0 {
                self.id_lookup.insert(class.id, Entity::Class(ClassIdx(i)));
            }
        }
        for (i, property) in self.properties.iter().enumerate() {
            if property.id != 0 {
                self.id_lookup
                    .insert(property.id, Entity::Property(PropertyIdx(i)));
            }
        }
    }

    pub(crate) fn add_namespace(&mut self, uri: &str, prefix: &str) {
        if let Some(ns) = self.namespaces.iter_mut().find(|ns| ns.uri == uri) {
            ns.prefix = prefix.to_string();
        } else {
            self.namespaces.push(Namespace {
                uri: uri.to_string(),
                prefix: prefix.to_string(),
            });
        }
    }

    pub(crate) fn add_class(&mut self, uri: &str) -> ClassIdx {
        if let Some(idx) = self.class_lookup.get(uri) {
            return *idx;
        }
        let idx = ClassIdx(self.classes.len());
        self.classes.push(Class {
            id: 0,
            uri: uri.to_string(),
            name: String::new(),
            super_classes: Vec::new(),
            domain_indexes: Vec::new(),
            notify: false,
        });
        self.class_lookup.insert(uri.to_string(), idx);
        idx
    }

    pub(crate) fn add_property(&mut self, uri: &str) -> PropertyIdx {
        if let Some(idx) = self.property_lookup.get(uri) {
            return *idx;
        }
        let idx = PropertyIdx(self.properties.len());
        self.properties.push(Property {
            id: 0,
            uri: uri.to_string(),
            name: String::new(),
            domain: ClassIdx(usize::MAX),
            range: ClassIdx(usize::MAX),
            data_type: PropertyType::Resource,
            multiple_values: true,
            indexed: false,
            secondary_index: None,
            fulltext_indexed: false,
            weight: 1,
            inverse_functional: false,
            super_properties: Vec::new(),
            domain_indexes: Vec::new(),
        });
        self.property_lookup.insert(uri.to_string(), idx);
        idx
    }

    pub(crate) fn set_class_name(&mut self, idx: ClassIdx, name: String) {
        self.classes[idx.0].name = name;
    }

    pub(crate) fn set_property_name(&mut self, idx: PropertyIdx, name: String) {
        self.properties[idx.0].name = name;
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn class(&self, idx: ClassIdx) -> &Class {
        &self.classes[idx.0]
    }

    pub(crate) fn class_mut(&mut self, idx: ClassIdx) -> &mut Class {
        &mut self.classes[idx.0]
    }

    pub fn property(&self, idx: PropertyIdx) -> &Property {
        &self.properties[idx.0]
    }

    pub(crate) fn property_mut(&mut self, idx: PropertyIdx) -> &mut Property {
        &mut self.properties[idx.0]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassIdx, &Class)> {
        self.classes.iter().enumerate().map(|(i, c)| (ClassIdx(i), c))
    }

    pub fn properties(&self) -> impl Iterator<Item = (PropertyIdx, &Property)> {
        self.properties
            .iter()
            .enumerate()
            .map(|(i, p)| (PropertyIdx(i), p))
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn class_by_uri(&self, uri: &str) -> Option<ClassIdx> {
        self.class_lookup.get(uri).copied()
    }

    pub fn property_by_uri(&self, uri: &str) -> Option<PropertyIdx> {
        self.property_lookup.get(uri).copied()
    }

    pub fn find_class(&self, uri: &str) -> Result<ClassIdx> {
        self.class_by_uri(uri)
            .ok_or_else(|| StoreError::UnknownClass(uri.to_string()))
    }

    pub fn find_property(&self, uri: &str) -> Result<PropertyIdx> {
        self.property_by_uri(uri)
            .ok_or_else(|| StoreError::UnknownProperty(uri.to_string()))
    }

    pub fn entity_by_id(&self, id: i64) -> Option<Entity> {
        self.id_lookup.get(&id).copied()
    }

    pub fn class_by_id(&self, id: i64) -> Option<ClassIdx> {
        match self.entity_by_id(id) {
            Some(Entity::Class(idx)) => Some(idx),
            _ => None,
        }
    }

    pub fn property_by_id(&self, id: i64) -> Option<PropertyIdx> {
        match self.entity_by_id(id) {
            Some(Entity::Property(idx)) => Some(idx),
            _ => None,
        }
    }

    /// Resource id of an ontology class or property, if one has been assigned.
    pub fn id_for_uri(&self, uri: &str) -> Option<i64> {
        let id = match (self.class_by_uri(uri), self.property_by_uri(uri)) {
            (Some(class), _) => self.class(class).id,
            (None, Some(property)) => self.property(property).id,
            (None, None) => return None,
        };
        (id != 0).then_some(id)
    }

    pub fn resource_class(&self) -> Result<ClassIdx> {
        self.find_class(consts::RESOURCE.as_str())
    }

    pub fn rdf_type(&self) -> Result<PropertyIdx> {
        self.find_property(consts::TYPE.as_str())
    }

    /// Gives every class and property without an id one from `intern`, returning the new ids.
    pub(crate) fn assign_ids(
        &mut self,
        mut intern: impl FnMut(&str) -> Result<i64>,
    ) -> Result<Vec<i64>> {
        let mut assigned = Vec::new();
        for class in self.classes.iter_mut().filter(|c| c.id == 0) {
            class.id = intern(&class.uri)?;
            assigned.push(class.id);
        }
        for property in self.properties.iter_mut().filter(|p| p.id == 0) {
            property.id = intern(&property.uri)?;
            assigned.push(property.id);
        }
        self.reindex();
        Ok(assigned)
    }

    /// All ids of classes and properties in this snapshot.
    pub(crate) fn entity_ids(&self) -> Vec<i64> {
        self.classes
            .iter()
            .map(|c| c.id)
            .chain(self.properties.iter().map(|p| p.id))
            .filter(|id| *id != 0)
            .collect()
    }

    /// Transitive super classes of `class`, nearest first, each listed once.
    pub fn super_class_closure(&self, class: ClassIdx) -> Vec<ClassIdx> {
        let mut seen = HashSet::new();
        let mut closure = Vec::new();
        let mut stack: Vec<ClassIdx> = self.class(class).super_classes.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if next == class || !seen.insert(next) {
                continue;
            }
            closure.push(next);
            stack.extend(self.class(next).super_classes.iter().rev().copied());
        }
        closure
    }

    pub fn super_property_closure(&self, property: PropertyIdx) -> Vec<PropertyIdx> {
        let mut seen = HashSet::new();
        let mut closure = Vec::new();
        let mut stack: Vec<PropertyIdx> =
            self.property(property).super_properties.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if next == property || !seen.insert(next) {
                continue;
            }
            closure.push(next);
            stack.extend(self.property(next).super_properties.iter().rev().copied());
        }
        closure
    }

    /// True when `class` is `ancestor` or inherits from it.
    pub fn is_subclass_of(&self, class: ClassIdx, ancestor: ClassIdx) -> bool {
        class == ancestor || self.super_class_closure(class).contains(&ancestor)
    }

    /// Number of ancestors; classes sort general-first by this.
    pub fn depth(&self, class: ClassIdx) -> usize {
        self.super_class_closure(class).len()
    }

    /// Classes that have `class` among their ancestors.
    pub fn subclasses(&self, class: ClassIdx) -> Vec<ClassIdx> {
        self.classes()
            .map(|(idx, _)| idx)
            .filter(|idx| *idx != class && self.is_subclass_of(*idx, class))
            .collect()
    }

    pub fn properties_with_domain(&self, class: ClassIdx) -> impl Iterator<Item = PropertyIdx> + '_ {
        self.properties()
            .filter(move |(_, p)| p.domain == class)
            .map(|(idx, _)| idx)
    }

    /// Single-valued properties stored as columns of `class`'s table: its own
    /// properties followed by its domain indexes.
    pub fn class_columns(&self, class: ClassIdx) -> Vec<PropertyIdx> {
        let mut columns: Vec<PropertyIdx> = self
            .properties_with_domain(class)
            .filter(|p| !self.property(*p).multiple_values)
            .collect();
        for p in &self.class(class).domain_indexes {
            if !columns.contains(p) {
                columns.push(*p);
            }
        }
        columns
    }

    /// Table holding the values of `property`: the domain class table for single-valued
    /// properties, `<domain>_<property>` otherwise.
    pub fn property_table(&self, property: PropertyIdx) -> String {
        let p = self.property(property);
        let domain = self.class(p.domain).name();
        if p.multiple_values {
            format!("{}_{}", domain, p.name)
        } else {
            domain.to_string()
        }
    }

    /// Fulltext-indexed properties in a stable column order.
    pub fn fulltext_properties(&self) -> Vec<PropertyIdx> {
        let mut props: Vec<PropertyIdx> = self
            .properties()
            .filter(|(_, p)| p.fulltext_indexed)
            .map(|(idx, _)| idx)
            .collect();
        props.sort_by(|a, b| self.property(*a).name.cmp(&self.property(*b).name));
        props
    }

    /// Namespace whose URI is the longest prefix of `uri`.
    pub fn namespace_for(&self, uri: &str) -> Option<&Namespace> {
        self.namespaces
            .iter()
            .filter(|ns| uri.starts_with(&ns.uri))
            .max_by_key(|ns| ns.uri.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Ontologies {
        let mut ont = Ontologies::default();
        let top = ont.add_class("http://example.org/Top");
        let left = ont.add_class("http://example.org/Left");
        let right = ont.add_class("http://example.org/Right");
        let bottom = ont.add_class("http://example.org/Bottom");
        ont.class_mut(left).super_classes.push(top);
        ont.class_mut(right).super_classes.push(top);
        ont.class_mut(bottom).super_classes.extend([left, right]);
        ont
    }

    #[test]
    fn closure_visits_diamond_once() {
        let ont = diamond();
        let bottom = ont.class_by_uri("http://example.org/Bottom").unwrap();
        let top = ont.class_by_uri("http://example.org/Top").unwrap();
        let closure = ont.super_class_closure(bottom);
        assert_eq!(closure.len(), 3);
        assert_eq!(closure.iter().filter(|c| **c == top).count(), 1);
        assert!(ont.is_subclass_of(bottom, top));
        assert!(!ont.is_subclass_of(top, bottom));
        assert_eq!(ont.subclasses(top).len(), 3);
    }

    #[test]
    fn ids_are_assigned_once() {
        let mut ont = diamond();
        let mut next = 100;
        let assigned = ont
            .assign_ids(|_| {
                next += 1;
                Ok(next)
            })
            .unwrap();
        assert_eq!(assigned.len(), 4);
        assert!(ont.assign_ids(|_| Ok(0)).unwrap().is_empty());
        let top = ont.class_by_uri("http://example.org/Top").unwrap();
        assert_eq!(ont.class_by_id(ont.class(top).id()), Some(top));
        assert_eq!(ont.id_for_uri("http://example.org/Top"), Some(101));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut ont = diamond();
        ont.add_namespace("http://example.org/", "ex");
        let json = ont.to_json().unwrap();
        let restored = Ontologies::from_json(&json).unwrap();
        assert_eq!(restored.class_count(), 4);
        assert!(restored.class_by_uri("http://example.org/Left").is_some());
        assert_eq!(restored.namespaces()[0].prefix, "ex");
    }
}
