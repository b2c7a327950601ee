//! Builds an [`Ontologies`] snapshot from RDF ontology documents and validates it.

use super::{ClassIdx, OntologySource, Ontologies, PropertyIdx};
use crate::consts::{
    CLASS, DOMAIN, DOMAIN_INDEX, FULLTEXT_INDEXED, INDEXED, INVERSE_FUNCTIONAL_PROPERTY,
    MAX_CARDINALITY, NOTIFY, PREFIX, PROPERTY, RANGE, RESOURCE, SECONDARY_INDEX,
    SUB_CLASS_OF, SUB_PROPERTY_OF, TYPE, WEIGHT,
};
use crate::errors::{Result, StoreError};
use crate::util::{self, Document};
use crate::value::PropertyType;
use log::{debug, info};
use oxigraph::model::{NamedOrBlankNode, Quad, Term};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Reads and loads every document of `source`, returning the snapshot and the
/// checksum of the documents it was built from.
pub fn load(source: &OntologySource) -> Result<(Ontologies, String)> {
    let documents = util::read_ontology_documents(source)?;
    let checksum = util::checksum(&documents);
    let ontologies = load_documents(&documents)?;
    Ok((ontologies, checksum))
}

pub fn load_documents(documents: &[Document]) -> Result<Ontologies> {
    let mut parsed = Vec::with_capacity(documents.len());
    for doc in documents {
        parsed.push((doc.name.as_str(), doc.parse()?));
    }
    let mut loader = Loader::default();
    for (name, quads) in &parsed {
        loader.declare(name, quads)?;
    }
    for (name, quads) in &parsed {
        loader.describe(name, quads)?;
    }
    let ontologies = loader.finish()?;
    info!(
        "Loaded ontology with {} classes and {} properties from {} documents",
        ontologies.class_count(),
        ontologies.property_count(),
        documents.len()
    );
    Ok(ontologies)
}

#[derive(Default)]
struct Loader {
    ontologies: Ontologies,
    // file each class or property was declared in, for error messages
    origin: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
}

fn subject_uri<'a>(file: &str, quad: &'a Quad) -> Result<&'a str> {
    match &quad.subject {
        NamedOrBlankNode::NamedNode(node) => Ok(node.as_str()),
        _ => Err(StoreError::parse(
            file,
            format!("blank node subject in ontology statement about <{}>", quad.predicate),
        )),
    }
}

fn object_uri(quad: &Quad) -> Option<&str> {
    match &quad.object {
        Term::NamedNode(node) => Some(node.as_str()),
        _ => None,
    }
}

fn object_literal(quad: &Quad) -> Option<&str> {
    match &quad.object {
        Term::Literal(literal) => Some(literal.value()),
        _ => None,
    }
}

fn literal_bool(file: &str, quad: &Quad) -> Result<bool> {
    match object_literal(quad) {
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        _ => Err(StoreError::parse(
            file,
            format!("expected a boolean for <{}>", quad.predicate),
        )),
    }
}

fn literal_int(file: &str, quad: &Quad) -> Result<i64> {
    object_literal(quad)
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| {
            StoreError::parse(file, format!("expected an integer for <{}>", quad.predicate))
        })
}

impl Loader {
    /// First pass: classes, properties and namespaces.
    fn declare(&mut self, file: &str, quads: &[Quad]) -> Result<()> {
        for quad in quads {
            if quad.predicate.as_ref() == TYPE {
                let Some(object) = object_uri(quad) else {
                    continue;
                };
                let subject = subject_uri(file, quad)?;
                if object == CLASS.as_str() {
                    self.ontologies.add_class(subject);
                } else if object == PROPERTY.as_str() || object == INVERSE_FUNCTIONAL_PROPERTY.as_str() {
                    self.ontologies.add_property(subject);
                } else {
                    continue;
                }
                self.origin
                    .entry(subject.to_string())
                    .or_insert_with(|| file.to_string());
            } else if quad.predicate.as_ref() == PREFIX {
                let subject = subject_uri(file, quad)?;
                let prefix = object_literal(quad).ok_or_else(|| {
                    StoreError::parse(file, format!("namespace <{}> has a non-literal prefix", subject))
                })?;
                self.prefixes.push((subject.to_string(), prefix.to_string()));
            }
        }
        Ok(())
    }

    fn class(&self, file: &str, uri: &str) -> Result<ClassIdx> {
        self.ontologies
            .class_by_uri(uri)
            .ok_or_else(|| StoreError::parse(file, format!("unknown class <{}>", uri)))
    }

    fn property(&self, file: &str, uri: &str) -> Result<PropertyIdx> {
        self.ontologies
            .property_by_uri(uri)
            .ok_or_else(|| StoreError::parse(file, format!("unknown property <{}>", uri)))
    }

    fn object_class(&self, file: &str, quad: &Quad) -> Result<ClassIdx> {
        let uri = object_uri(quad)
            .ok_or_else(|| StoreError::parse(file, format!("expected a class for <{}>", quad.predicate)))?;
        self.class(file, uri)
    }

    fn object_property(&self, file: &str, quad: &Quad) -> Result<PropertyIdx> {
        let uri = object_uri(quad).ok_or_else(|| {
            StoreError::parse(file, format!("expected a property for <{}>", quad.predicate))
        })?;
        self.property(file, uri)
    }

    /// Second pass: attributes of the declared classes and properties.
    fn describe(&mut self, file: &str, quads: &[Quad]) -> Result<()> {
        for quad in quads {
            let NamedOrBlankNode::NamedNode(subject) = &quad.subject else {
                continue;
            };
            let subject = subject.as_str();
            let predicate = quad.predicate.as_ref();
            if let Some(class) = self.ontologies.class_by_uri(subject) {
                if predicate == SUB_CLASS_OF {
                    let super_class = self.object_class(file, quad)?;
                    let supers = &mut self.ontologies.class_mut(class).super_classes;
                    if !supers.contains(&super_class) {
                        supers.push(super_class);
                    }
                } else if predicate == NOTIFY {
                    self.ontologies.class_mut(class).notify = literal_bool(file, quad)?;
                } else if predicate == DOMAIN_INDEX {
                    let property = self.object_property(file, quad)?;
                    let indexes = &mut self.ontologies.class_mut(class).domain_indexes;
                    if !indexes.contains(&property) {
                        indexes.push(property);
                    }
                }
            }
            if let Some(property) = self.ontologies.property_by_uri(subject) {
                if predicate == DOMAIN {
                    let domain = self.object_class(file, quad)?;
                    self.ontologies.property_mut(property).domain = domain;
                } else if predicate == RANGE {
                    let range = self.object_class(file, quad)?;
                    self.ontologies.property_mut(property).range = range;
                } else if predicate == SUB_PROPERTY_OF {
                    let super_property = self.object_property(file, quad)?;
                    let supers = &mut self.ontologies.property_mut(property).super_properties;
                    if !supers.contains(&super_property) {
                        supers.push(super_property);
                    }
                } else if predicate == MAX_CARDINALITY {
                    let max = literal_int(file, quad)?;
                    self.ontologies.property_mut(property).multiple_values = max != 1;
                } else if predicate == INDEXED {
                    self.ontologies.property_mut(property).indexed = literal_bool(file, quad)?;
                } else if predicate == SECONDARY_INDEX {
                    let secondary = self.object_property(file, quad)?;
                    self.ontologies.property_mut(property).secondary_index = Some(secondary);
                } else if predicate == FULLTEXT_INDEXED {
                    self.ontologies.property_mut(property).fulltext_indexed =
                        literal_bool(file, quad)?;
                } else if predicate == WEIGHT {
                    let weight = literal_int(file, quad)?;
                    self.ontologies.property_mut(property).weight =
                        i32::try_from(weight).unwrap_or(i32::MAX);
                } else if predicate == TYPE
                    && object_uri(quad) == Some(INVERSE_FUNCTIONAL_PROPERTY.as_str())
                {
                    self.ontologies.property_mut(property).inverse_functional = true;
                }
            }
        }
        Ok(())
    }

    fn origin(&self, uri: &str) -> String {
        self.origin
            .get(uri)
            .cloned()
            .unwrap_or_else(|| "<ontology>".to_string())
    }

    fn finish(mut self) -> Result<Ontologies> {
        for (uri, prefix) in std::mem::take(&mut self.prefixes) {
            self.ontologies.add_namespace(&uri, &prefix);
        }
        self.name_entities()?;

        let resource = self
            .ontologies
            .class_by_uri(RESOURCE.as_str())
            .ok_or_else(|| StoreError::parse("base.ontology", "rdfs:Resource is not declared"))?;
        let classes: Vec<ClassIdx> = self.ontologies.classes().map(|(idx, _)| idx).collect();
        for class in classes {
            let c = self.ontologies.class_mut(class);
            if class != resource && c.super_classes.is_empty() {
                c.super_classes.push(resource);
            }
        }

        self.check_properties()?;
        self.check_cycles()?;
        self.check_domain_indexes()?;
        self.check_secondary_indexes()?;
        Ok(self.ontologies)
    }

    fn name_entities(&mut self) -> Result<()> {
        let mut names = Vec::new();
        for (idx, class) in self.ontologies.classes() {
            names.push((Some(idx), None, class.uri().to_string()));
        }
        for (idx, property) in self.ontologies.properties() {
            names.push((None, Some(idx), property.uri().to_string()));
        }
        for (class, property, uri) in names {
            let namespace = self.ontologies.namespace_for(&uri).ok_or_else(|| {
                StoreError::parse(
                    self.origin(&uri),
                    format!("<{}> is not in any declared namespace", uri),
                )
            })?;
            let name = format!("{}:{}", namespace.prefix, &uri[namespace.uri.len()..]);
            match (class, property) {
                (Some(class), _) => self.ontologies.set_class_name(class, name),
                (None, Some(property)) => self.ontologies.set_property_name(property, name),
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn check_properties(&mut self) -> Result<()> {
        let count = self.ontologies.class_count();
        let properties: Vec<PropertyIdx> = self.ontologies.properties().map(|(idx, _)| idx).collect();
        for idx in properties {
            let property = self.ontologies.property(idx);
            let uri = property.uri().to_string();
            if property.domain.0 >= count {
                return Err(StoreError::parse(
                    self.origin(&uri),
                    format!("property <{}> has no rdfs:domain", uri),
                ));
            }
            if property.range.0 >= count {
                return Err(StoreError::parse(
                    self.origin(&uri),
                    format!("property <{}> has no rdfs:range", uri),
                ));
            }
            let data_type = PropertyType::from_range(self.ontologies.class(property.range).uri());
            self.ontologies.property_mut(idx).data_type = data_type;
        }
        Ok(())
    }

    fn check_cycles(&self) -> Result<()> {
        let mut classes = DiGraph::<ClassIdx, ()>::new();
        let nodes: Vec<NodeIndex> = self
            .ontologies
            .classes()
            .map(|(idx, _)| classes.add_node(idx))
            .collect();
        for (idx, class) in self.ontologies.classes() {
            for super_class in class.super_classes() {
                classes.add_edge(nodes[idx.0], nodes[super_class.0], ());
            }
        }
        if let Err(cycle) = toposort(&classes, None) {
            let class = self.ontologies.class(classes[cycle.node_id()]);
            return Err(StoreError::parse(
                self.origin(class.uri()),
                format!("class <{}> inherits from itself", class.uri()),
            ));
        }

        let mut properties = DiGraph::<PropertyIdx, ()>::new();
        let nodes: Vec<NodeIndex> = self
            .ontologies
            .properties()
            .map(|(idx, _)| properties.add_node(idx))
            .collect();
        for (idx, property) in self.ontologies.properties() {
            for super_property in property.super_properties() {
                properties.add_edge(nodes[idx.0], nodes[super_property.0], ());
            }
        }
        if let Err(cycle) = toposort(&properties, None) {
            let property = self.ontologies.property(properties[cycle.node_id()]);
            return Err(StoreError::parse(
                self.origin(property.uri()),
                format!("property <{}> is its own super property", property.uri()),
            ));
        }
        Ok(())
    }

    fn check_domain_indexes(&mut self) -> Result<()> {
        let mut pairs = Vec::new();
        for (class_idx, class) in self.ontologies.classes() {
            for property_idx in class.domain_indexes() {
                pairs.push((class_idx, *property_idx));
            }
        }
        for (class_idx, property_idx) in pairs {
            let class = self.ontologies.class(class_idx);
            let property = self.ontologies.property(property_idx);
            if property.multiple_values {
                return Err(StoreError::parse(
                    self.origin(class.uri()),
                    format!(
                        "domain index of <{}> on multi-valued property <{}>",
                        class.uri(),
                        property.uri()
                    ),
                ));
            }
            if class_idx == property.domain || !self.ontologies.is_subclass_of(class_idx, property.domain) {
                return Err(StoreError::parse(
                    self.origin(class.uri()),
                    format!(
                        "<{}> is not a subclass of the domain of its domain index <{}>",
                        class.uri(),
                        property.uri()
                    ),
                ));
            }
            debug!("Domain index {} on {}", property.name(), class.name());
            let indexes = &mut self.ontologies.property_mut(property_idx).domain_indexes;
            if !indexes.contains(&class_idx) {
                indexes.push(class_idx);
            }
        }
        Ok(())
    }

    fn check_secondary_indexes(&self) -> Result<()> {
        for (_, property) in self.ontologies.properties() {
            let Some(secondary) = property.secondary_index else {
                continue;
            };
            let secondary = self.ontologies.property(secondary);
            if property.multiple_values
                || secondary.multiple_values
                || property.domain != secondary.domain
            {
                return Err(StoreError::parse(
                    self.origin(property.uri()),
                    format!(
                        "secondary index <{}> of <{}> must be single valued on the same domain",
                        secondary.uri(),
                        property.uri()
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::InlineOntology;

    const PREAMBLE: &str = "@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .\n\
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .\n\
        @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n\
        @prefix nrl: <http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#> .\n\
        @prefix ex: <http://example.org/ns#> .\n\
        ex: a nrl:Namespace ; nrl:prefix \"ex\" .\n";

    fn load_str(body: &str) -> Result<Ontologies> {
        let source = OntologySource::Inline(vec![InlineOntology {
            name: "test.ontology".into(),
            content: format!("{}{}", PREAMBLE, body),
        }]);
        load(&source).map(|(ontologies, _)| ontologies)
    }

    #[test]
    fn loads_classes_and_properties() {
        let ont = load_str(
            "ex:Person a rdfs:Class .\n\
             ex:Employee a rdfs:Class ; rdfs:subClassOf ex:Person .\n\
             ex:name a rdf:Property ; rdfs:domain ex:Person ; rdfs:range xsd:string ;\n\
                 nrl:maxCardinality 1 ; nrl:fulltextIndexed true ; nrl:weight 5 .\n\
             ex:email a rdf:Property ; rdfs:domain ex:Person ; rdfs:range xsd:string .\n",
        )
        .unwrap();
        let person = ont.find_class("http://example.org/ns#Person").unwrap();
        let employee = ont.find_class("http://example.org/ns#Employee").unwrap();
        assert_eq!(ont.class(person).name(), "ex:Person");
        assert!(ont.is_subclass_of(employee, person));
        assert_eq!(
            ont.class(person).super_classes(),
            &[ont.resource_class().unwrap()]
        );

        let name = ont.property(ont.find_property("http://example.org/ns#name").unwrap());
        assert!(!name.multiple_values());
        assert!(name.fulltext_indexed());
        assert_eq!(name.weight(), 5);
        assert_eq!(name.data_type(), PropertyType::String);
        let email = ont.find_property("http://example.org/ns#email").unwrap();
        assert!(ont.property(email).multiple_values());
        assert_eq!(ont.property_table(email), "ex:Person_ex:email");
    }

    #[test]
    fn rejects_missing_range() {
        let err = load_str(
            "ex:Person a rdfs:Class .\n\
             ex:name a rdf:Property ; rdfs:domain ex:Person .\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("rdfs:range"), "{}", err);
    }

    #[test]
    fn rejects_inheritance_cycles() {
        let err = load_str(
            "ex:A a rdfs:Class ; rdfs:subClassOf ex:B .\n\
             ex:B a rdfs:Class ; rdfs:subClassOf ex:A .\n",
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn rejects_unknown_namespace() {
        let err = load_str("<http://elsewhere.org/Thing> a rdfs:Class .\n").unwrap_err();
        assert!(err.to_string().contains("namespace"), "{}", err);
    }

    #[test]
    fn domain_index_must_target_a_subclass() {
        let ok = load_str(
            "ex:Person a rdfs:Class .\n\
             ex:Employee a rdfs:Class ; rdfs:subClassOf ex:Person ; nrl:domainIndex ex:name .\n\
             ex:name a rdf:Property ; rdfs:domain ex:Person ; rdfs:range xsd:string ; nrl:maxCardinality 1 .\n",
        )
        .unwrap();
        let name = ok.find_property("http://example.org/ns#name").unwrap();
        let employee = ok.find_class("http://example.org/ns#Employee").unwrap();
        assert_eq!(ok.property(name).domain_indexes(), &[employee]);
        assert!(ok.class_columns(employee).contains(&name));

        let err = load_str(
            "ex:Person a rdfs:Class .\n\
             ex:Robot a rdfs:Class ; nrl:domainIndex ex:name .\n\
             ex:name a rdf:Property ; rdfs:domain ex:Person ; rdfs:range xsd:string ; nrl:maxCardinality 1 .\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn inverse_functional_flag_is_read() {
        let ont = load_str(
            "ex:Person a rdfs:Class .\n\
             ex:ssn a rdf:Property, nrl:InverseFunctionalProperty ; rdfs:domain ex:Person ;\n\
                 rdfs:range xsd:string ; nrl:maxCardinality 1 .\n",
        )
        .unwrap();
        let ssn = ont.find_property("http://example.org/ns#ssn").unwrap();
        assert!(ont.property(ssn).inverse_functional());
    }
}
