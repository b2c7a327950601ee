//! Defines constant NamedNodeRefs for the vocabulary the ontology loader and the
//! update engine interpret: RDF, RDFS, XSD datatypes and the NRL extension terms.

use oxigraph::model::NamedNodeRef;

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";
pub const NRL_NS: &str = "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#";

// rdf
pub const TYPE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
pub const PROPERTY: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#Property");
pub const LANG_STRING: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/1999/02/22-rdf-syntax-ns#langString");
// rdfs
pub const RESOURCE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#Resource");
pub const CLASS: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#Class");
pub const LITERAL: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#Literal");
pub const SUB_CLASS_OF: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#subClassOf");
pub const SUB_PROPERTY_OF: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#subPropertyOf");
pub const DOMAIN: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#domain");
pub const RANGE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#range");
// xsd
pub const XSD_STRING: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2001/XMLSchema#string");
pub const XSD_BOOLEAN: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2001/XMLSchema#boolean");
pub const XSD_INTEGER: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2001/XMLSchema#integer");
pub const XSD_DOUBLE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2001/XMLSchema#double");
pub const XSD_DATE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2001/XMLSchema#date");
pub const XSD_DATE_TIME: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2001/XMLSchema#dateTime");
// nrl
pub const NAMESPACE: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#Namespace");
pub const PREFIX: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#prefix");
pub const NOTIFY: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#notify");
pub const DOMAIN_INDEX: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#domainIndex",
);
pub const MAX_CARDINALITY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#maxCardinality",
);
pub const INDEXED: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#indexed");
pub const SECONDARY_INDEX: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#secondaryIndex",
);
pub const FULLTEXT_INDEXED: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#fulltextIndexed",
);
pub const WEIGHT: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#weight");
pub const INVERSE_FUNCTIONAL_PROPERTY: NamedNodeRef<'_> = NamedNodeRef::new_unchecked(
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#InverseFunctionalProperty",
);
/// Creation time of a resource, stamped once per transaction.
pub const ADDED: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#added");
/// Modification sequence number of the last transaction touching a resource.
pub const MODIFIED: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#modified");

/// Prefix of the IRIs minted for generated blank nodes, followed by the row id.
pub const BLANK_NODE_PREFIX: &str = "urn:bnode:";

/// Name of the SQL function that maps datetime text onto a sortable number.
pub const TIME_SORT_FUNCTION: &str = "SparqlTimeSort";
/// Name of the locale-aware collation used by string columns.
pub const LOCALE_COLLATION: &str = "LOCALE";

pub const SCHEMA_VERSION: i64 = 1;
