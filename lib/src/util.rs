use crate::errors::{Position, Result, StoreError};
use crate::ontology::OntologySource;

use std::path::Path;

use oxigraph::io::{RdfFormat, RdfParseError, RdfParser};
use oxigraph::model::Quad;

use log::debug;
use walkdir::WalkDir;

/// Extension used by ontology definition files; they are Turtle.
pub const ONTOLOGY_EXTENSION: &str = "ontology";

const BASE_ONTOLOGY: &str = include_str!("ontology/base.ontology");

/// An RDF document read into memory, named for error reporting.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
    pub format: RdfFormat,
}

impl Document {
    pub fn parse(&self) -> Result<Vec<Quad>> {
        let parser = RdfParser::from_format(self.format).for_reader(self.content.as_slice());
        parser
            .map(|quad| quad.map_err(|e| parse_error(&self.name, e)))
            .collect()
    }
}

/// RDF format of a file, from an explicit list of extensions. Anything else is not RDF.
pub fn format_for_path(path: &Path) -> Option<RdfFormat> {
    let ext = path.extension().and_then(|ext| ext.to_str())?;
    match ext.to_ascii_lowercase().as_str() {
        ONTOLOGY_EXTENSION | "ttl" | "n3" => Some(RdfFormat::Turtle),
        "nt" => Some(RdfFormat::NTriples),
        "nq" => Some(RdfFormat::NQuads),
        "trig" => Some(RdfFormat::TriG),
        "rdf" | "owl" | "xml" => Some(RdfFormat::RdfXml),
        _ => None,
    }
}

pub fn read_document(path: &Path) -> Result<Document> {
    debug!("Reading file: {}", path.display());
    let format = format_for_path(path).ok_or_else(|| {
        StoreError::parse(path.display().to_string(), "unrecognized RDF file extension")
    })?;
    Ok(Document {
        name: path.display().to_string(),
        content: std::fs::read(path)?,
        format,
    })
}

/// Reads the base vocabulary followed by every document of `source`, in load order.
pub fn read_ontology_documents(source: &OntologySource) -> Result<Vec<Document>> {
    let mut documents = vec![Document {
        name: "base.ontology".to_string(),
        content: BASE_ONTOLOGY.as_bytes().to_vec(),
        format: RdfFormat::Turtle,
    }];
    match source {
        OntologySource::Directory(dir) => {
            let mut paths: Vec<_> = WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| format_for_path(path).is_some())
                .collect();
            paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
            for path in paths {
                documents.push(read_document(&path)?);
            }
        }
        OntologySource::Files(paths) => {
            for path in paths {
                documents.push(read_document(path)?);
            }
        }
        OntologySource::Inline(inline) => {
            for doc in inline {
                documents.push(Document {
                    name: doc.name.clone(),
                    content: doc.content.as_bytes().to_vec(),
                    format: RdfFormat::Turtle,
                });
            }
        }
    }
    Ok(documents)
}

/// Hash over names and contents; a changed checksum means the ontology must be re-diffed.
pub fn checksum(documents: &[Document]) -> String {
    let mut hasher = blake3::Hasher::new();
    for doc in documents {
        hasher.update(doc.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&doc.content);
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

pub fn parse_error(file: &str, err: RdfParseError) -> StoreError {
    match err {
        RdfParseError::Syntax(err) => StoreError::Parse {
            file: file.to_string(),
            position: err.location().map(|range| Position {
                line: range.start.line + 1,
                column: range.start.column + 1,
            }),
            message: err.to_string(),
        },
        other => StoreError::parse(file, other.to_string()),
    }
}

/// Quotes an SQL identifier; class and property names contain `:`.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column name usable inside an FTS5 table definition.
pub fn fts_column(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
