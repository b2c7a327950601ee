//! Defines the configuration of a store: where its databases live, which ontology
//! it materializes and how the update engine is tuned.

use crate::ontology::OntologySource;
use crate::options::BlankNodes;
use anyhow::Result;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_MIN_FREE_SPACE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 100;
const MAIN_DATABASE: &str = "meta.db";

fn default_locale() -> String {
    ["LC_ALL", "LC_COLLATE", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "C".to_string())
}

fn default_statement_cache_size() -> usize {
    DEFAULT_STATEMENT_CACHE_SIZE
}

fn default_min_free_space() -> u64 {
    DEFAULT_MIN_FREE_SPACE
}

#[derive(Builder, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct Config {
    /// Directory holding the main database and one file per named graph.
    /// `None` keeps everything in memory.
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[builder(default)]
    #[serde(default)]
    pub ontology: OntologySource,
    #[builder(default)]
    #[serde(default)]
    pub blank_nodes: BlankNodes,
    // bytes that must stay free on the volume of `root` for a transaction to begin
    #[builder(default = "DEFAULT_MIN_FREE_SPACE")]
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
    #[builder(default = "DEFAULT_STATEMENT_CACHE_SIZE")]
    #[serde(default = "default_statement_cache_size")]
    pub statement_cache_size: usize,
    #[builder(default = "default_locale()")]
    #[serde(default = "default_locale")]
    pub locale: String,
    #[builder(default)]
    #[serde(default)]
    pub readonly: bool,
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.statement_cache_size == Some(0) {
            return Err("statement_cache_size must be at least 1".to_string());
        }
        if self.readonly == Some(true) && matches!(self.root, None | Some(None)) {
            return Err("a readonly store needs a root directory".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// An in-memory store materializing the given ontology source.
    pub fn in_memory(ontology: OntologySource) -> Self {
        Config {
            root: None,
            ontology,
            blank_nodes: BlankNodes::default(),
            min_free_space: DEFAULT_MIN_FREE_SPACE,
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            locale: default_locale(),
            readonly: false,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.root.is_none()
    }

    pub fn main_database_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(MAIN_DATABASE))
    }

    /// File backing a named graph; the name is hashed so any IRI maps to a valid file name.
    pub fn graph_database_path(&self, graph: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| {
            let hash = blake3::hash(graph.as_bytes());
            root.join(format!("{}.db", hash.to_hex()))
        })
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = Config::builder().build().unwrap();
        assert!(config.is_in_memory());
        assert_eq!(config.statement_cache_size, DEFAULT_STATEMENT_CACHE_SIZE);
        assert_eq!(config.min_free_space, DEFAULT_MIN_FREE_SPACE);
        assert_eq!(config.blank_nodes, BlankNodes::Named);
    }

    #[test]
    fn builder_rejects_readonly_in_memory() {
        assert!(Config::builder().readonly(true).build().is_err());
        assert!(Config::builder().statement_cache_size(0usize).build().is_err());
    }

    #[test]
    fn config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder()
            .root(dir.path().to_path_buf())
            .locale("en_US.UTF-8")
            .build()
            .unwrap();
        let file = dir.path().join("config.json");
        config.save_to_file(&file).unwrap();
        let loaded = Config::from_file(&file).unwrap();
        assert_eq!(config, loaded);
        assert_eq!(
            loaded.main_database_path(),
            Some(dir.path().join("meta.db"))
        );
    }

    #[test]
    fn graph_paths_are_stable() {
        let config = Config::builder().root(PathBuf::from("/tmp/store")).build().unwrap();
        let a = config.graph_database_path("http://example.org/g1").unwrap();
        let b = config.graph_database_path("http://example.org/g1").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, config.graph_database_path("http://example.org/g2").unwrap());
    }
}
