// Core data structures for the curator: records and annotation views

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Canonical name of the sentence segmentation view
pub const SENTENCE_VIEW: &str = "sentence";

/// Canonical name of the tokenization view
pub const TOKEN_VIEW: &str = "token";

/// A labelled character span over the raw text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Span {
    /// Inclusive start offset (bytes)
    pub start: usize,
    /// Exclusive end offset (bytes)
    pub ending: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl Span {
    /// Create an unlabelled span
    pub fn new(start: usize, ending: usize) -> Self {
        Self {
            start,
            ending,
            ..Default::default()
        }
    }

    /// Create a labelled span
    pub fn labelled(start: usize, ending: usize, label: impl Into<String>) -> Self {
        Self {
            start,
            ending,
            label: Some(label.into()),
            ..Default::default()
        }
    }
}

/// Flat span-label annotation (tokens, POS, chunks, named entities)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Labeling {
    pub labels: Vec<Span>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Labeling {
    pub fn new(labels: Vec<Span>, source: impl Into<String>) -> Self {
        Self {
            labels,
            source: source.into(),
            score: None,
        }
    }
}

/// Spans grouped into equivalence classes (coreference chains)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Clustering {
    pub clusters: Vec<Labeling>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A node in a parse tree; `children` maps child node index to edge label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Node {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<usize, String>,
}

/// A single tree, nodes addressed by index with `top` as the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub top: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Tree-structured annotation (constituency/dependency parses, SRL frames)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Forest {
    pub trees: Vec<Tree>,
    pub source: String,
}

/// Catch-all view for annotation kinds without a dedicated shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct View {
    pub source: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Which of the four view collections a view lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewCollection {
    Label,
    Cluster,
    Parse,
    Generic,
}

impl ViewCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Cluster => "cluster",
            Self::Parse => "parse",
            Self::Generic => "generic",
        }
    }
}

/// Per-document cache record: raw text plus every computed view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: String,
    pub raw_text: String,
    pub whitespaced: bool,
    #[serde(default)]
    pub label_views: HashMap<String, Labeling>,
    #[serde(default)]
    pub cluster_views: HashMap<String, Clustering>,
    #[serde(default)]
    pub parse_views: HashMap<String, Forest>,
    #[serde(default)]
    pub generic_views: HashMap<String, View>,
}

impl Record {
    /// Create an empty record for `raw_text`
    pub fn new(raw_text: impl Into<String>, whitespaced: bool) -> Self {
        let raw_text = raw_text.into();
        Self {
            identifier: record_identifier(&raw_text, whitespaced),
            raw_text,
            whitespaced,
            label_views: HashMap::new(),
            cluster_views: HashMap::new(),
            parse_views: HashMap::new(),
            generic_views: HashMap::new(),
        }
    }

    /// Collection holding `view_name`, if present anywhere
    pub fn collection_of(&self, view_name: &str) -> Option<ViewCollection> {
        if self.label_views.contains_key(view_name) {
            Some(ViewCollection::Label)
        } else if self.cluster_views.contains_key(view_name) {
            Some(ViewCollection::Cluster)
        } else if self.parse_views.contains_key(view_name) {
            Some(ViewCollection::Parse)
        } else if self.generic_views.contains_key(view_name) {
            Some(ViewCollection::Generic)
        } else {
            None
        }
    }

    pub fn contains_view(&self, view_name: &str) -> bool {
        self.collection_of(view_name).is_some()
    }

    /// Source tag stamped on `view_name`, searched in label, parse, cluster, generic order
    pub fn source_of(&self, view_name: &str) -> Option<&str> {
        self.label_views
            .get(view_name)
            .map(|v| v.source.as_str())
            .or_else(|| self.parse_views.get(view_name).map(|v| v.source.as_str()))
            .or_else(|| self.cluster_views.get(view_name).map(|v| v.source.as_str()))
            .or_else(|| self.generic_views.get(view_name).map(|v| v.source.as_str()))
    }

    /// Remove `view_name` from whichever collection holds it
    pub fn remove_view(&mut self, view_name: &str) -> Option<ViewCollection> {
        if self.label_views.remove(view_name).is_some() {
            Some(ViewCollection::Label)
        } else if self.cluster_views.remove(view_name).is_some() {
            Some(ViewCollection::Cluster)
        } else if self.parse_views.remove(view_name).is_some() {
            Some(ViewCollection::Parse)
        } else if self.generic_views.remove(view_name).is_some() {
            Some(ViewCollection::Generic)
        } else {
            None
        }
    }

    /// Names of every view present, across all four collections
    pub fn view_names(&self) -> Vec<String> {
        self.label_views
            .keys()
            .chain(self.cluster_views.keys())
            .chain(self.parse_views.keys())
            .chain(self.generic_views.keys())
            .cloned()
            .collect()
    }

    pub fn insert_labeling(&mut self, view_name: &str, labeling: Labeling) {
        self.remove_view(view_name);
        self.label_views.insert(view_name.to_string(), labeling);
    }

    pub fn insert_clustering(&mut self, view_name: &str, clustering: Clustering) {
        self.remove_view(view_name);
        self.cluster_views.insert(view_name.to_string(), clustering);
    }

    pub fn insert_forest(&mut self, view_name: &str, forest: Forest) {
        self.remove_view(view_name);
        self.parse_views.insert(view_name.to_string(), forest);
    }

    pub fn insert_view(&mut self, view_name: &str, view: View) {
        self.remove_view(view_name);
        self.generic_views.insert(view_name.to_string(), view);
    }

    /// Copy `view_name` from `other` into this record, keeping it in the same collection.
    ///
    /// Returns `false` when `other` does not hold the view.
    pub fn adopt_view(&mut self, view_name: &str, other: &Record) -> bool {
        if let Some(v) = other.label_views.get(view_name) {
            self.insert_labeling(view_name, v.clone());
        } else if let Some(v) = other.cluster_views.get(view_name) {
            self.insert_clustering(view_name, v.clone());
        } else if let Some(v) = other.parse_views.get(view_name) {
            self.insert_forest(view_name, v.clone());
        } else if let Some(v) = other.generic_views.get(view_name) {
            self.insert_view(view_name, v.clone());
        } else {
            return false;
        }
        true
    }

    /// Whether both records hold the same content for `view_name`, absent counting as equal
    pub fn same_view(&self, view_name: &str, other: &Record) -> bool {
        self.label_views.get(view_name) == other.label_views.get(view_name)
            && self.cluster_views.get(view_name) == other.cluster_views.get(view_name)
            && self.parse_views.get(view_name) == other.parse_views.get(view_name)
            && self.generic_views.get(view_name) == other.generic_views.get(view_name)
    }
}

/// Content-addressed identifier: SHA256 over the raw text and the whitespace flag
pub fn record_identifier(raw_text: &str, whitespaced: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_text.as_bytes());
    hasher.update([u8::from(whitespaced)]);
    format!("{:x}", hasher.finalize())
}
