//! Band descriptors shared by every cube node.

use serde_derive::{Deserialize, Serialize};

/// One band of a cube's output. Every cube carries an ordered list
/// of these; operators that synthesize new bands (apply-pixel) build
/// fresh ones, operators that pass bands through (filter-predicate,
/// fill-time) copy them unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub unit: String,
    /// Nodata value, carried as a string since `"nan"` has no single
    /// canonical numeric encoding across source formats.
    pub nodata: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub scale: f64,
    pub offset: f64,
}

impl Band {
    pub fn new(name: impl Into<String>) -> Self {
        Band {
            name: name.into(),
            unit: String::new(),
            nodata: "nan".to_string(),
            element_type: "float64".to_string(),
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// The band's name, lower-cased for case-insensitive identifier
    /// resolution in the expression engine.
    pub fn lower_name(&self) -> String {
        self.name.to_lowercase()
    }
}
