//! Magazine records as stored by the publishing back office.

use crate::reference::{DocumentReference, ReferenceError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MagazineStatus {
    #[default]
    Draft,
    Published,
}

/// One magazine issue. Only `pdf_url` feeds the viewing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagazineRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub issue_number: Option<u32>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub status: MagazineStatus,
}

impl MagazineRecord {
    /// Parse a record from its JSON row.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The document reference for this issue's PDF.
    pub fn document_reference(&self) -> Result<DocumentReference, ReferenceError> {
        DocumentReference::parse(self.pdf_url.as_deref().unwrap_or_default())
    }

    pub fn is_published(&self) -> bool {
        self.status == MagazineStatus::Published
    }
}
