//! In-memory field catalogue for testing.

use matchbook_core::environment::FieldDirectory;
use matchbook_core::store::{StoreError, StoreFuture};
use matchbook_core::types::{FieldId, FieldSummary};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory `FieldDirectory`.
///
/// Clones share the same catalogue, so a test can remove a field after handing
/// the directory to the engine.
#[derive(Clone, Debug, Default)]
pub struct InMemoryFieldDirectory {
    fields: Arc<RwLock<HashMap<FieldId, FieldSummary>>>,
}

impl InMemoryFieldDirectory {
    /// Create an empty catalogue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalogue pre-populated with [`sample_fields`].
    #[must_use]
    pub fn with_sample_fields() -> Self {
        let directory = Self::new();
        for field in sample_fields() {
            directory.insert(field);
        }
        directory
    }

    /// Add or replace a field.
    pub fn insert(&self, field: FieldSummary) {
        if let Ok(mut fields) = self.fields.write() {
            fields.insert(field.id.clone(), field);
        }
    }

    /// Remove a field from the catalogue.
    pub fn remove(&self, field_id: &FieldId) {
        if let Ok(mut fields) = self.fields.write() {
            fields.remove(field_id);
        }
    }
}

impl FieldDirectory for InMemoryFieldDirectory {
    fn field_summary<'a>(&'a self, field_id: &'a FieldId) -> StoreFuture<'a, Option<FieldSummary>> {
        Box::pin(async move {
            let fields = self
                .fields
                .read()
                .map_err(|_| StoreError::Unavailable("field directory lock poisoned".into()))?;
            Ok(fields.get(field_id).cloned())
        })
    }
}

/// Three fields used throughout the test suites.
#[must_use]
pub fn sample_fields() -> Vec<FieldSummary> {
    vec![
        FieldSummary {
            id: FieldId::new("field_001"),
            name: "Amman Sports Complex".into(),
            address: "Abdali, Amman, Jordan".into(),
        },
        FieldSummary {
            id: FieldId::new("field_002"),
            name: "Irbid Indoor Arena".into(),
            address: "University Street, Irbid, Jordan".into(),
        },
        FieldSummary {
            id: FieldId::new("field_003"),
            name: "Aqaba Beach Football".into(),
            address: "South Beach, Aqaba, Jordan".into(),
        },
    ]
}
