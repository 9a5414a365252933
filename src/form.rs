//! Form schema types and projection
//!
//! A `FormSchema` is fetched out-of-band before recording starts and is
//! read-only here. `project()` pairs every field descriptor with the current
//! reconciled value (matched case-insensitively) to produce the `FilledForm`
//! consumed by rendering. Projection is pure: it never mutates the schema or
//! the mapping, and identical inputs yield identical output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::reconcile::FieldValue;

/// Field kinds supported by the form builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Date,
    Multiline,
}

/// A single named, typed field inside a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub field_name: String,
    pub field_type: FieldType,
}

/// An ordered group of fields under a heading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormBlock {
    pub block_name: String,
    pub fields: Vec<FieldDescriptor>,
}

/// The form definition as served by the schema API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    pub form_name: String,
    pub blocks: Vec<FormBlock>,
}

/// A field paired with its current value (empty string when unmatched).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledField {
    pub field_name: String,
    pub field_type: FieldType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledBlock {
    pub block_name: String,
    pub fields: Vec<FilledField>,
}

/// The view model emitted to the renderer whenever the mapping changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilledForm {
    pub form_name: String,
    pub blocks: Vec<FilledBlock>,
}

/// Project the reconciled mapping onto a schema.
///
/// The mapping is keyed by case-folded field name; a schema field matches a
/// mapping entry only when the folded names are identical. Unmatched fields
/// carry an empty value rather than being omitted.
pub fn project(schema: &FormSchema, mapping: &HashMap<String, FieldValue>) -> FilledForm {
    FilledForm {
        form_name: schema.form_name.clone(),
        blocks: schema
            .blocks
            .iter()
            .map(|block| FilledBlock {
                block_name: block.block_name.clone(),
                fields: block
                    .fields
                    .iter()
                    .map(|field| {
                        let value = mapping
                            .get(&field.field_name.to_lowercase())
                            .map(|entry| entry.value.clone())
                            .unwrap_or_default();
                        FilledField {
                            field_name: field.field_name.clone(),
                            field_type: field.field_type,
                            value,
                        }
                    })
                    .collect(),
            })
            .collect(),
    }
}
