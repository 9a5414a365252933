//! Attribute reconciliation
//!
//! Merges successive result messages from the extraction service into a
//! single authoritative field-value mapping. Two rules govern the merge:
//!
//! - **Sticky final**: once a field carries a `final` value, later partial
//!   updates never overwrite it.
//! - **Full final replacement**: a `FinalAttributes` message is the service's
//!   end-of-session authoritative sweep and replaces the entire mapping,
//!   including fields the partial stream populated differently or never
//!   populated at all.
//!
//! The corrected transcript is tracked alongside the mapping: the service's
//! text always replaces whatever was shown before.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::protocol::ResultMessage;

/// Whether a value came from an in-progress update or the final sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Partial,
    Final,
}

/// One reconciled value. At most one entry exists per case-folded name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    /// Field name as the service sent it (identity is case-insensitive).
    pub name: String,
    pub value: String,
    pub provenance: Provenance,
    pub updated_at: DateTime<Utc>,
}

/// Accumulates result messages into the current mapping for one session.
#[derive(Debug, Default)]
pub struct AttributeReconciler {
    /// Keyed by case-folded field name.
    entries: HashMap<String, FieldValue>,
    transcript: Option<String>,
}

impl AttributeReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one result message. Returns true when observable state changed
    /// (the mapping for attribute messages, the transcript for text).
    pub fn apply(&mut self, message: &ResultMessage) -> bool {
        match message {
            ResultMessage::PartialAttributes { mapping } => {
                let mut changed = false;
                for (name, value) in mapping {
                    let key = name.to_lowercase();
                    match self.entries.get(&key) {
                        // Final values are sticky against partial updates.
                        Some(existing) if existing.provenance == Provenance::Final => {}
                        Some(existing) if existing.value == *value => {}
                        _ => {
                            self.entries.insert(
                                key,
                                FieldValue {
                                    name: name.clone(),
                                    value: value.clone(),
                                    provenance: Provenance::Partial,
                                    updated_at: Utc::now(),
                                },
                            );
                            changed = true;
                        }
                    }
                }
                changed
            }
            ResultMessage::FinalAttributes { mapping } => {
                let now = Utc::now();
                log::info!(
                    "Final sweep: replacing {} reconciled entries with {} final values",
                    self.entries.len(),
                    mapping.len()
                );
                self.entries = mapping
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.to_lowercase(),
                            FieldValue {
                                name: name.clone(),
                                value: value.clone(),
                                provenance: Provenance::Final,
                                updated_at: now,
                            },
                        )
                    })
                    .collect();
                true
            }
            ResultMessage::CorrectedText { text } => {
                if self.transcript.as_deref() == Some(text.as_str()) {
                    false
                } else {
                    self.transcript = Some(text.clone());
                    true
                }
            }
        }
    }

    /// The current mapping, keyed by case-folded field name.
    pub fn mapping(&self) -> &HashMap<String, FieldValue> {
        &self.entries
    }

    /// Latest corrected transcript from the service, if any arrived.
    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all state for a new session.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.transcript = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(pairs: &[(&str, &str)]) -> ResultMessage {
        ResultMessage::PartialAttributes {
            mapping: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn final_msg(pairs: &[(&str, &str)]) -> ResultMessage {
        ResultMessage::FinalAttributes {
            mapping: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn later_partial_revises_earlier_partial() {
        let mut rec = AttributeReconciler::new();
        assert!(rec.apply(&partial(&[("name", "Jane")])));
        assert!(rec.apply(&partial(&[("name", "Jane Doe")])));

        let entry = &rec.mapping()["name"];
        assert_eq!(entry.value, "Jane Doe");
        assert_eq!(entry.provenance, Provenance::Partial);
    }

    #[test]
    fn identical_partial_is_not_a_change() {
        let mut rec = AttributeReconciler::new();
        assert!(rec.apply(&partial(&[("name", "Jane")])));
        assert!(!rec.apply(&partial(&[("name", "Jane")])));
    }

    #[test]
    fn final_value_is_sticky_against_partials() {
        let mut rec = AttributeReconciler::new();
        rec.apply(&final_msg(&[("name", "Jane Doe")]));
        assert!(!rec.apply(&partial(&[("name", "J")])));

        let entry = &rec.mapping()["name"];
        assert_eq!(entry.value, "Jane Doe");
        assert_eq!(entry.provenance, Provenance::Final);
    }

    #[test]
    fn final_sweep_replaces_the_entire_mapping() {
        let mut rec = AttributeReconciler::new();
        rec.apply(&partial(&[("email", "a@x.com")]));
        rec.apply(&final_msg(&[("name", "Jane Doe")]));

        // email is gone: the final sweep fully replaces accumulated state
        assert_eq!(rec.mapping().len(), 1);
        let entry = &rec.mapping()["name"];
        assert_eq!(entry.value, "Jane Doe");
        assert_eq!(entry.provenance, Provenance::Final);
    }

    #[test]
    fn later_final_overwrites_earlier_final() {
        let mut rec = AttributeReconciler::new();
        rec.apply(&final_msg(&[("name", "Jane")]));
        rec.apply(&final_msg(&[("name", "Jane Doe")]));
        assert_eq!(rec.mapping()["name"].value, "Jane Doe");
    }

    #[test]
    fn field_identity_is_case_folded() {
        let mut rec = AttributeReconciler::new();
        rec.apply(&partial(&[("Name", "Jane")]));
        rec.apply(&partial(&[("NAME", "Jane Doe")]));

        assert_eq!(rec.mapping().len(), 1);
        assert_eq!(rec.mapping()["name"].value, "Jane Doe");
        // Most recent spelling from the service is preserved
        assert_eq!(rec.mapping()["name"].name, "NAME");
    }

    #[test]
    fn corrected_text_replaces_transcript() {
        let mut rec = AttributeReconciler::new();
        assert!(rec.apply(&ResultMessage::CorrectedText {
            text: "helo world".to_string(),
        }));
        assert!(rec.apply(&ResultMessage::CorrectedText {
            text: "hello world".to_string(),
        }));
        assert_eq!(rec.transcript(), Some("hello world"));

        // repeated identical text is not a change
        assert!(!rec.apply(&ResultMessage::CorrectedText {
            text: "hello world".to_string(),
        }));
        // transcript updates never touch the mapping
        assert!(rec.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut rec = AttributeReconciler::new();
        rec.apply(&partial(&[("name", "Jane")]));
        rec.apply(&ResultMessage::CorrectedText {
            text: "hi".to_string(),
        });

        rec.reset();
        assert!(rec.is_empty());
        assert_eq!(rec.transcript(), None);
    }
}
