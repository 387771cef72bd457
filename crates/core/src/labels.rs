//! Multi-valued resource labels

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Labels attached to a resource. A label key maps to one or more values;
/// the tenant label is single-valued by convention.
pub type Labels = HashMap<String, Vec<String>>;

/// A change applied to a resource's labels during an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LabelChange {
    Add { key: String, values: Vec<String> },
    Remove { key: String },
}

/// Returns the single tenant value for `tenant_key`, if the resource
/// carries one.
pub fn tenant_value<'a>(labels: &'a Labels, tenant_key: &str) -> Option<&'a str> {
    labels
        .get(tenant_key)
        .and_then(|values| values.first())
        .map(String::as_str)
}

pub fn apply_label_changes(labels: &mut Labels, changes: Vec<LabelChange>) {
    for change in changes {
        match change {
            LabelChange::Add { key, values } => {
                labels.entry(key).or_default().extend(values);
            }
            LabelChange::Remove { key } => {
                labels.remove(&key);
            }
        }
    }
}
