//! Transactional repository port
//!
//! Typed persistence over [`Object`] with criteria queries, optimistic
//! updates keyed on `updated_at` and a transactional closure. The not-found
//! case is a dedicated variant so callers can distinguish it from storage
//! failures.

use async_trait::async_trait;
use futures::future::BoxFuture;
use sm_core::{LabelChange, Object, ResourceType, SmError};
use std::sync::Arc;

/// A single query predicate. Criteria in a list are ANDed.
#[derive(Debug, Clone)]
pub enum Criterion {
    Equals { field: String, value: String },
    In { field: String, values: Vec<String> },
    LabelEquals { key: String, value: String },
}

impl Criterion {
    pub fn by_field(field: impl Into<String>, value: impl Into<String>) -> Self {
        Criterion::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn by_field_in(field: impl Into<String>, values: Vec<String>) -> Self {
        Criterion::In {
            field: field.into(),
            values,
        }
    }

    pub fn by_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Criterion::LabelEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, object: &Object) -> bool {
        match self {
            Criterion::Equals { field, value } => {
                object.field(field).as_deref() == Some(value.as_str())
            }
            Criterion::In { field, values } => object
                .field(field)
                .map(|actual| values.iter().any(|v| v == &actual))
                .unwrap_or(false),
            Criterion::LabelEquals { key, value } => object
                .labels()
                .and_then(|labels| labels.get(key))
                .map(|values| values.iter().any(|v| v == value))
                .unwrap_or(false),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    /// Sentinel lookup miss, distinguishable from storage failures.
    #[error("{0} not found")]
    NotFound(ResourceType),

    /// Optimistic update clash; retriable.
    #[error("concurrent modification of {resource_type} {id}")]
    Concurrency { resource_type: ResourceType, id: String },

    #[error("resource {0} already exists")]
    AlreadyExists(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for SmError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(ty) => SmError::NotFound(ty.to_string()),
            RepositoryError::Concurrency { resource_type, id } => {
                SmError::Concurrency(format!("{resource_type} {id}"))
            }
            RepositoryError::AlreadyExists(id) => {
                SmError::Storage(format!("resource {id} already exists"))
            }
            RepositoryError::Storage(msg) => SmError::Storage(msg),
        }
    }
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch exactly one object; `NotFound` when nothing matches.
    async fn get(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<Object, RepositoryError>;

    async fn list(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<Vec<Object>, RepositoryError>;

    async fn count(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<usize, RepositoryError>;

    async fn create(&self, object: Object) -> Result<Object, RepositoryError>;

    /// Optimistic update: the stored row must still carry the `updated_at`
    /// the caller read, otherwise `Concurrency` is returned.
    async fn update(
        &self,
        object: Object,
        label_changes: Vec<LabelChange>,
    ) -> Result<Object, RepositoryError>;

    /// Delete everything matching; returns the number of removed rows.
    async fn delete(
        &self,
        resource_type: ResourceType,
        criteria: &[Criterion],
    ) -> Result<usize, RepositoryError>;
}

/// Work executed within a storage transaction.
pub type TxWork =
    Box<dyn FnOnce(Arc<dyn Repository>) -> BoxFuture<'static, Result<(), RepositoryError>> + Send>;

#[async_trait]
pub trait TransactionalRepository: Repository {
    async fn in_transaction(&self, work: TxWork) -> Result<(), RepositoryError>;
}
