//! Run namespace lifecycle.
//!
//! Namespaces created here carry the manager's prefix both in their
//! name and in a label. Deletion requires both to match, so a
//! confused or adversarial caller cannot destroy foreign namespaces
//! through this manager.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, ObjectMeta, PostParams, Preconditions};
use kube::{Api, Client, ResourceExt};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::BTreeMap;

use crate::error::{OperatorError, OperatorResult};

/// Label carrying the managing prefix. This is the authenticator for
/// safe deletion.
const LABEL_PREFIX: &str = "prefix";

/// Label carrying the custom name part the namespace was created with.
const LABEL_ID: &str = "id";

/// Symbols of the random name suffix.
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Contract for creating and deleting managed namespaces.
#[async_trait]
pub trait NamespaceManagement: Send + Sync {
    /// Create a uniquely named namespace and return the
    /// server-assigned name.
    async fn create(
        &self,
        custom_part: &str,
        annotations: &BTreeMap<String, String>,
    ) -> OperatorResult<String>;

    /// Delete a managed namespace. Succeeds when the namespace is
    /// already gone; refuses to touch foreign namespaces.
    async fn delete(&self, name: &str) -> OperatorResult<()>;
}

/// Manages namespaces under a fixed prefix.
#[derive(Clone)]
pub struct NamespaceManager {
    api: Api<Namespace>,
    prefix: String,
    suffix_length: u8,
}

impl NamespaceManager {
    /// Create a new namespace manager.
    pub fn new(client: Client, prefix: impl Into<String>, suffix_length: u8) -> Self {
        Self {
            api: Api::all(client),
            prefix: prefix.into(),
            suffix_length,
        }
    }
}

/// Assemble `prefix[-custom][-suffix]`, omitting empty parts.
fn generate_name(prefix: &str, custom_part: &str, suffix_length: u8) -> OperatorResult<String> {
    let suffix = generate_suffix(suffix_length)?;
    let parts: Vec<&str> = [prefix, custom_part, suffix.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    Ok(parts.join("-"))
}

#[async_trait]
impl NamespaceManagement for NamespaceManager {
    async fn create(
        &self,
        custom_part: &str,
        annotations: &BTreeMap<String, String>,
    ) -> OperatorResult<String> {
        let name = generate_name(&self.prefix, custom_part, self.suffix_length)?;

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name),
                labels: Some(BTreeMap::from([
                    (LABEL_PREFIX.to_string(), self.prefix.clone()),
                    (LABEL_ID.to_string(), custom_part.to_string()),
                ])),
                annotations: if annotations.is_empty() {
                    None
                } else {
                    Some(annotations.clone())
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let created = self.api.create(&PostParams::default(), &namespace).await?;
        tracing::info!(namespace = %created.name_any(), "Created namespace");
        Ok(created.name_any())
    }

    async fn delete(&self, name: &str) -> OperatorResult<()> {
        check_name_prefix(name, &self.prefix)?;

        let namespace = match self.api.get(name).await {
            Ok(namespace) => namespace,
            Err(kube::Error::Api(err)) if err.code == 404 => return Ok(()),
            Err(err) => {
                return Err(OperatorError::context(
                    format!("error getting namespace '{name}'"),
                    err.into(),
                ))
            }
        };

        if !is_managed(&namespace, &self.prefix) {
            return Err(OperatorError::NamespaceRefused {
                name: name.to_string(),
                reason: "not a Steward namespace (label mismatch)".to_string(),
            });
        }

        // The UID precondition makes a racing recreate fail the
        // delete instead of removing the new namespace.
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                uid: namespace.uid(),
                resource_version: None,
            }),
            ..Default::default()
        };

        match self.api.delete(name, &params).await {
            Ok(_) => {
                tracing::info!(namespace = %name, "Deleted namespace");
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(err) => Err(OperatorError::context(
                format!("error deleting namespace '{name}'"),
                err.into(),
            )),
        }
    }
}

/// Refuse names outside the managed prefix before any remote call.
fn check_name_prefix(name: &str, prefix: &str) -> OperatorResult<()> {
    if name.starts_with(prefix) {
        Ok(())
    } else {
        Err(OperatorError::NamespaceRefused {
            name: name.to_string(),
            reason: format!("name does not start with '{prefix}'"),
        })
    }
}

/// Whether a namespace carries the managing prefix label.
fn is_managed(namespace: &Namespace, prefix: &str) -> bool {
    namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_PREFIX))
        .map(|value| value == prefix)
        .unwrap_or(false)
}

/// Generate a random suffix of `length` characters over `[0-9a-z]`,
/// uniformly distributed, from the operating system's CSPRNG.
///
/// Length zero yields the empty string. Draw failures are surfaced.
fn generate_suffix(length: u8) -> OperatorResult<String> {
    if length == 0 {
        return Ok(String::new());
    }

    let length = length as usize;
    let mut suffix = String::with_capacity(length);
    let mut buf = [0u8; 64];

    // Rejection sampling: 252 is the largest multiple of 36 that fits
    // in a byte, so accepting only bytes below it keeps the symbol
    // distribution uniform.
    while suffix.len() < length {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|err| OperatorError::RandomSource(err.to_string()))?;
        for &byte in buf.iter() {
            if byte < 252 {
                suffix.push(SUFFIX_ALPHABET[(byte % 36) as usize] as char);
                if suffix.len() == length {
                    break;
                }
            }
        }
    }

    Ok(suffix)
}
