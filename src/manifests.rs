//! Seeds the object store from multi-document YAML manifests.

use std::path::Path;

use log::{debug, info};
use serde::Deserialize;
use serde_yaml::Value;

use crate::api::{Approval, IntegrationConfig, IntegrationJob, Object, Secret, ServiceAccount};
use crate::error::{OperatorError, Result};
use crate::store::{Client, ObjectStore};

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Config(IntegrationConfig),
    Job(IntegrationJob),
    Approval(Approval),
    Secret(Secret),
    ServiceAccount(ServiceAccount),
}

/// Parses every `---`-separated document. Each must name its `kind`.
///
/// # Errors
///
/// Returns [`OperatorError::Config`] for malformed YAML, a missing or
/// unsupported `kind`, or a document that does not match its kind.
pub fn parse_manifests(text: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for (idx, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(document)
            .map_err(|e| OperatorError::Config(format!("document {}: {}", idx + 1, e)))?;
        if value.is_null() {
            continue;
        }

        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| OperatorError::Config(format!("document {} has no kind", idx + 1)))?
            .to_string();

        let manifest = match kind.as_str() {
            IntegrationConfig::KIND => Manifest::Config(with_namespace(decode(value, idx)?)),
            IntegrationJob::KIND => Manifest::Job(with_namespace(decode(value, idx)?)),
            Approval::KIND => Manifest::Approval(with_namespace(decode(value, idx)?)),
            Secret::KIND => Manifest::Secret(with_namespace(decode(value, idx)?)),
            ServiceAccount::KIND => Manifest::ServiceAccount(with_namespace(decode(value, idx)?)),
            other => {
                return Err(OperatorError::Config(format!(
                    "document {}: unsupported kind {}",
                    idx + 1,
                    other
                )))
            }
        };
        manifests.push(manifest);
    }
    Ok(manifests)
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, idx: usize) -> Result<T> {
    serde_yaml::from_value(value)
        .map_err(|e| OperatorError::Config(format!("document {}: {}", idx + 1, e)))
}

fn with_namespace<T: Object>(mut obj: T) -> T {
    if obj.meta().namespace.is_empty() {
        obj.meta_mut().namespace = DEFAULT_NAMESPACE.to_string();
    }
    obj
}

/// Reads a manifest file, or every `.yaml`/`.yml` file of a directory in
/// name order.
pub fn load_path(path: &Path) -> Result<Vec<Manifest>> {
    if !path.is_dir() {
        let text = std::fs::read_to_string(path)?;
        return parse_manifests(&text).map_err(|e| {
            OperatorError::Config(format!("{}: {}", path.display(), e))
        });
    }

    let mut files: Vec<_> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    let mut manifests = Vec::new();
    for file in files {
        manifests.extend(load_path(&file)?);
    }
    Ok(manifests)
}

async fn create_missing<T: Object>(store: &dyn ObjectStore<T>, obj: T) -> Result<bool> {
    let key = obj.key();
    match store.create(obj).await {
        Ok(_) => {
            debug!("Applied {} {}", T::KIND, key);
            Ok(true)
        }
        Err(e) if e.is_already_exists() => {
            debug!("{} {} already exists, skipping", T::KIND, key);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Creates the objects that do not exist yet. Returns how many were created.
pub async fn apply(client: &Client, manifests: Vec<Manifest>) -> Result<usize> {
    let mut created = 0;
    for manifest in manifests {
        let applied = match manifest {
            Manifest::Config(obj) => create_missing(client.configs.as_ref(), obj).await?,
            Manifest::Job(obj) => create_missing(client.jobs.as_ref(), obj).await?,
            Manifest::Approval(obj) => create_missing(client.approvals.as_ref(), obj).await?,
            Manifest::Secret(obj) => create_missing(client.secrets.as_ref(), obj).await?,
            Manifest::ServiceAccount(obj) => {
                create_missing(client.service_accounts.as_ref(), obj).await?
            }
        };
        if applied {
            created += 1;
        }
    }
    info!("Applied {} manifests", created);
    Ok(created)
}
