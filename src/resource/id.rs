//! Resource Identifiers
//!
//! Opaque addressing for any remote resource: a cloud path plus an API version.

use crate::error::{Error, Result};
use std::fmt;

const RESOURCE_TYPE_FORMAT_ERROR: &str =
    "`type` is invalid, it should be like `ResourceProvider/resourceTypes@ApiVersion`";

/// Address of a data-plane resource
///
/// The core never looks inside `cloud_path`; it is prefixed with `https://`
/// (unless it already carries a scheme) and sent as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    cloud_path: String,
    api_version: String,
}

impl ResourceId {
    /// Create a resource id, rejecting empty fields
    pub fn new(cloud_path: impl Into<String>, api_version: impl Into<String>) -> Result<Self> {
        let cloud_path = cloud_path.into();
        let api_version = api_version.into();

        if cloud_path.trim().is_empty() {
            return Err(Error::InvalidResourceId("cloud path is empty".to_string()));
        }
        if api_version.trim().is_empty() {
            return Err(Error::InvalidResourceId(format!(
                "api version is empty for `{}`",
                cloud_path
            )));
        }

        Ok(Self {
            cloud_path,
            api_version,
        })
    }

    /// Parse `host/path@api-version`
    pub fn parse(value: &str) -> Result<Self> {
        let Some((path, version)) = value.rsplit_once('@') else {
            return Err(Error::InvalidResourceId(format!(
                "`{}` is missing an `@apiVersion` suffix",
                value
            )));
        };
        Self::new(path, version)
    }

    pub fn cloud_path(&self) -> &str {
        &self.cloud_path
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Absolute request URL for this resource
    pub fn url(&self) -> String {
        to_url(&self.cloud_path)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cloud_path, self.api_version)
    }
}

/// Turn a cloud path into an absolute URL, defaulting to https
pub(crate) fn to_url(cloud_path: &str) -> String {
    if cloud_path.starts_with("https://") || cloud_path.starts_with("http://") {
        cloud_path.to_string()
    } else {
        format!("https://{}", cloud_path)
    }
}

/// Split `Provider/typeA/typeB@version` into (`Provider/typeA/typeB`, `version`)
pub fn parse_resource_type(value: &str) -> Result<(String, String)> {
    let Some((resource_type, api_version)) = value.split_once('@') else {
        return Err(Error::InvalidResourceId(RESOURCE_TYPE_FORMAT_ERROR.to_string()));
    };

    let valid = resource_type.contains('/')
        && resource_type.split('/').all(|part| !part.is_empty())
        && !api_version.is_empty();
    if !valid {
        return Err(Error::InvalidResourceId(RESOURCE_TYPE_FORMAT_ERROR.to_string()));
    }

    Ok((resource_type.to_string(), api_version.to_string()))
}

/// Build `/providers/Microsoft.Billing/billingAccounts/ba1/...`
pub fn build_tenant_scope_resource_id(resource_type: &str, names: &[&str]) -> Result<String> {
    build_resource_id("", resource_type, names)
}

/// Build `/subscriptions/{id}/providers/...`
pub fn build_subscription_scope_resource_id(
    subscription_id: &str,
    resource_type: &str,
    names: &[&str],
) -> Result<String> {
    build_resource_id(
        &format!("/subscriptions/{}", subscription_id),
        resource_type,
        names,
    )
}

/// Build `/providers/Microsoft.Management/managementGroups/{mg}/providers/...`
pub fn build_management_group_scope_resource_id(
    management_group: &str,
    resource_type: &str,
    names: &[&str],
) -> Result<String> {
    build_resource_id(
        &format!(
            "/providers/Microsoft.Management/managementGroups/{}",
            management_group
        ),
        resource_type,
        names,
    )
}

fn build_resource_id(scope: &str, resource_type: &str, names: &[&str]) -> Result<String> {
    let (resource_type, _) = parse_resource_type(resource_type)?;

    let mut parts = resource_type.split('/');
    // Already validated to have a provider segment
    let provider = parts.next().unwrap_or_default();
    let types: Vec<&str> = parts.collect();

    if types.len() != names.len() {
        return Err(Error::InvalidResourceId(format!(
            "number of resource names does not match the number of resource type parts, expected {}, got {}",
            types.len(),
            names.len()
        )));
    }

    let mut id = format!("{}/providers/{}", scope, provider);
    for (kind, name) in types.iter().zip(names) {
        id.push('/');
        id.push_str(kind);
        id.push('/');
        id.push_str(name);
    }
    Ok(id)
}
