//! Resource addressing
//!
//! Resources are addressed only by a cloud path and an API version; the client
//! never needs to know what kind of resource it is talking to.
//!
//! # Example
//!
//! ```ignore
//! use dataplane_client::resource::{build_subscription_scope_resource_id, ResourceId};
//!
//! let path = build_subscription_scope_resource_id(
//!     "00000000-0000-0000-0000-000000000000",
//!     "Microsoft.Sql/locations@2015-05-01-preview",
//!     &["westeurope"],
//! )?;
//! let id = ResourceId::new(format!("management.azure.com{}", path), "2015-05-01-preview")?;
//! ```

mod id;

pub use id::{
    build_management_group_scope_resource_id, build_subscription_scope_resource_id,
    build_tenant_scope_resource_id, parse_resource_type, ResourceId,
};
pub(crate) use id::to_url;
