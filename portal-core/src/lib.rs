pub mod batch;
mod client;
mod oauth;

pub use batch::{BatchError, BatchRequest, BatchResponse};
pub use client::{
    ApiErrorClass, FieldInfo, ItemKind, ItemTarget, PortalClient, PortalError, PortalItem,
};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
