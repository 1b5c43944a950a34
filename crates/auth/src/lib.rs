//! `keystone-auth`: stateless token authentication and RBAC authorization core.
//!
//! This crate is decoupled from HTTP and from any concrete storage. Stores,
//! caches and the policy engine are consumed through the capability traits in
//! [`store`] and [`policy`]; the `keystone-infra` crate provides adapters.

pub mod authorize;
pub mod claims;
pub mod config;
pub mod error;
pub mod issuer;
pub mod jose;
pub mod keys;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod resolver;
pub mod revocation;
pub mod roles;
pub mod store;
pub mod verifier;

#[cfg(test)]
mod fixtures;

pub use authorize::{AuthorizedRequest, Authorizer, AuthzError, Credentials};
pub use claims::{ClaimError, TokenClaims, TokenClass, TokenId, validate_claims};
pub use config::{AuthConfig, TokenIdStrategy, TtlPolicy};
pub use error::{ConfigurationError, StoreError};
pub use issuer::{IssuanceError, IssuedToken, TokenIssuer, TokenPair};
pub use keys::{EncryptionKeys, Jwk, KeyMaterial, KeyPair, KeyPurpose, SigningKeys};
pub use permissions::{PermissionDecision, PolicyRequest};
pub use policy::{PolicyEngine, PolicyError};
pub use principal::{PrincipalId, PrincipalRecord, PrincipalSnapshot};
pub use resolver::RoleResolver;
pub use revocation::{RevocationEntry, RevocationRegistry};
pub use roles::{Role, normalize_roles};
pub use store::{CredentialStore, PrincipalDirectory, RevocationStore, RoleCache, RoleStore};
pub use verifier::{TokenVerifier, VerificationError, VerificationState, VerifiedPair, VerifiedToken};
