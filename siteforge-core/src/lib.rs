//! Siteforge Core - deployment orchestration for generated static sites
//!
//! One canonical project/pages document model, deployed to any of four
//! hosting providers behind a common adapter interface:
//! - the built-in subdomain router (document-store only)
//! - Vercel (project + inline-file deployment)
//! - Cloudflare Pages (direct upload: sha256 manifest + stored zip)
//! - Firebase Hosting (version / populate / upload / finalize / release)
//!
//! Content hashing makes re-deploys idempotent where the provider supports
//! it, OAuth credentials refresh transparently, and provider outcomes are
//! reconciled back into the project record that the serving path reads.

pub mod credentials;
pub mod error;
pub mod hash;
pub mod http;
pub mod model;
pub mod operations;
pub mod package;
pub mod providers;
pub mod retry;
pub mod store;

pub use credentials::{
    AccessToken, CredentialManager, HttpTokenRefresher, OauthConfig, RefreshedToken, TokenRefresher,
};
pub use error::{DeployStage, ForgeError, Result};
pub use hash::{HashAlgorithm, HashSpec, Preprocess, content_hash, gzip_bytes};
pub use http::{ApiClient, ApiResponse};
pub use model::{
    CredentialRecord, Deployment, DeploymentStatus, Page, Project, Provider, ProviderDeployment,
};
pub use operations::{
    AuthStatus, DeployLocks, DeploySiteOperation, DeploySiteReport, DeploySiteRequest, PageInfo,
    ResolveContentOperation, ResolveContentOutcome, ResolveContentRequest, SiteStatusOperation,
    SiteStatusReport, content_type_for,
};
pub use package::{INDEX_PAGE, PackageBuilder, SiteFile, SitePackage, normalize_page_name};
pub use providers::{
    CloudflareAdapter, DeployOutcome, FirebaseAdapter, ProviderAdapter, ProviderRegistry,
    ProviderRegistryBuilder, SubdomainAdapter, VercelAdapter,
};
pub use providers::cloudflare::{CfDomain, merge_domains, pages_project_name};
pub use providers::firebase::{PreparedFile, plan_uploads, prepare_files};
pub use providers::subdomain::{sanitize_subdomain, validate_subdomain};
pub use retry::{RetryPolicy, retry};
pub use store::{DocumentStore, MemoryStore};
