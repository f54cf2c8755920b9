//! Shared types, error model, and configuration for schemalib.
//!
//! This crate is the foundation depended on by all other schemalib crates.
//! It provides:
//! - [`SchemaLibError`] and [`GatewayError`], the unified error types
//! - Domain types ([`EntityDescribe`], [`RelationshipMetadata`], [`RunId`], ...)
//! - Configuration ([`AppConfig`], the runtime configs, config loading)
//! - [`BackoffPolicy`] and atomic JSON/CSV helpers in [`io`]

pub mod annotation;
pub mod backoff;
pub mod config;
pub mod error;
pub mod io;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use annotation::{
    AnnotatedEntity, AutomationSummary, EdgeKind, EntityRelationshipSummary, FieldFillRate,
    FieldGrant, FlowInfo, GranteeKind, InboundEdge, ObjectGrant, ObjectSummary,
    RelationshipEdge, RelationshipMetadata, SecuritySummary, TriggerInfo, UsageSummary,
    ValidationRuleInfo, WorkflowRuleInfo,
};
pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use config::{
    AppConfig, CacheConfig, CorpusConfig, FetchConfig, GatewayConfig, UploadConfig, UsageConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{GatewayError, GatewayErrorKind, Result, SchemaLibError};
pub use types::{
    ChildRelationship, EntityDescribe, FetchMode, FieldDescribe, RunId, RunManifest, StageCounts,
    namespace_of,
};
