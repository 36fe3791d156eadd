//! Adapter records and the registry contract
//!
//! An adapter is a small parameter delta (LoRA-style) layered over a shared
//! base model. Records are immutable once registered: publishing a change
//! means registering a new version under the same id.
//!
//! # Example
//!
//! ```rust
//! use loom_kernel::adapter::{AdapterKind, AdapterRecord};
//!
//! let record = AdapterRecord::builder("walmart-v", AdapterKind::Retailer)
//!     .version(3)
//!     .target("walmart")
//!     .compatible_with("llama-3-8b")
//!     .artifact("s3://adapters/walmart-v/3", "9f86d081884c7d65", 64 * 1024 * 1024)
//!     .build();
//!
//! assert!(record.serves("walmart"));
//! assert!(record.is_compatible_with("llama-3-8b"));
//! assert_eq!(record.adapter_ref().to_string(), "walmart-v@v3");
//! ```

pub mod error;
pub mod record;
pub mod trust;

pub use error::RegistryError;
pub use record::{
    AdapterKind, AdapterRecord, AdapterRecordBuilder, AdapterRef, ArtifactReference, Signature,
    VersionSelector,
};
pub use trust::SignatureVerifier;
