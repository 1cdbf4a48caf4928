//! Kubernetes object store capability
//!
//! The driver controller reads and writes cluster objects exclusively
//! through the [`ObjectStore`] trait:
//!
//! - [`KubeObjectStore`] talks to the API server through a kube client
//! - [`MockObjectStore`] (feature `test-util`) keeps everything in memory
//!
//! # Example
//!
//! ```no_run
//! use object_store::{KubeObjectStore, ObjectStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeObjectStore::new(client);
//! let gpu_nodes = store.list_nodes("nvidia.com/gpu.present=true").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod selector;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeObjectStore;
pub use error::StoreError;
pub use selector::{format_selector, LabelSelector};
pub use store_trait::ObjectStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockObjectStore, ObjectKey, WriteOp};
