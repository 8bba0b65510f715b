//! Persistent template objects: the per-path handle and its cache.

pub mod cache;
pub mod handle;

pub use cache::TemplateCache;
pub use handle::{
    CacheReset, DataCascade, EntryMeta, Pagination, TemplateHandle, output_path_for,
};
