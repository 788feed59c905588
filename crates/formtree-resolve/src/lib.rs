//! Formtree resolution layer
//!
//! Per-node resolution used by the tree transform:
//! - [`CapabilityState`] / [`CapabilitySet`]: revision-slot extraction
//! - [`ReferenceResolver`]: shared-reference merging and copy-suffix remap
//! - [`SubTabResolver`]: effective sub-grouping via an inheritance chain
//! - [`ResolutionCache`]: injectable TTL cache of raw node payloads

pub mod cache;
pub mod capability;
pub mod reference;
pub mod subtab;

pub use cache::{CacheConfig, ResolutionCache};
pub use capability::{CapabilitySet, CapabilityState, DataSourceConfig};
pub use reference::{ReferenceResolver, ResolvedReference};
pub use subtab::{SubTabResolver, GENERAL_SUB_TAB_KEY, GENERAL_SUB_TAB_LABEL};
