//! Formtree transformation layer
//!
//! The pure function at the center of the engine: a flat node array becomes
//! the Tabs → Sections → Fields view model the renderer consumes. Safe to
//! call repeatedly; same input, structurally equal output.

pub mod transform;
pub mod view;

pub use transform::{transform, VisibilityContext};
pub use view::{Field, FieldOption, Section, SectionLayout, Tab, Tree};
