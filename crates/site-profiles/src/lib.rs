//! Site profiles: the configuration side of the zen toolbar.
//!
//! A profile is pure data: which hosts it applies to, where the toolbar
//! anchor lives, which regions the buttons toggle, and the cosmetic CSS the
//! session injects. The engine never interprets selectors; it embeds them
//! verbatim into page-side expressions, so a profile that drifts out of sync
//! with its host degrades to no-ops instead of errors.

pub mod builtin;
pub mod errors;
pub mod model;

pub use builtin::{overleaf, texpage};
pub use errors::ProfileError;
pub use model::{ProfileSet, RegionSpec, SiteProfile};
