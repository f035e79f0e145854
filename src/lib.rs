//! # cambium
//!
//! Persistent ordered collections built on a B+tree with structural
//! sharing and transient batch editing.
//!
//! ## Overview
//!
//! This library provides immutable, value-semantic ordered containers:
//!
//! - [`persistent::PersistentBTree`]: the ordered B+tree engine over an
//!   opaque element type with caller-supplied ordering and equality
//! - [`persistent::PersistentTreeSet`]: an ordered set façade
//! - [`persistent::PersistentTreeMap`]: an ordered map façade
//!
//! Every update returns a new logical version of the container while
//! sharing unmodified structure with the prior version. For batch
//! construction and batch mutation, each container can be forked into a
//! short-lived *transient* that applies a sequence of edits in place on
//! nodes it owns, then freezes back into a persistent value:
//!
//! ```rust
//! use cambium::persistent::PersistentTreeSet;
//!
//! let mut transient = PersistentTreeSet::new().transient();
//! for value in 0..1000 {
//!     transient.insert(value);
//! }
//! let set = transient.persistent();
//!
//! assert_eq!(set.len(), 1000);
//! assert!(set.contains(&764));
//!
//! // The frozen value behaves like any other persistent set.
//! let smaller = set.remove(&764);
//! assert!(set.contains(&764));      // Original unchanged
//! assert!(!smaller.contains(&764)); // New version
//! ```
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` for internal reference counting,
//!   making the collections shareable across threads
//! - `serde`: `Serialize`/`Deserialize` for the set and map façades

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// Re-exports the persistent collection types and their transient
/// counterparts.
///
/// # Usage
///
/// ```rust
/// use cambium::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;
