//! Relation system - descriptors, registry, directives, connected keys
//!
//! - `descriptor`: canonical relation records and viewpoint projections
//! - `registry`: pairing and validation of declarations at startup
//! - `keys`: the tagged connect/disconnect directive encoding
//! - `connected`: reading recorded foreign keys off an entity

pub mod connected;
pub mod descriptor;
pub mod keys;
pub mod registry;

pub use connected::{all_connected_as_directives, all_connected_keys, connected_keys, entity_from_metadata};
pub use descriptor::{RelationDescriptor, RelationKind, RelationSide, RelationView};
pub use keys::{connect_one, ConnectOptions, Disconnect, Keys};
pub use registry::RelationRegistry;
