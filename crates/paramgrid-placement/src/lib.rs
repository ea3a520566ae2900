//! paramgrid-placement: placement engine and authorized config service.
//!
//! Places stored config versions onto nodes selected by label queries and
//! exposes authorized create/read/diff operations over the versioned store.
//!
//! # Architecture
//!
//! ```text
//! ConfigService
//!   ├── Authorizer / SchemaValidator / RelationshipNotifier
//!   ├── ConfigStore (versioned configs)
//!   └── PlacementEngine
//!       ├── NodeQuery (selectors → nodes)
//!       ├── PlacementStore (one task per node)
//!       └── Disseminator (apply-command per node)
//! ```
//!
//! Collaborators are capability traits injected at construction; the engine
//! keeps no authoritative state in memory.

pub mod collaborators;
pub mod command;
pub mod engine;
pub mod error;
pub mod service;

pub use collaborators::{
    Authorizer, Collaborators, Disseminator, NodeQuery, Permission, RelationshipNotifier, Resource,
    ResourceKind, SchemaValidator, Subject,
};
pub use command::{ApplyConfigGroupCommand, ApplyStandaloneConfigCommand, NodeCommand};
pub use engine::{PlacementEngine, PlacementSettings};
pub use error::{PlacementError, PlacementResult};
pub use service::ConfigService;
