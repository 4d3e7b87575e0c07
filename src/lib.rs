//! Embeddable permission resolution engine.
//!
//! Holders (users and groups) own sets of [`Node`]s: permission assertions
//! carrying a boolean value, optional expiry and contextual scoping. The
//! engine resolves a holder's effective permissions by walking its group
//! inheritance graph in weight order, memoizes every derived view, and keeps
//! those memos consistent across holders through a process-wide invalidation
//! coordinator.
//!
//! ```
//! use permlane::{Node, PermissionEngine, QueryContext, Tristate};
//!
//! let engine = PermissionEngine::new();
//! let admin = engine.create_group("admin");
//! admin.set_permission(Node::build("chat.color").build()).unwrap();
//!
//! let user = engine.create_user(uuid::Uuid::new_v4());
//! user.set_inherit_group("admin").unwrap();
//!
//! let resolved = user.inherits_permission(&Node::build("chat.color").build());
//! assert_eq!(resolved, Tristate::True);
//!
//! let exported = user.export_nodes(&QueryContext::allow_all(), true);
//! assert_eq!(exported.get("chat.color"), Some(&true));
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod holder;
pub mod node;

pub use config::SettingsConfig;
pub use context::{ContextSet, QueryContext};
pub use coordinator::StateCoordinator;
pub use engine::{EngineBuilder, PermissionEngine};
pub use error::{NodeOpError, NodeOpResult};
pub use events::{EventSink, NodeEvent, NodeEventKind, NoopEventSink};
pub use holder::{
    HolderKind, MetaView, PermissionHolder, Reference, ResolutionTrace, TemporaryModifier,
};
pub use node::{LocalizedNode, Node, NodeBuilder, Tristate};
