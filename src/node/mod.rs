//! Permission nodes: immutable assertions with value, optional expiry and
//! contextual scoping.
//!
//! A node's permission string also encodes its kind through reserved
//! namespaces: `group.<name>` declares inheritance, `meta.<key>.<value>`,
//! `prefix.<priority>.<text>` and `suffix.<priority>.<text>` declare
//! metadata, and `weight.<n>` declares a group's inheritance weight.

pub mod comparator;
pub mod shorthand;

use crate::context::{self, ContextSet};
use chrono::Utc;

/// Result of a permission lookup, distinguishing "explicitly denied" from
/// "not set".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tristate {
    True,
    False,
    Undefined,
}

impl Tristate {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            Self::Undefined => None,
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

/// An immutable permission or metadata assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    permission: String,
    value: bool,
    expiry: Option<i64>,
    server: Option<String>,
    world: Option<String>,
    context: ContextSet,
}

impl Node {
    /// Start building a node for the given permission string.
    pub fn build(permission: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(permission)
    }

    /// Convenience: a true `group.<name>` inheritance node.
    pub fn group(name: &str) -> Node {
        Node::build(format!("group.{}", name.to_lowercase())).build()
    }

    pub fn permission(&self) -> &str {
        &self.permission
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn tristate(&self) -> Tristate {
        self.value.into()
    }

    /// Unix expiry timestamp, if temporary.
    pub fn expiry(&self) -> Option<i64> {
        self.expiry
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn world(&self) -> Option<&str> {
        self.world.as_deref()
    }

    pub fn context(&self) -> &ContextSet {
        &self.context
    }

    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    pub fn is_permanent(&self) -> bool {
        self.expiry.is_none()
    }

    pub fn has_expired(&self) -> bool {
        self.expiry.is_some_and(|at| at <= Utc::now().timestamp())
    }

    /// Seconds until expiry, zero if already expired or permanent.
    pub fn seconds_til_expiry(&self) -> i64 {
        self.expiry
            .map(|at| (at - Utc::now().timestamp()).max(0))
            .unwrap_or(0)
    }

    /// Copy of this node with a different expiry.
    pub fn with_expiry(&self, expiry: Option<i64>) -> Node {
        let mut node = self.clone();
        node.expiry = expiry;
        node
    }

    /// Whether the node is scoped to a specific server ("global" counts as
    /// unscoped).
    pub fn is_server_specific(&self) -> bool {
        self.server
            .as_deref()
            .is_some_and(|s| !s.eq_ignore_ascii_case("global"))
    }

    pub fn is_world_specific(&self) -> bool {
        self.world
            .as_deref()
            .is_some_and(|w| !w.eq_ignore_ascii_case("global"))
    }

    /// Equality ignoring value and the expiry instant, but distinguishing
    /// temporary from permanent nodes. Drives replacement and strict dedup.
    pub fn almost_equals(&self, other: &Node) -> bool {
        self.permission == other.permission
            && self.server == other.server
            && self.world == other.world
            && self.context == other.context
            && self.is_temporary() == other.is_temporary()
    }

    /// Equality ignoring value, expiry and temporary status. Drives
    /// temp-merged dedup, where a temporary grant collapses into a matching
    /// permanent one.
    pub fn equals_ignoring_value_or_temp(&self, other: &Node) -> bool {
        self.permission == other.permission
            && self.server == other.server
            && self.world == other.world
            && self.context == other.context
    }

    pub fn is_group_node(&self) -> bool {
        self.group_name().is_some()
    }

    /// The inherited group's name, for `group.<name>` nodes.
    pub fn group_name(&self) -> Option<&str> {
        namespace_rest(&self.permission, "group.")
    }

    pub fn is_meta(&self) -> bool {
        self.meta_entry().is_some()
    }

    /// The `(key, value)` pair of a `meta.<key>.<value>` node.
    pub fn meta_entry(&self) -> Option<(&str, &str)> {
        let rest = namespace_rest(&self.permission, "meta.")?;
        let (key, value) = rest.split_once('.')?;
        if key.is_empty() {
            return None;
        }
        Some((key, value))
    }

    pub fn is_prefix(&self) -> bool {
        self.prefix_entry().is_some()
    }

    /// The `(priority, text)` pair of a `prefix.<priority>.<text>` node.
    pub fn prefix_entry(&self) -> Option<(i64, &str)> {
        chat_meta_entry(&self.permission, "prefix.")
    }

    pub fn is_suffix(&self) -> bool {
        self.suffix_entry().is_some()
    }

    pub fn suffix_entry(&self) -> Option<(i64, &str)> {
        chat_meta_entry(&self.permission, "suffix.")
    }

    /// The declared weight of a `weight.<n>` node. Malformed declarations
    /// yield `None` and are skipped by the caller.
    pub fn weight_entry(&self) -> Option<i64> {
        namespace_rest(&self.permission, "weight.")?.parse().ok()
    }

    pub fn is_weight_node(&self) -> bool {
        namespace_rest(&self.permission, "weight.").is_some()
    }

    /// Whether this node applies on the given target server.
    ///
    /// A global query only matches unscoped nodes; a scoped node matches a
    /// scoped query by value (regex-aware); an unscoped node matches a
    /// scoped query only when `include_global` is set.
    pub fn applies_on_server(
        &self,
        server: Option<&str>,
        include_global: bool,
        apply_regex: bool,
    ) -> bool {
        match server {
            None => !self.is_server_specific(),
            Some(s) if s.is_empty() || s.eq_ignore_ascii_case("global") => {
                !self.is_server_specific()
            }
            Some(s) => {
                if self.is_server_specific() {
                    // is_server_specific implies the option is populated
                    self.server
                        .as_deref()
                        .is_some_and(|own| context::value_matches(own, s, apply_regex))
                } else {
                    include_global
                }
            }
        }
    }

    /// Whether this node applies on the given target world. Same shape as
    /// [`applies_on_server`](Self::applies_on_server).
    pub fn applies_on_world(
        &self,
        world: Option<&str>,
        include_global: bool,
        apply_regex: bool,
    ) -> bool {
        match world {
            None => !self.is_world_specific(),
            Some(w) if w.is_empty() || w.eq_ignore_ascii_case("global") => {
                !self.is_world_specific()
            }
            Some(w) => {
                if self.is_world_specific() {
                    self.world
                        .as_deref()
                        .is_some_and(|own| context::value_matches(own, w, apply_regex))
                } else {
                    include_global
                }
            }
        }
    }

    /// Whether the query context satisfies every pair this node requires.
    pub fn applies_with_context(&self, query: &ContextSet) -> bool {
        self.context.is_satisfied_by(query)
    }

    /// Annotate this node with the holder that directly owns it.
    pub fn localized(self, location: impl Into<String>) -> LocalizedNode {
        LocalizedNode::new(self, location)
    }
}

fn namespace_rest<'a>(permission: &'a str, namespace: &str) -> Option<&'a str> {
    if permission.len() <= namespace.len() {
        return None;
    }
    // get() rejects a split inside a multibyte character
    let prefix = permission.get(..namespace.len())?;
    if prefix.eq_ignore_ascii_case(namespace) {
        Some(&permission[namespace.len()..])
    } else {
        None
    }
}

fn chat_meta_entry<'a>(permission: &'a str, namespace: &str) -> Option<(i64, &'a str)> {
    let rest = namespace_rest(permission, namespace)?;
    let (priority, text) = rest.split_once('.')?;
    Some((priority.parse().ok()?, text))
}

/// Builder for [`Node`]. Value defaults to `true`.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    permission: String,
    value: bool,
    expiry: Option<i64>,
    server: Option<String>,
    world: Option<String>,
    context: ContextSet,
}

impl NodeBuilder {
    pub fn new(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            value: true,
            expiry: None,
            server: None,
            world: None,
            context: ContextSet::new(),
        }
    }

    pub fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    /// Deny form of the permission.
    pub fn negated(self) -> Self {
        self.value(false)
    }

    /// Absolute Unix expiry timestamp.
    pub fn expiry(mut self, at: i64) -> Self {
        self.expiry = Some(at);
        self
    }

    /// Expiry relative to now.
    pub fn expires_in(self, seconds: i64) -> Self {
        self.expiry(Utc::now().timestamp() + seconds)
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn world(mut self, world: impl Into<String>) -> Self {
        self.world = Some(world.into());
        self
    }

    pub fn with_context(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.context.add(key, value);
        self
    }

    pub fn context(mut self, context: ContextSet) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> Node {
        Node {
            permission: self.permission,
            value: self.value,
            expiry: self.expiry,
            server: self.server,
            world: self.world,
            context: self.context,
        }
    }
}

/// A node annotated with the name of the holder that directly owns it, as
/// opposed to the holder for whom resolution was requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalizedNode {
    node: Node,
    location: String,
}

impl LocalizedNode {
    pub fn new(node: Node, location: impl Into<String>) -> Self {
        Self {
            node,
            location: location.into(),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Name of the holder the node was inherited from.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn into_node(self) -> Node {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_almost_equals_ignores_value() {
        let allow = Node::build("chat.color").build();
        let deny = Node::build("chat.color").negated().build();
        assert!(allow.almost_equals(&deny));
        assert_ne!(allow, deny);
    }

    #[test]
    fn test_almost_equals_distinguishes_temporary() {
        let permanent = Node::build("fly").build();
        let temporary = Node::build("fly").expires_in(60).build();
        assert!(!permanent.almost_equals(&temporary));
        assert!(permanent.equals_ignoring_value_or_temp(&temporary));
    }

    #[test]
    fn test_almost_equals_respects_scoping() {
        let global = Node::build("fly").build();
        let scoped = Node::build("fly").server("lobby").build();
        assert!(!global.almost_equals(&scoped));
    }

    #[test]
    fn test_group_node_classification() {
        let node = Node::build("group.Moderator").build();
        assert!(node.is_group_node());
        assert_eq!(node.group_name(), Some("Moderator"));
        assert!(!Node::build("groupless").build().is_group_node());
        assert!(!Node::build("group.").build().is_group_node());
    }

    #[test]
    fn test_multibyte_permissions_classify_without_panicking() {
        // A multibyte character straddling the namespace length must not
        // split the string mid-character
        let node = Node::build("grou\u{20AC}x").build();
        assert!(!node.is_group_node());
        assert!(!node.is_meta());
        assert!(!node.is_prefix());
        assert!(!node.is_suffix());
        assert!(!node.is_weight_node());

        assert!(!Node::build("пре.фикс").build().is_prefix());
        assert!(!Node::build("wei\u{20AC}ht.5").build().is_weight_node());
        // Multibyte content after an ASCII namespace is fine
        assert_eq!(Node::build("group.админ").build().group_name(), Some("админ"));
    }

    #[test]
    fn test_meta_and_chat_meta_entries() {
        let meta = Node::build("meta.rank.captain").build();
        assert_eq!(meta.meta_entry(), Some(("rank", "captain")));

        let prefix = Node::build("prefix.100.[Admin]").build();
        assert_eq!(prefix.prefix_entry(), Some((100, "[Admin]")));
        assert!(!prefix.is_suffix());

        // Malformed priority is not a chat-meta node
        assert!(Node::build("prefix.high.[Admin]").build().prefix_entry().is_none());
    }

    #[test]
    fn test_weight_entry() {
        assert_eq!(Node::build("weight.50").build().weight_entry(), Some(50));
        let malformed = Node::build("weight.fifty").build();
        assert!(malformed.is_weight_node());
        assert_eq!(malformed.weight_entry(), None);
    }

    #[test]
    fn test_expiry() {
        let expired = Node::build("fly").expiry(Utc::now().timestamp() - 10).build();
        assert!(expired.has_expired());
        assert_eq!(expired.seconds_til_expiry(), 0);

        let live = Node::build("fly").expires_in(3600).build();
        assert!(!live.has_expired());
        assert!(live.seconds_til_expiry() > 3590);
    }

    #[test]
    fn test_applies_on_server() {
        let scoped = Node::build("fly").server("lobby").build();
        assert!(scoped.applies_on_server(Some("LOBBY"), false, false));
        assert!(!scoped.applies_on_server(Some("survival"), true, false));
        assert!(!scoped.applies_on_server(None, true, false));

        let global = Node::build("fly").build();
        assert!(global.applies_on_server(None, false, false));
        assert!(global.applies_on_server(Some("lobby"), true, false));
        assert!(!global.applies_on_server(Some("lobby"), false, false));

        // A literal "global" server value is treated as unscoped
        let pseudo = Node::build("fly").server("global").build();
        assert!(!pseudo.is_server_specific());
        assert!(pseudo.applies_on_server(None, false, false));
    }

    #[test]
    fn test_applies_on_server_regex() {
        let node = Node::build("fly").server("r=lobby-[0-9]+").build();
        assert!(node.applies_on_server(Some("lobby-7"), false, true));
        assert!(!node.applies_on_server(Some("lobby-x"), false, true));
        assert!(!node.applies_on_server(Some("lobby-7"), false, false));
    }

    #[test]
    fn test_applies_with_context() {
        let node = Node::build("fly").with_context("gamemode", "creative").build();
        let query = ContextSet::new()
            .with("gamemode", "creative")
            .with("dimension", "end");
        assert!(node.applies_with_context(&query));
        assert!(!node.applies_with_context(&ContextSet::new()));
    }
}
