//! In-memory entity graph handed to the engine for saving.
//!
//! Nodes live in an arena and are addressed by [`NodeIx`]; association edges
//! refer to their endpoints by index, so a graph may contain cycles without
//! any shared ownership.

use crate::schema::{Record, RowId};
use crate::types::*;

/// Any identity record that can sit in a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Item(RegistryItem),
    Version(RegistryVersion),
    Instance(RegistryInstance),
    DiscoveryItem(DiscoveryItem),
    Method(DiscoveryMethod),
    Url(DiscoveryUrl),
}

/// Apply `$body` to the record inside an `Entity`, whatever its variant.
macro_rules! with_record {
    ($entity:expr, $row:ident => $body:expr) => {
        match $entity {
            $crate::graph::Entity::Item($row) => $body,
            $crate::graph::Entity::Version($row) => $body,
            $crate::graph::Entity::Instance($row) => $body,
            $crate::graph::Entity::DiscoveryItem($row) => $body,
            $crate::graph::Entity::Method($row) => $body,
            $crate::graph::Entity::Url($row) => $body,
        }
    };
}
pub(crate) use with_record;

impl Entity {
    pub fn table(&self) -> &'static str {
        fn name_of<T: Record>(_: &T) -> &'static str {
            T::NAME
        }
        with_record!(self, row => name_of(row))
    }

    pub fn id(&self) -> RowId {
        with_record!(self, row => row.id())
    }

    pub fn set_id(&mut self, id: RowId) {
        with_record!(self, row => row.set_id(id))
    }
}

/// A record type that can be read back out of an [`Entity`].
pub trait GraphNode: Record + Into<Entity> {
    fn view(entity: &Entity) -> Option<&Self>;
    fn view_mut(entity: &mut Entity) -> Option<&mut Self>;
}

macro_rules! graph_node {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Entity {
            fn from(row: $ty) -> Self {
                Entity::$variant(row)
            }
        }

        impl GraphNode for $ty {
            fn view(entity: &Entity) -> Option<&Self> {
                match entity {
                    Entity::$variant(row) => Some(row),
                    _ => None,
                }
            }

            fn view_mut(entity: &mut Entity) -> Option<&mut Self> {
                match entity {
                    Entity::$variant(row) => Some(row),
                    _ => None,
                }
            }
        }
    };
}

graph_node!(RegistryItem, Item);
graph_node!(RegistryVersion, Version);
graph_node!(RegistryInstance, Instance);
graph_node!(DiscoveryItem, DiscoveryItem);
graph_node!(DiscoveryMethod, Method);
graph_node!(DiscoveryUrl, Url);

/// Index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIx(usize);

/// An association between two nodes of the same graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub kind: AssociationKind,
    pub left: NodeIx,
    pub right: NodeIx,
}

#[derive(Debug, Default)]
pub struct EntityGraph {
    nodes: Vec<Entity>,
    edges: Vec<Edge>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: impl Into<Entity>) -> NodeIx {
        self.nodes.push(entity.into());
        NodeIx(self.nodes.len() - 1)
    }

    /// Add an association edge. Linking the same pair twice is a no-op.
    pub fn link(&mut self, kind: AssociationKind, left: NodeIx, right: NodeIx) {
        debug_assert_eq!(
            kind.endpoints(),
            (self.nodes[left.0].table(), self.nodes[right.0].table()),
            "edge endpoints do not match {kind:?}"
        );
        let edge = Edge { kind, left, right };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    pub fn node(&self, ix: NodeIx) -> &Entity {
        &self.nodes[ix.0]
    }

    pub fn node_mut(&mut self, ix: NodeIx) -> &mut Entity {
        &mut self.nodes[ix.0]
    }

    /// Typed view of a node; `None` if the node holds another entity type.
    pub fn get<T: GraphNode>(&self, ix: NodeIx) -> Option<&T> {
        T::view(self.node(ix))
    }

    pub fn get_mut<T: GraphNode>(&mut self, ix: NodeIx) -> Option<&mut T> {
        T::view_mut(self.node_mut(ix))
    }

    /// Edges touching `ix`, in insertion order.
    pub fn edges_of(&self, ix: NodeIx) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|e| e.left == ix || e.right == ix)
            .copied()
            .collect()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
