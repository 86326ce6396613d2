//! RDF node and triple records as the persistence core sees them.
//!
//! Nodes are interned: storing the same term twice yields the same row and
//! identifier. Triples reference nodes by identifier only; resolving them
//! back to terms goes through the connection wrapper and its cache.

/// Identifier of an interned RDF term in the `nodes` table.
pub type NodeId = i64;
/// Identifier of a statement in the `triples` table.
pub type TripleId = i64;

/// An interned RDF term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A named resource.
    Uri {
        /// Row identifier.
        id: NodeId,
        /// The resource IRI.
        uri: String,
    },
    /// A literal value, optionally tagged with a language or a datatype node.
    Literal {
        /// Row identifier.
        id: NodeId,
        /// Lexical form of the literal.
        content: String,
        /// Language tag, if any.
        lang: Option<String>,
        /// Datatype node, if any. Counts as a node reference for reachability.
        ltype: Option<NodeId>,
    },
    /// An anonymous (blank) node.
    Anon {
        /// Row identifier.
        id: NodeId,
        /// Blank node label, unique within the store.
        label: String,
    },
}

impl Node {
    /// Row identifier of this term.
    pub fn id(&self) -> NodeId {
        match self {
            Node::Uri { id, .. } | Node::Literal { id, .. } | Node::Anon { id, .. } => *id,
        }
    }
}

/// A stored statement. `deleted` marks a soft-deleted row awaiting collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triple {
    /// Row identifier.
    pub id: TripleId,
    /// Subject node.
    pub subject: NodeId,
    /// Predicate node.
    pub predicate: NodeId,
    /// Object node.
    pub object: NodeId,
    /// Context (named graph) node, if any.
    pub context: Option<NodeId>,
    /// Node identifying the creator, if recorded.
    pub creator: Option<NodeId>,
    /// Whether the triple was produced by inference rather than asserted.
    pub inferred: bool,
    /// Soft-delete flag; set rows are invisible to queries until swept.
    pub deleted: bool,
}

/// Field values for a triple about to be stored.
#[derive(Debug, Clone, Copy)]
pub struct TripleSpec {
    /// Subject node.
    pub subject: NodeId,
    /// Predicate node.
    pub predicate: NodeId,
    /// Object node.
    pub object: NodeId,
    /// Context node, if any.
    pub context: Option<NodeId>,
    /// Creator node, if any.
    pub creator: Option<NodeId>,
    /// Inference provenance flag.
    pub inferred: bool,
}

impl TripleSpec {
    /// A base triple with no context, no creator and no inference flag.
    pub fn new(subject: NodeId, predicate: NodeId, object: NodeId) -> Self {
        Self {
            subject,
            predicate,
            object,
            context: None,
            creator: None,
            inferred: false,
        }
    }

    /// Sets the context node.
    pub fn context(mut self, context: NodeId) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the creator node.
    pub fn creator(mut self, creator: NodeId) -> Self {
        self.creator = Some(creator);
        self
    }

    /// Marks the triple as inferred.
    pub fn inferred(mut self, inferred: bool) -> Self {
        self.inferred = inferred;
        self
    }
}

/// A statement pattern; `None` fields are wildcards.
///
/// Soft-deleted rows never match. Inferred triples match only when
/// `include_inferred` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriplePattern {
    /// Subject to match, or wildcard.
    pub subject: Option<NodeId>,
    /// Predicate to match, or wildcard.
    pub predicate: Option<NodeId>,
    /// Object to match, or wildcard.
    pub object: Option<NodeId>,
    /// Context to match, or wildcard.
    pub context: Option<NodeId>,
    /// Whether inferred triples are part of the result.
    pub include_inferred: bool,
}

impl TriplePattern {
    /// The full wildcard pattern over asserted triples.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restricts the pattern to one subject.
    pub fn subject(mut self, subject: NodeId) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Restricts the pattern to one predicate.
    pub fn predicate(mut self, predicate: NodeId) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Restricts the pattern to one object.
    pub fn object(mut self, object: NodeId) -> Self {
        self.object = Some(object);
        self
    }

    /// Restricts the pattern to one context.
    pub fn context(mut self, context: NodeId) -> Self {
        self.context = Some(context);
        self
    }

    /// Includes or excludes inferred triples.
    pub fn include_inferred(mut self, include: bool) -> Self {
        self.include_inferred = include;
        self
    }
}
