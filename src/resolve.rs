//! Inheritance-aware search for the directories a query can match.
//!
//! Attributes set on a directory hold for its whole subtree and cannot be
//! overridden further down, so once a field is decided on the way down it
//! stays decided. The resolver exploits this: it walks the tree breadth
//! first, reduces the query by every directory's own values and stops
//! descending as soon as the remainder is either satisfied (the whole
//! subtree qualifies) or impossible (the whole subtree is pruned).

use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{info, trace, warn};

use crate::datatype::ValueType;
use crate::error::Result;
use crate::evaluate::{Outcome, evaluate, residual};
use crate::field::{AttributeMap, FieldTypes, Scope};
use crate::query::{Conjunction, MetaQuery};
use crate::store::{NodeId, Store};
use crate::term::Term;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Every directory under the root qualifies.
    All,
    /// No directory under the root can qualify.
    None,
    /// Only the listed candidates can qualify.
    Explicit,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::None => write!(f, "None"),
            Self::Explicit => write!(f, "Explicit"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub selection: Selection,
    /// Directories that may hold matches; empty unless `Explicit`.
    pub candidates: RoaringTreemap,
    /// Query fields unknown to the directory scope, left for file lookup.
    pub unresolved_fields: Vec<String>,
}

struct Context {
    types: FieldTypes,
    set_fields: Vec<String>,
    sets: HashMap<String, Option<Conjunction>>,
}

pub struct Resolver<'s, S: Store + ?Sized> {
    store: &'s S,
}

impl<'s, S: Store + ?Sized> Resolver<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Find the directories at or below `root` that can satisfy the
    /// directory-scope part of `query`.
    pub fn resolve(&self, query: &MetaQuery, root: NodeId) -> Result<Resolution> {
        let types = self
            .store
            .field_defs(Scope::Directory)
            .inspect_err(|e| warn!("Could not read directory fields: {}", e))?;
        let unresolved_fields: Vec<String> = query
            .fields()
            .into_iter()
            .filter(|field| !types.contains_key(*field))
            .map(String::from)
            .collect();
        let projected = query
            .project(|field| types.contains_key(field))
            .expand_field_sets(&types, |name| self.store.field_set(name))?;
        let set_fields = types
            .iter()
            .filter(|(_, value_type)| **value_type == ValueType::FieldSet)
            .map(|(field, _)| field.clone())
            .collect();
        let mut context = Context {
            types,
            set_fields,
            sets: HashMap::new(),
        };

        let fields = self.fetched_fields(&projected, &context);
        let inherited = self
            .store
            .inherited_attributes(root, &fields)
            .inspect_err(|e| warn!("Could not read attributes inherited by {}: {}", root, e))?;
        let inherited = self.with_set_members(inherited, &mut context)?;

        let resolution = match residual(&projected, &inherited, &context.types)? {
            Outcome::Satisfied => Resolution {
                selection: Selection::All,
                candidates: RoaringTreemap::new(),
                unresolved_fields,
            },
            Outcome::Unsatisfiable => Resolution {
                selection: Selection::None,
                candidates: RoaringTreemap::new(),
                unresolved_fields,
            },
            Outcome::Pending(rest) => Resolution {
                selection: Selection::Explicit,
                candidates: self.walk(root, rest, &mut context)?,
                unresolved_fields,
            },
        };
        info!(
            "Resolved {} below {}: {} with {} candidates",
            query,
            root,
            resolution.selection,
            resolution.candidates.len()
        );
        Ok(resolution)
    }

    fn fetched_fields(&self, query: &MetaQuery, context: &Context) -> Vec<String> {
        let mut fields: Vec<String> = query.fields().into_iter().map(String::from).collect();
        for field in &context.set_fields {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    // a field set value stands for all of its members, nested sets included
    fn with_set_members(&self, mut attrs: AttributeMap, context: &mut Context) -> Result<AttributeMap> {
        let mut expanded: Vec<String> = Vec::new();
        while let Some(field) = context
            .set_fields
            .iter()
            .find(|field| attrs.contains_key(*field) && !expanded.contains(*field))
            .cloned()
        {
            let set_name = attrs.get(&field).map(|value| value.to_string()).unwrap_or_default();
            expanded.push(field);
            if !context.sets.contains_key(&set_name) {
                let members = self.store.field_set(&set_name)?;
                context.sets.insert(set_name.clone(), members);
            }
            if let Some(Some(members)) = context.sets.get(&set_name) {
                for (member, term) in members.terms() {
                    if let Term::Eq(value) = term {
                        attrs.entry(member.to_string()).or_insert_with(|| value.clone());
                    }
                }
            }
        }
        Ok(attrs)
    }

    fn walk(&self, root: NodeId, pending: MetaQuery, context: &mut Context) -> Result<RoaringTreemap> {
        let mut candidates = RoaringTreemap::new();
        // the root itself, with nothing left to define the open fields
        if evaluate(&pending, &AttributeMap::default(), &context.types)? {
            candidates.insert(root);
        }
        let pending = Rc::new(pending);
        let mut frontier: Vec<(NodeId, Rc<MetaQuery>)> = self
            .children_batch(&[root])?
            .into_iter()
            .flatten()
            .map(|child| (child, Rc::clone(&pending)))
            .collect();

        while !frontier.is_empty() {
            let nodes: Vec<NodeId> = frontier.iter().map(|(node, _)| *node).collect();
            let mut fields: Vec<String> = Vec::new();
            for (_, query) in &frontier {
                for field in self.fetched_fields(query, context) {
                    if !fields.contains(&field) {
                        fields.push(field);
                    }
                }
            }
            let owned = self
                .store
                .own_attributes_batch(&nodes, &fields)
                .inspect_err(|e| warn!("Could not read attributes of {} nodes: {}", nodes.len(), e))?;

            let mut descend = Vec::new();
            for ((node, query), own) in frontier.into_iter().zip(owned) {
                let rest = if own.is_empty() {
                    query
                } else {
                    let own = self.with_set_members(own, context)?;
                    match residual(&query, &own, &context.types)? {
                        Outcome::Satisfied => {
                            trace!("Node {} satisfies the query with its subtree", node);
                            candidates.insert(node);
                            candidates |= self
                                .store
                                .descendants(node)
                                .inspect_err(|e| warn!("Could not list the subtree of {}: {}", node, e))?;
                            continue;
                        }
                        Outcome::Unsatisfiable => {
                            trace!("Node {} contradicts the query, pruning its subtree", node);
                            continue;
                        }
                        Outcome::Pending(rest) => Rc::new(rest),
                    }
                };
                trace!("Node {} leaves {} open", node, rest);
                if evaluate(&rest, &AttributeMap::default(), &context.types)? {
                    candidates.insert(node);
                }
                descend.push((node, rest));
            }

            let parents: Vec<NodeId> = descend.iter().map(|(node, _)| *node).collect();
            let children = self.children_batch(&parents)?;
            frontier = descend
                .into_iter()
                .zip(children)
                .flat_map(|((_, rest), children)| {
                    children.into_iter().map(move |child| (child, Rc::clone(&rest)))
                })
                .collect();
        }
        Ok(candidates)
    }

    fn children_batch(&self, nodes: &[NodeId]) -> Result<Vec<Vec<NodeId>>> {
        self.store
            .children_batch(nodes)
            .inspect_err(|e| warn!("Could not list children of {} nodes: {}", nodes.len(), e))
    }
}
