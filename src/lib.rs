//! Metaquery – the query engine of a hierarchical metadata catalog.
//!
//! Directories and files in a catalog namespace carry typed attributes
//! ("metadata fields"). Attributes set on a directory are inherited by its
//! whole subtree. Metaquery answers which parts of the namespace can satisfy
//! a boolean query such as
//!
//! ```text
//! Run = 2024 AND (Energy > 10 OR NOT Status = 'raw', 'calibrated')
//! ```
//!
//! without visiting the metadata of every node.
//!
//! ## Modules
//! * [`datatype`] – value types, typed scalars and the `Missing`/`Any` sentinels.
//! * [`field`] – field definitions, scopes and registration rules.
//! * [`term`] – constraints on one field and the algebra combining them.
//! * [`lexer`] – tokenizer for the query text, including the legacy form
//!   without connectives.
//! * [`normalize`] – recursive descent from tokens (or condition maps) into
//!   disjunctive normal form.
//! * [`query`] – the normalized [`query::MetaQuery`] and its conjunctions.
//! * [`optimize`] – removal of redundant disjuncts.
//! * [`evaluate`] – checking attribute maps against a query, fully or partially.
//! * [`store`] – the storage collaborator trait and an in-memory store.
//! * [`persist`] – a SQLite-backed store.
//! * [`resolve`] – the inheritance-aware tree walk producing candidate directories.
//! * [`settings`] – runtime settings.
//!
//! ## Normal Form
//! A [`query::MetaQuery`] is an OR of [`query::Conjunction`]s, each mapping
//! a field to a single [`term::Term`]. Negations never survive
//! normalization: they are pushed down to the operators of the atoms, and
//! two terms on the same field are merged as soon as they meet. A merge
//! that no value can satisfy is reported as a contradiction instead of
//! being stored.
//!
//! ## Quick Start
//! ```
//! use metaquery::datatype::{Scalar, ValueType};
//! use metaquery::evaluate::evaluate;
//! use metaquery::field::{AttributeMap, FieldTypes};
//! use metaquery::normalize::Normalizer;
//!
//! let mut types = FieldTypes::default();
//! types.insert("Size".to_string(), ValueType::Int);
//! let normalizer = Normalizer::new(types.clone());
//! let query = normalizer.normalize("Size > 100 AND NOT Status = 'raw'").unwrap();
//!
//! let mut attrs = AttributeMap::default();
//! attrs.insert("Size".to_string(), Scalar::Int(512));
//! attrs.insert("Status".to_string(), Scalar::from("calibrated"));
//! assert!(evaluate(&query, &attrs, &types).unwrap());
//! ```

pub mod datatype;
pub mod error;
pub mod evaluate;
pub mod field;
pub mod lexer;
pub mod normalize;
pub mod optimize;
pub mod persist;
pub mod query;
pub mod resolve;
pub mod settings;
pub mod store;
pub mod term;

pub use error::{MetaQueryError, Result};
pub use query::{Conjunction, MetaQuery};
