// used for persistence
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Error, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::datatype::{Scalar, ValueType};
use crate::error::{MetaQueryError, Result};
use crate::field::{AttributeMap, FieldDef, FieldHasher, FieldTypes, Registration, Scope, check_definition};
use crate::query::Conjunction;
use crate::store::{NodeId, ROOT, Store};
use crate::term::Term;

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Scalar::Int(i) => ToSqlOutput::from(*i),
            Scalar::Float(x) => ToSqlOutput::from(*x),
            Scalar::Str(s) => ToSqlOutput::from(s.as_str()),
            Scalar::Timestamp(_) => ToSqlOutput::from(self.to_string()),
        })
    }
}

impl FromSql for Scalar {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Scalar::Int(i)),
            ValueRef::Real(x) => Ok(Scalar::Float(x)),
            ValueRef::Text(_) => value.as_str().map(Scalar::from),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

// SQLite integers are signed
fn sql_id(node: NodeId) -> i64 {
    node as i64
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

// ids bound per statement, well below the SQLite variable limit
const BATCH_SIZE: usize = 500;

// first position of every requested node
fn positions(nodes: &[NodeId]) -> HashMap<i64, usize, FieldHasher> {
    let mut positions = HashMap::with_capacity_and_hasher(nodes.len(), FieldHasher::default());
    for (position, node) in nodes.iter().enumerate() {
        positions.entry(sql_id(*node)).or_insert(position);
    }
    positions
}

// ------------- Persistence -------------
/// A [`Store`] kept in a SQLite database.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub fn new(connection: Connection) -> Result<Self> {
        connection.execute_batch(
            "
            pragma foreign_keys = on;
            create table if not exists Node (
                Node_Identity integer not null,
                Parent_Identity integer null,
                Name text not null,
                constraint referenceable_Node_Identity primary key (
                    Node_Identity
                ),
                constraint Parent_is_Node foreign key (
                    Parent_Identity
                ) references Node(Node_Identity),
                constraint unique_Name_under_Parent unique (
                    Parent_Identity,
                    Name
                )
            );
            create table if not exists FieldDef (
                Field text not null,
                Scope text not null,
                ValueType text not null,
                constraint unique_and_referenceable_Field primary key (
                    Field
                )
            );
            create table if not exists Attribute (
                Node_Identity integer not null,
                Field text not null,
                Value blob not null,
                constraint Attribute_of_Node foreign key (
                    Node_Identity
                ) references Node(Node_Identity),
                constraint Attribute_is_FieldDef foreign key (
                    Field
                ) references FieldDef(Field),
                constraint unique_Attribute primary key (
                    Node_Identity,
                    Field
                )
            );
            create table if not exists FieldSetMember (
                FieldSet text not null,
                Field text not null,
                Value blob not null,
                constraint unique_FieldSetMember primary key (
                    FieldSet,
                    Field
                )
            );
            insert or ignore into Node (
                Node_Identity,
                Parent_Identity,
                Name
            ) values (1, null, '');
            ",
        )?;
        Ok(Self { db: connection })
    }

    fn known(&self, node: NodeId) -> Result<()> {
        self.db
            .prepare_cached("select 1 from Node where Node_Identity = ?")?
            .query_row(params![sql_id(node)], |_| Ok(()))
            .optional()?
            .ok_or_else(|| MetaQueryError::Store(format!("Unknown node {node}")))
    }

    fn child_named(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>> {
        Ok(self
            .db
            .prepare_cached(
                "
                select Node_Identity
                    from Node
                    where Parent_Identity = ?
                    and Name = ?
            ",
            )?
            .query_row(params![sql_id(parent), name], |r| r.get::<_, i64>(0))
            .optional()?
            .map(|id| id as NodeId))
    }

    /// Create a directory under `parent`.
    pub fn make_dir(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.known(parent)?;
        if name.is_empty() || name.contains('/') {
            return Err(MetaQueryError::Store(format!("Illegal directory name '{name}'")));
        }
        if self.child_named(parent, name)?.is_some() {
            return Err(MetaQueryError::Store(format!("Directory '{name}' already exists under {parent}")));
        }
        self.db
            .prepare_cached(
                "
                insert into Node (
                    Parent_Identity,
                    Name
                ) values (?, ?)
            ",
            )?
            .execute(params![sql_id(parent), name])?;
        let node = self.db.last_insert_rowid() as NodeId;
        debug!("Created directory '{}' as {} under {}", name, node, parent);
        Ok(node)
    }

    /// Create every missing directory along `path`.
    pub fn make_dirs(&self, path: &str) -> Result<NodeId> {
        let mut node = ROOT;
        for name in path.split('/').filter(|name| !name.is_empty()) {
            node = match self.child_named(node, name)? {
                Some(existing) => existing,
                None => self.make_dir(node, name)?,
            };
        }
        Ok(node)
    }

    pub fn find_dir(&self, path: &str) -> Result<Option<NodeId>> {
        let mut node = ROOT;
        for name in path.split('/').filter(|name| !name.is_empty()) {
            match self.child_named(node, name)? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    pub fn path_of(&self, node: NodeId) -> Result<String> {
        let mut names = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let (parent, name): (Option<i64>, String) = self
                .db
                .prepare_cached("select Parent_Identity, Name from Node where Node_Identity = ?")?
                .query_row(params![sql_id(id)], |r| Ok((r.get(0)?, r.get(1)?)))
                .optional()?
                .ok_or_else(|| MetaQueryError::Store(format!("Unknown node {id}")))?;
            if parent.is_some() {
                names.push(name);
            }
            current = parent.map(|id| id as NodeId);
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    pub fn set_attribute(&self, node: NodeId, field: &str, value: impl Into<Scalar>) -> Result<()> {
        self.known(node)?;
        let typed = self.checked_value(node, field, &value.into())?;
        self.db
            .prepare_cached(
                "
                insert or replace into Attribute (
                    Node_Identity,
                    Field,
                    Value
                ) values (?, ?, ?)
            ",
            )?
            .execute(params![sql_id(node), field, typed])?;
        Ok(())
    }

    /// Store a field set; members must be plain field values.
    pub fn define_field_set(&self, name: &str, members: &Conjunction) -> Result<()> {
        let types = self.all_field_types()?;
        let mut values = Vec::with_capacity(members.len());
        for (field, term) in members.terms() {
            let Term::Eq(value) = term else {
                return Err(MetaQueryError::FieldDefinition(format!(
                    "Field set '{name}' member '{field}' must be a plain value"
                )));
            };
            if !types.contains_key(field) {
                return Err(MetaQueryError::FieldDefinition(format!(
                    "Field set '{name}' uses the undefined field '{field}'"
                )));
            }
            values.push((field, value));
        }
        // a redefinition replaces every earlier member
        let transaction = self.db.unchecked_transaction()?;
        transaction.execute("delete from FieldSetMember where FieldSet = ?", params![name])?;
        {
            let mut insert = transaction.prepare_cached(
                "
                insert into FieldSetMember (
                    FieldSet,
                    Field,
                    Value
                ) values (?, ?, ?)
            ",
            )?;
            for (field, value) in values {
                insert.execute(params![name, field, value])?;
            }
        }
        transaction.commit()?;
        debug!("Defined field set '{}' with {} members", name, members.len());
        Ok(())
    }

    fn typed_attributes(&self, rows: Vec<(i64, String, Scalar)>) -> Result<Vec<(i64, String, Scalar)>> {
        let types = self.field_defs(Scope::Directory)?;
        Ok(rows
            .into_iter()
            .map(|(node, field, value)| {
                let value = match types.get(&field) {
                    Some(value_type) => value.coerce(*value_type).unwrap_or(value),
                    None => value,
                };
                (node, field, value)
            })
            .collect())
    }
}

impl Store for SqliteStore {
    fn field_defs(&self, scope: Scope) -> Result<FieldTypes> {
        let rows = self
            .db
            .prepare_cached("select Field, ValueType from FieldDef where Scope = ?")?
            .query_map(params![scope.name()], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(field, value_type)| Ok((field, value_type.parse::<ValueType>()?)))
            .collect()
    }

    fn add_field_def(&mut self, def: &FieldDef) -> Result<Registration> {
        let same = self.field_defs(def.scope())?;
        let other = self.field_defs(def.scope().other())?;
        let registration = check_definition(def, &same, &other)?;
        if registration == Registration::Added {
            self.db
                .prepare_cached(
                    "
                    insert into FieldDef (
                        Field,
                        Scope,
                        ValueType
                    ) values (?, ?, ?)
                ",
                )?
                .execute(params![def.name(), def.scope().name(), def.value_type().name()])?;
        }
        Ok(registration)
    }

    fn remove_field_def(&mut self, name: &str, scope: Scope) -> Result<bool> {
        let transaction = self.db.transaction()?;
        transaction.execute("delete from Attribute where Field = ?", params![name])?;
        let removed = transaction.execute(
            "delete from FieldDef where Field = ? and Scope = ?",
            params![name, scope.name()],
        )?;
        transaction.commit()?;
        Ok(removed > 0)
    }

    fn own_attributes(&self, node: NodeId, fields: &[String]) -> Result<AttributeMap> {
        self.known(node)?;
        Ok(self
            .own_attributes_batch(&[node], fields)?
            .pop()
            .unwrap_or_default())
    }

    fn own_attributes_batch(&self, nodes: &[NodeId], fields: &[String]) -> Result<Vec<AttributeMap>> {
        let mut maps = vec![AttributeMap::default(); nodes.len()];
        if nodes.is_empty() || fields.is_empty() {
            return Ok(maps);
        }
        let positions = positions(nodes);
        for chunk in nodes.chunks(BATCH_SIZE) {
            let sql = format!(
                "select Node_Identity, Field, Value from Attribute where Node_Identity in ({}) and Field in ({})",
                placeholders(chunk.len()),
                placeholders(fields.len())
            );
            let ids: Vec<i64> = chunk.iter().copied().map(sql_id).collect();
            let arguments: Vec<&dyn ToSql> = ids
                .iter()
                .map(|id| id as &dyn ToSql)
                .chain(fields.iter().map(|field| field as &dyn ToSql))
                .collect();
            let rows = self
                .db
                .prepare_cached(&sql)?
                .query_map(params_from_iter(arguments), |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
                .collect::<rusqlite::Result<Vec<(i64, String, Scalar)>>>()?;
            for (node, field, value) in self.typed_attributes(rows)? {
                if let Some(position) = positions.get(&node) {
                    maps[*position].insert(field, value);
                }
            }
        }
        Ok(maps)
    }

    fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .db
            .prepare_cached("select Node_Identity from Node where Parent_Identity = ? order by Node_Identity")?
            .query_map(params![sql_id(node)], |r| r.get::<_, i64>(0))?
            .map(|id| id.map(|id| id as NodeId))
            .collect::<rusqlite::Result<Vec<NodeId>>>()?)
    }

    fn children_batch(&self, nodes: &[NodeId]) -> Result<Vec<Vec<NodeId>>> {
        let mut lists = vec![Vec::new(); nodes.len()];
        let positions = positions(nodes);
        for chunk in nodes.chunks(BATCH_SIZE) {
            let sql = format!(
                "select Parent_Identity, Node_Identity from Node where Parent_Identity in ({}) order by Node_Identity",
                placeholders(chunk.len())
            );
            let ids: Vec<i64> = chunk.iter().copied().map(sql_id).collect();
            let rows = self
                .db
                .prepare_cached(&sql)?
                .query_map(params_from_iter(ids.iter()), |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<Vec<(i64, i64)>>>()?;
            for (parent, child) in rows {
                if let Some(position) = positions.get(&parent) {
                    lists[*position].push(child as NodeId);
                }
            }
        }
        Ok(lists)
    }

    fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        match self
            .db
            .prepare_cached("select Parent_Identity from Node where Node_Identity = ?")?
            .query_row(params![sql_id(node)], |r| r.get::<_, Option<i64>>(0))
        {
            Ok(parent) => Ok(parent.map(|id| id as NodeId)),
            Err(Error::QueryReturnedNoRows) => Err(MetaQueryError::Store(format!("Unknown node {node}"))),
            Err(err) => Err(err.into()),
        }
    }

    fn field_set(&self, name: &str) -> Result<Option<Conjunction>> {
        let members = self
            .db
            .prepare_cached("select Field, Value from FieldSetMember where FieldSet = ?")?
            .query_map(params![name], |r| Ok((r.get::<_, String>(0)?, r.get::<_, Scalar>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if members.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            members
                .into_iter()
                .map(|(field, value)| (field, Term::Eq(value)))
                .collect(),
        ))
    }
}
