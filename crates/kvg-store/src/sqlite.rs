//! SQLite graph store.
//!
//! Version rows live in two append-only tables, `graph_objects` and
//! `graph_relationships`. The main line is stored with `branch_id = ''` so the
//! tenant predicate is a plain equality on every query. A unique index on
//! `(organization_id, project_id, branch_id, canonical_id, version)` backs the
//! chain compare-and-swap.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kvg_types::{
    Branch, BranchId, CanonicalId, ContentHash, GraphObject, GraphRelationship, MonotonicClock,
    OrganizationId, ProjectId, TenantContext, VersionId, VersionMeta,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
};

use crate::error::{StoreError, StoreResult};
use crate::filter::{EndpointMatch, HeadOrder, HeadPage, ObjectFilter, RelationshipFilter};
use crate::traits::{check_next_version, GraphReader, GraphStore, GraphTx};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS graph_objects (
    id              TEXT PRIMARY KEY,
    canonical_id    TEXT NOT NULL,
    supersedes_id   TEXT,
    version         INTEGER NOT NULL,
    organization_id TEXT NOT NULL,
    project_id      TEXT NOT NULL,
    branch_id       TEXT NOT NULL DEFAULT '',
    content_hash    TEXT NOT NULL,
    change_summary  TEXT NOT NULL,
    deleted_at      INTEGER,
    created_at      INTEGER NOT NULL,
    type            TEXT NOT NULL,
    key             TEXT,
    status          TEXT,
    properties      TEXT NOT NULL,
    labels          TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS graph_objects_chain
    ON graph_objects(organization_id, project_id, branch_id, canonical_id, version);
CREATE INDEX IF NOT EXISTS graph_objects_created
    ON graph_objects(organization_id, project_id, branch_id, created_at);
CREATE INDEX IF NOT EXISTS graph_objects_key
    ON graph_objects(organization_id, project_id, branch_id, type, key);

CREATE TABLE IF NOT EXISTS graph_relationships (
    id              TEXT PRIMARY KEY,
    canonical_id    TEXT NOT NULL,
    supersedes_id   TEXT,
    version         INTEGER NOT NULL,
    organization_id TEXT NOT NULL,
    project_id      TEXT NOT NULL,
    branch_id       TEXT NOT NULL DEFAULT '',
    content_hash    TEXT NOT NULL,
    change_summary  TEXT NOT NULL,
    deleted_at      INTEGER,
    created_at      INTEGER NOT NULL,
    type            TEXT NOT NULL,
    src_id          TEXT NOT NULL,
    dst_id          TEXT NOT NULL,
    properties      TEXT NOT NULL,
    weight          REAL NOT NULL DEFAULT 0,
    valid_from      INTEGER,
    valid_to        INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS graph_relationships_chain
    ON graph_relationships(organization_id, project_id, branch_id, canonical_id, version);
CREATE INDEX IF NOT EXISTS graph_relationships_created
    ON graph_relationships(organization_id, project_id, branch_id, created_at);
CREATE INDEX IF NOT EXISTS graph_relationships_src
    ON graph_relationships(organization_id, project_id, branch_id, src_id);
CREATE INDEX IF NOT EXISTS graph_relationships_dst
    ON graph_relationships(organization_id, project_id, branch_id, dst_id);

CREATE TABLE IF NOT EXISTS graph_branches (
    id               TEXT PRIMARY KEY,
    organization_id  TEXT NOT NULL,
    project_id       TEXT NOT NULL,
    name             TEXT NOT NULL,
    parent_branch_id TEXT,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    UNIQUE (organization_id, project_id, name)
);
"#;

const META_COLUMNS: &str = "id, canonical_id, supersedes_id, version, organization_id, \
     project_id, branch_id, content_hash, change_summary, deleted_at, created_at";

const OBJECT_TABLE: &str = "graph_objects";
const RELATIONSHIP_TABLE: &str = "graph_relationships";

fn object_columns() -> String {
    format!("{META_COLUMNS}, type, key, status, properties, labels")
}

fn relationship_columns() -> String {
    format!("{META_COLUMNS}, type, src_id, dst_id, properties, weight, valid_from, valid_to")
}

/// SQLite-backed graph store.
///
/// A single connection sits behind a `Mutex`. Writers open `BEGIN IMMEDIATE`
/// transactions; readers open deferred transactions that are rolled back once
/// the closure returns.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    clock: MonotonicClock,
    path: Option<PathBuf>,
}

impl SqliteGraphStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self::from_connection(conn, Some(path))?;
        tracing::debug!(path = ?store.path, "opened sqlite graph store");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        let clock = match max_timestamp(&conn)? {
            Some(floor) => MonotonicClock::starting_after(floor),
            None => MonotonicClock::new(),
        };
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            path,
        })
    }

    /// Database file path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn acquire(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl GraphStore for SqliteGraphStore {
    fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn GraphReader) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.acquire()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let session = SqliteSession {
            conn: &tx,
            clock: &self.clock,
        };
        f(&session)
    }

    fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn GraphTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.acquire()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let mut session = SqliteSession {
            conn: &tx,
            clock: &self.clock,
        };
        let value = f(&mut session)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

/// Latest timestamp written so far, used to seed the insert clock on reopen.
fn max_timestamp(conn: &Connection) -> StoreResult<Option<DateTime<Utc>>> {
    let micros: Option<i64> = conn.query_row(
        "SELECT MAX(ts) FROM (
            SELECT MAX(created_at) AS ts FROM graph_objects
            UNION ALL SELECT MAX(created_at) FROM graph_relationships
            UNION ALL SELECT MAX(deleted_at) FROM graph_objects
            UNION ALL SELECT MAX(deleted_at) FROM graph_relationships
            UNION ALL SELECT MAX(updated_at) FROM graph_branches
        )",
        [],
        |row| row.get(0),
    )?;
    micros.map(from_micros).transpose()
}

// ----------------------------------------------------------------------------
// Column codecs
// ----------------------------------------------------------------------------

fn branch_key(branch: Option<BranchId>) -> String {
    branch.map(|b| b.to_string()).unwrap_or_default()
}

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(value: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {value}")))
}

fn parse<T>(column: &str, value: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{column} '{value}': {e}")))
}

fn parse_branch(value: &str) -> StoreResult<Option<BranchId>> {
    if value.is_empty() {
        Ok(None)
    } else {
        parse("branch_id", value).map(Some)
    }
}

fn limit_param(limit: Option<usize>) -> i64 {
    limit
        .and_then(|l| i64::try_from(l).ok())
        .unwrap_or(-1)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation
    )
}

/// Raw header columns, decoded in a second step so codec errors surface as
/// [`StoreError::Corrupt`] rather than SQLite errors.
struct RawMeta {
    id: String,
    canonical_id: String,
    supersedes_id: Option<String>,
    version: i64,
    organization_id: String,
    project_id: String,
    branch_id: String,
    content_hash: String,
    change_summary: String,
    deleted_at: Option<i64>,
    created_at: i64,
}

impl RawMeta {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            canonical_id: row.get(1)?,
            supersedes_id: row.get(2)?,
            version: row.get(3)?,
            organization_id: row.get(4)?,
            project_id: row.get(5)?,
            branch_id: row.get(6)?,
            content_hash: row.get(7)?,
            change_summary: row.get(8)?,
            deleted_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn decode(self) -> StoreResult<VersionMeta> {
        Ok(VersionMeta {
            id: parse("id", &self.id)?,
            canonical_id: parse("canonical_id", &self.canonical_id)?,
            supersedes_id: self
                .supersedes_id
                .as_deref()
                .map(|s| parse("supersedes_id", s))
                .transpose()?,
            version: u32::try_from(self.version)
                .map_err(|_| StoreError::Corrupt(format!("version {}", self.version)))?,
            organization_id: parse("organization_id", &self.organization_id)?,
            project_id: parse("project_id", &self.project_id)?,
            branch_id: parse_branch(&self.branch_id)?,
            content_hash: ContentHash::from_hex(&self.content_hash)
                .map_err(|e| StoreError::Corrupt(format!("content_hash: {e}")))?,
            change_summary: serde_json::from_str(&self.change_summary)?,
            deleted_at: self.deleted_at.map(from_micros).transpose()?,
            created_at: from_micros(self.created_at)?,
        })
    }
}

struct RawObject {
    meta: RawMeta,
    object_type: String,
    key: Option<String>,
    status: Option<String>,
    properties: String,
    labels: String,
}

impl RawObject {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta: RawMeta::from_row(row)?,
            object_type: row.get(11)?,
            key: row.get(12)?,
            status: row.get(13)?,
            properties: row.get(14)?,
            labels: row.get(15)?,
        })
    }

    fn decode(self) -> StoreResult<GraphObject> {
        Ok(GraphObject {
            meta: self.meta.decode()?,
            object_type: self.object_type,
            key: self.key,
            status: self.status,
            properties: serde_json::from_str(&self.properties)?,
            labels: serde_json::from_str(&self.labels)?,
        })
    }
}

struct RawRelationship {
    meta: RawMeta,
    relationship_type: String,
    src_id: String,
    dst_id: String,
    properties: String,
    weight: f64,
    valid_from: Option<i64>,
    valid_to: Option<i64>,
}

impl RawRelationship {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta: RawMeta::from_row(row)?,
            relationship_type: row.get(11)?,
            src_id: row.get(12)?,
            dst_id: row.get(13)?,
            properties: row.get(14)?,
            weight: row.get(15)?,
            valid_from: row.get(16)?,
            valid_to: row.get(17)?,
        })
    }

    fn decode(self) -> StoreResult<GraphRelationship> {
        Ok(GraphRelationship {
            meta: self.meta.decode()?,
            relationship_type: self.relationship_type,
            src_id: parse("src_id", &self.src_id)?,
            dst_id: parse("dst_id", &self.dst_id)?,
            properties: serde_json::from_str(&self.properties)?,
            weight: self.weight,
            valid_from: self.valid_from.map(from_micros).transpose()?,
            valid_to: self.valid_to.map(from_micros).transpose()?,
        })
    }
}

const BRANCH_COLUMNS: &str =
    "id, organization_id, project_id, name, parent_branch_id, created_at, updated_at";

struct RawBranch {
    id: String,
    organization_id: String,
    project_id: String,
    name: String,
    parent_branch_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawBranch {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            project_id: row.get(2)?,
            name: row.get(3)?,
            parent_branch_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn decode(self) -> StoreResult<Branch> {
        Ok(Branch {
            id: parse("id", &self.id)?,
            organization_id: parse("organization_id", &self.organization_id)?,
            project_id: parse("project_id", &self.project_id)?,
            name: self.name,
            parent_branch_id: self
                .parent_branch_id
                .as_deref()
                .map(|s| parse("parent_branch_id", s))
                .transpose()?,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
        })
    }
}

// ----------------------------------------------------------------------------
// Query building
// ----------------------------------------------------------------------------

/// Conjunction of `WHERE` clauses with positional parameters.
struct Predicates {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Predicates {
    /// Start with the tenant predicate every query carries.
    fn scoped(alias: &str, ctx: &TenantContext) -> Self {
        Self {
            clauses: vec![format!(
                "{alias}.organization_id = ? AND {alias}.project_id = ? AND {alias}.branch_id = ?"
            )],
            params: vec![
                SqlValue::Text(ctx.organization_id.to_string()),
                SqlValue::Text(ctx.project_id.to_string()),
                SqlValue::Text(branch_key(ctx.branch_id)),
            ],
        }
    }

    fn push_clause(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = SqlValue>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    fn push_in(&mut self, column: &str, values: Vec<String>) {
        let marks = vec!["?"; values.len()].join(", ");
        self.push(
            format!("{column} IN ({marks})"),
            values.into_iter().map(SqlValue::Text),
        );
    }

    fn sql(&self) -> String {
        self.clauses.join(" AND ")
    }
}

fn head_clause(table: &str) -> String {
    format!(
        "o.version = (SELECT MAX(m.version) FROM {table} m \
         WHERE m.organization_id = o.organization_id AND m.project_id = o.project_id \
         AND m.branch_id = o.branch_id AND m.canonical_id = o.canonical_id)"
    )
}

fn push_time_bounds(
    preds: &mut Predicates,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
) {
    if let Some(after) = after {
        preds.push("o.created_at > ?", [SqlValue::Integer(micros(after))]);
    }
    if let Some(before) = before {
        preds.push("o.created_at < ?", [SqlValue::Integer(micros(before))]);
    }
}

fn object_predicates(ctx: &TenantContext, filter: &ObjectFilter) -> Predicates {
    let mut preds = Predicates::scoped("o", ctx);
    preds.push_clause(head_clause(OBJECT_TABLE));
    if !filter.include_deleted {
        preds.push_clause("o.deleted_at IS NULL");
    }
    if !filter.types.is_empty() {
        preds.push_in("o.type", filter.types.clone());
    }
    if let Some(key) = &filter.key {
        preds.push("o.key = ?", [SqlValue::Text(key.clone())]);
    }
    for label in &filter.labels {
        preds.push(
            "EXISTS (SELECT 1 FROM json_each(o.labels) WHERE json_each.value = ?)",
            [SqlValue::Text(label.clone())],
        );
    }
    push_time_bounds(&mut preds, filter.created_after, filter.created_before);
    preds
}

fn relationship_predicates(ctx: &TenantContext, filter: &RelationshipFilter) -> Predicates {
    let mut preds = Predicates::scoped("o", ctx);
    preds.push_clause(head_clause(RELATIONSHIP_TABLE));
    if !filter.include_deleted {
        preds.push_clause("o.deleted_at IS NULL");
    }
    if !filter.types.is_empty() {
        preds.push_in("o.type", filter.types.clone());
    }
    if let Some(src) = filter.src_id {
        preds.push("o.src_id = ?", [SqlValue::Text(src.to_string())]);
    }
    if let Some(dst) = filter.dst_id {
        preds.push("o.dst_id = ?", [SqlValue::Text(dst.to_string())]);
    }
    if let Some(endpoints) = &filter.endpoints {
        let ids: Vec<String> = endpoints.ids().iter().map(|id| id.to_string()).collect();
        let marks = vec!["?"; ids.len()].join(", ");
        match endpoints {
            EndpointMatch::Source(_) => preds.push_in("o.src_id", ids),
            EndpointMatch::Target(_) => preds.push_in("o.dst_id", ids),
            EndpointMatch::Either(_) => preds.push(
                format!("(o.src_id IN ({marks}) OR o.dst_id IN ({marks}))"),
                ids.iter()
                    .chain(ids.iter())
                    .map(|id| SqlValue::Text(id.clone())),
            ),
        }
    }
    push_time_bounds(&mut preds, filter.created_after, filter.created_before);
    preds
}

fn order_sql(page: HeadPage) -> &'static str {
    match page.order {
        HeadOrder::Ascending => "ORDER BY o.created_at ASC, o.canonical_id ASC",
        HeadOrder::Descending => "ORDER BY o.created_at DESC, o.canonical_id DESC",
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// One open transaction. Handed out as `&dyn GraphReader` for reads and as
/// `&mut dyn GraphTx` for writes.
struct SqliteSession<'a> {
    conn: &'a Connection,
    clock: &'a MonotonicClock,
}

impl SqliteSession<'_> {
    fn query_objects(&self, sql: &str, params: Vec<SqlValue>) -> StoreResult<Vec<GraphObject>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params_from_iter(params), RawObject::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawObject::decode).collect()
    }

    fn query_relationships(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> StoreResult<Vec<GraphRelationship>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params_from_iter(params), RawRelationship::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawRelationship::decode).collect()
    }

    fn count(&self, table: &str, preds: Predicates) -> StoreResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {table} o WHERE {}", preds.sql());
        let n: i64 = self
            .conn
            .query_row(&sql, params_from_iter(preds.params), |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn chain_sql(table: &str, columns: &str, before_version: Option<u32>) -> String {
        let bound = if before_version.is_some() {
            " AND o.version < ?"
        } else {
            ""
        };
        format!(
            "SELECT {columns} FROM {table} o \
             WHERE o.organization_id = ? AND o.project_id = ? AND o.branch_id = ? \
             AND o.canonical_id = ?{bound} ORDER BY o.version DESC LIMIT ?"
        )
    }

    fn chain_params(
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> Vec<SqlValue> {
        let mut params = Predicates::scoped("o", ctx).params;
        params.push(SqlValue::Text(canonical_id.to_string()));
        if let Some(before) = before_version {
            params.push(SqlValue::Integer(i64::from(before)));
        }
        params.push(SqlValue::Integer(limit_param(limit)));
        params
    }

    fn locate(&self, table: &str, column: &str, id: String) -> StoreResult<Option<TenantContext>> {
        let sql = format!(
            "SELECT organization_id, project_id, branch_id FROM {table} WHERE {column} = ?1 LIMIT 1"
        );
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(&sql, params![id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;
        row.map(|(org, project, branch)| {
            Ok(TenantContext {
                organization_id: parse::<OrganizationId>("organization_id", &org)?,
                project_id: parse::<ProjectId>("project_id", &project)?,
                branch_id: parse_branch(&branch)?,
            })
        })
        .transpose()
    }

    fn latest_version(
        &self,
        table: &str,
        meta: &VersionMeta,
    ) -> StoreResult<Option<u32>> {
        let sql = format!(
            "SELECT MAX(version) FROM {table} \
             WHERE organization_id = ?1 AND project_id = ?2 AND branch_id = ?3 \
             AND canonical_id = ?4"
        );
        let latest: Option<i64> = self.conn.query_row(
            &sql,
            params![
                meta.organization_id.to_string(),
                meta.project_id.to_string(),
                branch_key(meta.branch_id),
                meta.canonical_id.to_string(),
            ],
            |row| row.get(0),
        )?;
        Ok(latest.and_then(|v| u32::try_from(v).ok()))
    }

    fn map_insert_error(err: rusqlite::Error, meta: &VersionMeta) -> StoreError {
        if is_constraint_violation(&err) {
            StoreError::VersionConflict {
                canonical_id: meta.canonical_id,
                version: meta.version,
            }
        } else {
            StoreError::Sqlite(err)
        }
    }

    fn meta_values(meta: &VersionMeta) -> StoreResult<Vec<SqlValue>> {
        Ok(vec![
            SqlValue::Text(meta.id.to_string()),
            SqlValue::Text(meta.canonical_id.to_string()),
            meta.supersedes_id
                .map_or(SqlValue::Null, |id| SqlValue::Text(id.to_string())),
            SqlValue::Integer(i64::from(meta.version)),
            SqlValue::Text(meta.organization_id.to_string()),
            SqlValue::Text(meta.project_id.to_string()),
            SqlValue::Text(branch_key(meta.branch_id)),
            SqlValue::Text(meta.content_hash.to_hex()),
            SqlValue::Text(serde_json::to_string(&meta.change_summary)?),
            meta.deleted_at
                .map_or(SqlValue::Null, |ts| SqlValue::Integer(micros(ts))),
            SqlValue::Integer(micros(meta.created_at)),
        ])
    }

    fn branch_query(&self, clause: &str, params: Vec<SqlValue>) -> StoreResult<Vec<Branch>> {
        let sql = format!(
            "SELECT {BRANCH_COLUMNS} FROM graph_branches \
             WHERE {clause} ORDER BY created_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(params), RawBranch::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawBranch::decode).collect()
    }

    fn project_params(ctx: &TenantContext) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(ctx.organization_id.to_string()),
            SqlValue::Text(ctx.project_id.to_string()),
        ]
    }
}

impl GraphReader for SqliteSession<'_> {
    fn object_version(
        &self,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<GraphObject>> {
        let mut preds = Predicates::scoped("o", ctx);
        preds.push("o.id = ?", [SqlValue::Text(id.to_string())]);
        let sql = format!(
            "SELECT {} FROM {OBJECT_TABLE} o WHERE {}",
            object_columns(),
            preds.sql()
        );
        Ok(self.query_objects(&sql, preds.params)?.into_iter().next())
    }

    fn latest_object(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphObject>> {
        Ok(self
            .object_chain(ctx, canonical_id, None, Some(1))?
            .into_iter()
            .next())
    }

    fn object_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphObject>> {
        let sql = Self::chain_sql(OBJECT_TABLE, &object_columns(), before_version);
        self.query_objects(
            &sql,
            Self::chain_params(ctx, canonical_id, before_version, limit),
        )
    }

    fn object_heads(
        &self,
        ctx: &TenantContext,
        filter: &ObjectFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphObject>> {
        let mut preds = object_predicates(ctx, filter);
        let sql = format!(
            "SELECT {} FROM {OBJECT_TABLE} o WHERE {} {} LIMIT ?",
            object_columns(),
            preds.sql(),
            order_sql(page)
        );
        preds.params.push(SqlValue::Integer(limit_param(page.limit)));
        self.query_objects(&sql, preds.params)
    }

    fn count_object_heads(&self, ctx: &TenantContext, filter: &ObjectFilter) -> StoreResult<usize> {
        self.count(OBJECT_TABLE, object_predicates(ctx, filter))
    }

    fn locate_object(&self, id: VersionId) -> StoreResult<Option<TenantContext>> {
        self.locate(OBJECT_TABLE, "id", id.to_string())
    }

    fn locate_object_chain(&self, canonical_id: CanonicalId) -> StoreResult<Option<TenantContext>> {
        self.locate(OBJECT_TABLE, "canonical_id", canonical_id.to_string())
    }

    fn relationship_version(
        &self,
        ctx: &TenantContext,
        id: VersionId,
    ) -> StoreResult<Option<GraphRelationship>> {
        let mut preds = Predicates::scoped("o", ctx);
        preds.push("o.id = ?", [SqlValue::Text(id.to_string())]);
        let sql = format!(
            "SELECT {} FROM {RELATIONSHIP_TABLE} o WHERE {}",
            relationship_columns(),
            preds.sql()
        );
        Ok(self
            .query_relationships(&sql, preds.params)?
            .into_iter()
            .next())
    }

    fn latest_relationship(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<GraphRelationship>> {
        Ok(self
            .relationship_chain(ctx, canonical_id, None, Some(1))?
            .into_iter()
            .next())
    }

    fn relationship_chain(
        &self,
        ctx: &TenantContext,
        canonical_id: CanonicalId,
        before_version: Option<u32>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<GraphRelationship>> {
        let sql = Self::chain_sql(RELATIONSHIP_TABLE, &relationship_columns(), before_version);
        self.query_relationships(
            &sql,
            Self::chain_params(ctx, canonical_id, before_version, limit),
        )
    }

    fn relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
        page: HeadPage,
    ) -> StoreResult<Vec<GraphRelationship>> {
        let mut preds = relationship_predicates(ctx, filter);
        let sql = format!(
            "SELECT {} FROM {RELATIONSHIP_TABLE} o WHERE {} {} LIMIT ?",
            relationship_columns(),
            preds.sql(),
            order_sql(page)
        );
        preds.params.push(SqlValue::Integer(limit_param(page.limit)));
        self.query_relationships(&sql, preds.params)
    }

    fn count_relationship_heads(
        &self,
        ctx: &TenantContext,
        filter: &RelationshipFilter,
    ) -> StoreResult<usize> {
        self.count(RELATIONSHIP_TABLE, relationship_predicates(ctx, filter))
    }

    fn locate_relationship(&self, id: VersionId) -> StoreResult<Option<TenantContext>> {
        self.locate(RELATIONSHIP_TABLE, "id", id.to_string())
    }

    fn locate_relationship_chain(
        &self,
        canonical_id: CanonicalId,
    ) -> StoreResult<Option<TenantContext>> {
        self.locate(RELATIONSHIP_TABLE, "canonical_id", canonical_id.to_string())
    }

    fn branch(&self, ctx: &TenantContext, id: BranchId) -> StoreResult<Option<Branch>> {
        let mut params = Self::project_params(ctx);
        params.push(SqlValue::Text(id.to_string()));
        Ok(self
            .branch_query("organization_id = ? AND project_id = ? AND id = ?", params)?
            .into_iter()
            .next())
    }

    fn branch_by_name(&self, ctx: &TenantContext, name: &str) -> StoreResult<Option<Branch>> {
        let mut params = Self::project_params(ctx);
        params.push(SqlValue::Text(name.to_string()));
        Ok(self
            .branch_query("organization_id = ? AND project_id = ? AND name = ?", params)?
            .into_iter()
            .next())
    }

    fn branches(&self, ctx: &TenantContext) -> StoreResult<Vec<Branch>> {
        self.branch_query(
            "organization_id = ? AND project_id = ?",
            Self::project_params(ctx),
        )
    }

    fn locate_branch(&self, id: BranchId) -> StoreResult<Option<TenantContext>> {
        Ok(self
            .branch_query("id = ?", vec![SqlValue::Text(id.to_string())])?
            .into_iter()
            .next()
            .map(|b| TenantContext {
                organization_id: b.organization_id,
                project_id: b.project_id,
                branch_id: Some(b.id),
            }))
    }
}

impl GraphTx for SqliteSession<'_> {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock.tick()
    }

    fn insert_object(&mut self, object: &GraphObject) -> StoreResult<()> {
        let meta = &object.meta;
        check_next_version(
            self.latest_version(OBJECT_TABLE, meta)?,
            meta.canonical_id,
            meta.version,
        )?;
        let mut values = Self::meta_values(meta)?;
        values.extend([
            SqlValue::Text(object.object_type.clone()),
            object.key.clone().map_or(SqlValue::Null, SqlValue::Text),
            object.status.clone().map_or(SqlValue::Null, SqlValue::Text),
            SqlValue::Text(serde_json::to_string(&object.properties)?),
            SqlValue::Text(serde_json::to_string(&object.labels)?),
        ]);
        let marks = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {OBJECT_TABLE} ({}) VALUES ({marks})",
            object_columns()
        );
        self.conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| Self::map_insert_error(e, meta))?;
        tracing::debug!(
            canonical_id = %meta.canonical_id,
            version = meta.version,
            deleted = meta.is_deleted(),
            "inserted object version"
        );
        Ok(())
    }

    fn insert_relationship(&mut self, relationship: &GraphRelationship) -> StoreResult<()> {
        let meta = &relationship.meta;
        check_next_version(
            self.latest_version(RELATIONSHIP_TABLE, meta)?,
            meta.canonical_id,
            meta.version,
        )?;
        let mut values = Self::meta_values(meta)?;
        values.extend([
            SqlValue::Text(relationship.relationship_type.clone()),
            SqlValue::Text(relationship.src_id.to_string()),
            SqlValue::Text(relationship.dst_id.to_string()),
            SqlValue::Text(serde_json::to_string(&relationship.properties)?),
            SqlValue::Real(relationship.weight),
            relationship
                .valid_from
                .map_or(SqlValue::Null, |ts| SqlValue::Integer(micros(ts))),
            relationship
                .valid_to
                .map_or(SqlValue::Null, |ts| SqlValue::Integer(micros(ts))),
        ]);
        let marks = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {RELATIONSHIP_TABLE} ({}) VALUES ({marks})",
            relationship_columns()
        );
        self.conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| Self::map_insert_error(e, meta))?;
        tracing::debug!(
            canonical_id = %meta.canonical_id,
            version = meta.version,
            deleted = meta.is_deleted(),
            "inserted relationship version"
        );
        Ok(())
    }

    fn insert_branch(&mut self, branch: &Branch) -> StoreResult<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO graph_branches ({BRANCH_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    branch.id.to_string(),
                    branch.organization_id.to_string(),
                    branch.project_id.to_string(),
                    branch.name,
                    branch.parent_branch_id.map(|id| id.to_string()),
                    micros(branch.created_at),
                    micros(branch.updated_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Constraint(format!("branch '{}' already exists", branch.name))
                } else {
                    StoreError::Sqlite(e)
                }
            })?;
        Ok(())
    }

    fn update_branch(&mut self, branch: &Branch) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE graph_branches SET name = ?1, parent_branch_id = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND organization_id = ?5 AND project_id = ?6",
                params![
                    branch.name,
                    branch.parent_branch_id.map(|id| id.to_string()),
                    micros(branch.updated_at),
                    branch.id.to_string(),
                    branch.organization_id.to_string(),
                    branch.project_id.to_string(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Constraint(format!("branch '{}' already exists", branch.name))
                } else {
                    StoreError::Sqlite(e)
                }
            })?;
        if changed == 0 {
            return Err(StoreError::MissingRow(format!("branch {}", branch.id)));
        }
        Ok(())
    }

    fn delete_branch(&mut self, ctx: &TenantContext, id: BranchId) -> StoreResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM graph_branches WHERE id = ?1 AND organization_id = ?2 AND project_id = ?3",
            params![
                id.to_string(),
                ctx.organization_id.to_string(),
                ctx.project_id.to_string(),
            ],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvg_types::{ChangeKind, ChangeSummary, Properties, Versioned};
    use serde_json::json;

    fn ctx() -> TenantContext {
        TenantContext::new(OrganizationId::new(), ProjectId::new()).unwrap()
    }

    fn successor(prev: &GraphObject, now: DateTime<Utc>) -> GraphObject {
        let meta = prev.meta.successor(prev.meta.content_hash, ChangeSummary::default(), now);
        prev.with_meta(meta)
    }

    fn object(ctx: &TenantContext, key: &str, now: DateTime<Utc>) -> GraphObject {
        GraphObject {
            meta: VersionMeta::genesis(
                ctx,
                ContentHash::from_hash([7; 32]),
                ChangeSummary::new(ChangeKind::Created, ["/title".to_string()].into()),
                now,
            ),
            object_type: "Doc".into(),
            key: Some(key.into()),
            status: Some("draft".into()),
            properties: [("title".to_string(), json!({"text": key}))].into_iter().collect(),
            labels: vec!["x".into(), "y".into()],
        }
    }

    fn relationship(
        ctx: &TenantContext,
        src: CanonicalId,
        dst: CanonicalId,
        now: DateTime<Utc>,
    ) -> GraphRelationship {
        GraphRelationship {
            meta: VersionMeta::genesis(
                ctx,
                ContentHash::from_hash([8; 32]),
                ChangeSummary::default(),
                now,
            ),
            relationship_type: "LINKS".into(),
            src_id: src,
            dst_id: dst,
            properties: Properties::new(),
            weight: 0.5,
            valid_from: Some(now),
            valid_to: None,
        }
    }

    #[test]
    fn rows_round_trip_through_columns() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ctx = ctx();
        let (obj, rel) = store
            .write(|tx| -> StoreResult<_> {
                let a = object(&ctx, "a", tx.tick());
                let b = object(&ctx, "b", tx.tick());
                tx.insert_object(&a)?;
                tx.insert_object(&b)?;
                let rel = relationship(&ctx, a.meta.canonical_id, b.meta.canonical_id, tx.tick());
                tx.insert_relationship(&rel)?;
                Ok((a, rel))
            })
            .unwrap();

        let (got_obj, got_rel) = store
            .read(|r| -> StoreResult<_> {
                Ok((
                    r.object_version(&ctx, obj.meta.id)?,
                    r.latest_relationship(&ctx, rel.meta.canonical_id)?,
                ))
            })
            .unwrap();
        assert_eq!(got_obj, Some(obj));
        assert_eq!(got_rel, Some(rel));
    }

    #[test]
    fn version_gap_is_rejected() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ctx = ctx();
        let err = store
            .write(|tx| -> StoreResult<()> {
                let v1 = object(&ctx, "a", tx.tick());
                tx.insert_object(&v1)?;
                let now = tx.tick();
                let mut v5 = successor(&v1, now);
                v5.meta.version = 5;
                tx.insert_object(&v5)
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { version: 5, .. }));
    }

    #[test]
    fn failed_write_is_rolled_back() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ctx = ctx();
        let result: StoreResult<()> = store.write(|tx| {
            let a = object(&ctx, "a", tx.tick());
            tx.insert_object(&a)?;
            Err(StoreError::Constraint("abort".into()))
        });
        assert!(result.is_err());
        let count = store
            .read(|r| r.count_object_heads(&ctx, &ObjectFilter::live()))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn heads_honor_filters_and_order() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ctx = ctx();
        let (a, b) = store
            .write(|tx| -> StoreResult<_> {
                let a = object(&ctx, "a", tx.tick());
                let b = object(&ctx, "b", tx.tick());
                tx.insert_object(&a)?;
                tx.insert_object(&b)?;
                let now = tx.tick();
                let a2 = a.with_meta(a.meta.tombstone(now));
                tx.insert_object(&a2)?;
                Ok((a2, b))
            })
            .unwrap();

        let live = store
            .read(|r| r.object_heads(&ctx, &ObjectFilter::live(), HeadPage::all()))
            .unwrap();
        assert_eq!(live, vec![b.clone()]);

        let everything = ObjectFilter {
            include_deleted: true,
            labels: vec!["x".into()],
            ..ObjectFilter::default()
        };
        let desc = store
            .read(|r| r.object_heads(&ctx, &everything, HeadPage::last(10)))
            .unwrap();
        assert_eq!(desc, vec![a.clone(), b.clone()]);

        let missing_label = ObjectFilter {
            labels: vec!["x".into(), "nope".into()],
            ..ObjectFilter::default()
        };
        assert_eq!(
            store
                .read(|r| r.count_object_heads(&ctx, &missing_label))
                .unwrap(),
            0
        );

        let after_b = ObjectFilter {
            include_deleted: true,
            created_after: Some(b.created_at()),
            ..ObjectFilter::default()
        };
        let tail = store
            .read(|r| r.object_heads(&ctx, &after_b, HeadPage::all()))
            .unwrap();
        assert_eq!(tail, vec![a]);
    }

    #[test]
    fn chain_pages_newest_first() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ctx = ctx();
        let v1 = store
            .write(|tx| -> StoreResult<_> {
                let v1 = object(&ctx, "a", tx.tick());
                tx.insert_object(&v1)?;
                let mut prev = v1.clone();
                for _ in 0..3 {
                    let now = tx.tick();
                    let next = successor(&prev, now);
                    tx.insert_object(&next)?;
                    prev = next;
                }
                Ok(v1)
            })
            .unwrap();
        let versions = |before: Option<u32>, limit: Option<usize>| -> Vec<u32> {
            store
                .read(|r| r.object_chain(&ctx, v1.meta.canonical_id, before, limit))
                .unwrap()
                .iter()
                .map(|o| o.meta.version)
                .collect()
        };
        assert_eq!(versions(None, None), vec![4, 3, 2, 1]);
        assert_eq!(versions(Some(3), Some(1)), vec![2]);
    }

    #[test]
    fn endpoint_filter_either_direction() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ctx = ctx();
        let (a, b, c) = (CanonicalId::new(), CanonicalId::new(), CanonicalId::new());
        store
            .write(|tx| -> StoreResult<()> {
                let ab = relationship(&ctx, a, b, tx.tick());
                tx.insert_relationship(&ab)?;
                let bc = relationship(&ctx, b, c, tx.tick());
                tx.insert_relationship(&bc)
            })
            .unwrap();
        let touching_b = store
            .read(|r| r.relationship_heads(&ctx, &RelationshipFilter::touching(b), HeadPage::all()))
            .unwrap();
        assert_eq!(touching_b.len(), 2);
        let from_c = RelationshipFilter {
            endpoints: Some(EndpointMatch::Source(vec![c])),
            ..RelationshipFilter::default()
        };
        assert_eq!(
            store.read(|r| r.count_relationship_heads(&ctx, &from_c)).unwrap(),
            0
        );
    }

    #[test]
    fn tenant_predicates_isolate_projects() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let p1 = ctx();
        let p2 = TenantContext::new(p1.organization_id, ProjectId::new()).unwrap();
        let obj = store
            .write(|tx| -> StoreResult<_> {
                let o = object(&p1, "a", tx.tick());
                tx.insert_object(&o)?;
                Ok(o)
            })
            .unwrap();
        let (seen, located) = store
            .read(|r| -> StoreResult<_> {
                Ok((
                    r.object_version(&p2, obj.meta.id)?,
                    r.locate_object(obj.meta.id)?,
                ))
            })
            .unwrap();
        assert!(seen.is_none());
        assert_eq!(located, Some(p1));
    }

    #[test]
    fn branch_rows_and_main_line_key() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let main = ctx();
        let now = Utc::now();
        let branch = Branch {
            id: BranchId::new(),
            organization_id: main.organization_id,
            project_id: main.project_id,
            name: "feature".into(),
            parent_branch_id: None,
            created_at: now,
            updated_at: now,
        };
        store.write(|tx| tx.insert_branch(&branch)).unwrap();
        let dup = Branch {
            id: BranchId::new(),
            ..branch.clone()
        };
        assert!(matches!(
            store.write(|tx| tx.insert_branch(&dup)).unwrap_err(),
            StoreError::Constraint(_)
        ));

        let on_branch = main.on_branch(Some(branch.id));
        store
            .write(|tx| {
                let o = object(&on_branch, "a", tx.tick());
                tx.insert_object(&o)
            })
            .unwrap();
        let (main_heads, branch_heads) = store
            .read(|r| -> StoreResult<_> {
                Ok((
                    r.count_object_heads(&main, &ObjectFilter::live())?,
                    r.count_object_heads(&on_branch, &ObjectFilter::live())?,
                ))
            })
            .unwrap();
        assert_eq!((main_heads, branch_heads), (0, 1));
        assert!(store.write(|tx| tx.delete_branch(&main, branch.id)).unwrap());
    }

    #[test]
    fn reopen_keeps_rows_and_clock_floor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let ctx = ctx();
        let first = {
            let store = SqliteGraphStore::open(&path).unwrap();
            store
                .write(|tx| -> StoreResult<_> {
                    let o = object(&ctx, "a", tx.tick());
                    tx.insert_object(&o)?;
                    Ok(o)
                })
                .unwrap()
        };
        let store = SqliteGraphStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let (later, latest) = store
            .write(|tx| -> StoreResult<_> {
                Ok((tx.tick(), tx.latest_object(&ctx, first.meta.canonical_id)?))
            })
            .unwrap();
        assert!(later > first.meta.created_at);
        assert_eq!(latest, Some(first));
    }
}
