// ABOUTME: Schema model - databases, tables and columns loaded once at open
// ABOUTME: Classifies catalog type names into SqlType and the ColumnKind used for encoding

pub mod compare;
pub mod metadata;
pub mod translate;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::db::{Connector, Dialect};
use crate::error::SyncError;

/// Catalog type classification, the portable stand-in for a JDBC type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Char,
    NChar,
    VarChar,
    NVarChar,
    LongVarChar,
    LongNVarChar,
    Date,
    Time,
    Timestamp,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Boolean,
    Real,
    Double,
    Decimal,
    /// uuid, json and other types exchanged as quoted text
    Other,
    Xml,
    Binary,
    Unknown,
}

/// Literal encoding family of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    DateTime,
    Numeric,
    Integer,
    Boolean,
    Unsupported,
}

impl SqlType {
    /// Classify a catalog type name (`udt_name` on Postgres, `data_type` elsewhere).
    pub fn classify(dialect: Dialect, type_name: &str) -> Self {
        let name = type_name.trim().to_lowercase();
        let name = name.split('(').next().unwrap_or("").trim();

        // Names that mean something else depending on the vendor
        match (dialect, name) {
            (Dialect::SqlServer, "timestamp" | "rowversion") => return SqlType::Binary,
            (Dialect::SqlServer, "text") => return SqlType::LongVarChar,
            (Dialect::Postgres, "text") => return SqlType::VarChar,
            (Dialect::Postgres, "float4") | (_, "float") if dialect != Dialect::SqlServer => {
                return SqlType::Real
            }
            (Dialect::SqlServer, "float") => return SqlType::Double,
            (Dialect::Mysql | Dialect::MariaDb, "year") => return SqlType::SmallInt,
            _ => {}
        }

        match name {
            "char" | "bpchar" | "character" | "enum" | "set" | "uniqueidentifier" => SqlType::Char,
            "nchar" => SqlType::NChar,
            "varchar" | "character varying" | "citext" => SqlType::VarChar,
            "nvarchar" => SqlType::NVarChar,
            "text" | "tinytext" | "mediumtext" | "longtext" => SqlType::LongVarChar,
            "ntext" => SqlType::LongNVarChar,
            "date" => SqlType::Date,
            "time" | "timetz" | "time without time zone" | "time with time zone" => SqlType::Time,
            "timestamp" | "timestamptz" | "timestamp without time zone"
            | "timestamp with time zone" | "datetime" | "datetime2" | "smalldatetime"
            | "datetimeoffset" => SqlType::Timestamp,
            "tinyint" => SqlType::TinyInt,
            "smallint" | "int2" => SqlType::SmallInt,
            "int" | "integer" | "int4" | "mediumint" | "serial" => SqlType::Integer,
            "bigint" | "int8" | "bigserial" => SqlType::BigInt,
            "bool" | "boolean" | "bit" => SqlType::Boolean,
            "real" | "float4" => SqlType::Real,
            "double" | "double precision" | "float8" => SqlType::Double,
            "numeric" | "decimal" | "money" | "smallmoney" => SqlType::Decimal,
            "uuid" | "json" | "jsonb" | "inet" | "cidr" | "macaddr" | "interval" => SqlType::Other,
            "xml" => SqlType::Xml,
            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary"
            | "image" => SqlType::Binary,
            _ => SqlType::Unknown,
        }
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            SqlType::Char
            | SqlType::NChar
            | SqlType::VarChar
            | SqlType::NVarChar
            | SqlType::LongVarChar
            | SqlType::LongNVarChar
            | SqlType::Other => ColumnKind::Text,
            SqlType::Date | SqlType::Time | SqlType::Timestamp => ColumnKind::DateTime,
            SqlType::Real | SqlType::Double | SqlType::Decimal => ColumnKind::Numeric,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                ColumnKind::Integer
            }
            SqlType::Boolean => ColumnKind::Boolean,
            SqlType::Xml | SqlType::Binary | SqlType::Unknown => ColumnKind::Unsupported,
        }
    }

    /// Variable-length text types carry their size in DDL.
    pub fn uses_size(self) -> bool {
        matches!(
            self,
            SqlType::LongNVarChar
                | SqlType::LongVarChar
                | SqlType::NChar
                | SqlType::NVarChar
                | SqlType::VarChar
        )
    }

    /// Whether a DEFAULT literal of this type must be single quoted.
    pub fn default_needs_quotes(self) -> bool {
        matches!(
            self,
            SqlType::Char
                | SqlType::Date
                | SqlType::LongNVarChar
                | SqlType::LongVarChar
                | SqlType::NChar
                | SqlType::NVarChar
                | SqlType::Other
                | SqlType::Xml
                | SqlType::Time
                | SqlType::Timestamp
                | SqlType::VarChar
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }
}

/// One column as read from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub type_name: String,
    pub not_null: bool,
    /// Default literal with dialect decorations already stripped
    pub default_value: Option<String>,
    pub size: i64,
    /// Dialect of the database the column was read from
    pub dialect: Dialect,
}

impl Column {
    pub fn new(
        name: &str,
        type_name: &str,
        dialect: Dialect,
        not_null: bool,
        default_value: Option<String>,
        size: i64,
    ) -> Self {
        Self {
            name: name.to_string(),
            sql_type: SqlType::classify(dialect, type_name),
            type_name: type_name.to_string(),
            not_null,
            default_value,
            size,
            dialect,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        self.sql_type.kind()
    }
}

/// A table with its columns, primary key and size metrics.
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// Primary key column names in key order
    pub primary_key: Vec<String>,
    pub approx_rows: i64,
    pub approx_disk_kb: i64,
    /// `"schema".` or empty
    schema_prefix: String,
    by_name: HashMap<String, usize>,
    conn: Arc<dyn Connector>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key)
            .field("database", &self.conn.name())
            .finish()
    }
}

impl Table {
    pub fn new(
        name: &str,
        columns: Vec<Column>,
        primary_key: Vec<String>,
        schema_prefix: String,
        conn: Arc<dyn Connector>,
    ) -> Self {
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            name: name.to_string(),
            columns,
            primary_key,
            approx_rows: 0,
            approx_disk_kb: 0,
            schema_prefix,
            by_name,
            conn,
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.conn
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn database_name(&self) -> &str {
        self.conn.name()
    }

    /// Column by exact (case-sensitive) name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.by_name.get(name).map(|&i| &self.columns[i])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Schema-qualified, quoted table name in this table's dialect.
    pub fn qualified_name(&self) -> String {
        format!("{}{}", self.schema_prefix, self.quote(&self.name))
    }

    pub fn quote(&self, identifier: &str) -> String {
        self.dialect().quote_identifier(identifier)
    }

    /// Quoted primary key column list, `a,b` for composite keys.
    pub fn quoted_primary_key(&self) -> String {
        self.primary_key
            .iter()
            .map(|k| self.quote(k))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Quoted leading primary key column, the one key ranges are built on.
    pub fn quoted_key_column(&self) -> String {
        self.primary_key
            .first()
            .map(|k| self.quote(k))
            .unwrap_or_default()
    }

    /// Single-column integer primary keys are required for range chunking.
    pub fn has_integer_primary_key(&self) -> bool {
        self.primary_key.len() == 1
            && self
                .column(&self.primary_key[0])
                .map(|c| c.sql_type.is_integer())
                .unwrap_or(false)
    }

    /// Position of the (first) primary key column in row images.
    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key
            .first()
            .and_then(|k| self.column_index(k))
    }

    /// Exact row count, used as the progress denominator.
    pub async fn exact_row_count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified_name());
        Ok(self.conn.query_i64(&sql).await?.unwrap_or(0))
    }
}

/// All tables of one database, loaded at open.
pub struct Database {
    pub config: DatabaseConfig,
    conn: Arc<dyn Connector>,
    tables: Vec<Arc<Table>>,
    by_name: HashMap<String, Arc<Table>>,
    max_table_name_length: usize,
}

impl Database {
    /// Connect and load every (non-ignored) table matching `table_pattern`.
    ///
    /// An empty pattern loads all tables. Fails when a table has no primary key.
    pub async fn open(config: &DatabaseConfig, table_pattern: &str) -> Result<Self> {
        let conn = crate::db::connect(config).await?;
        Self::load(config.clone(), conn, table_pattern).await
    }

    /// Load the table catalog through an existing connector.
    pub async fn load(
        config: DatabaseConfig,
        conn: Arc<dyn Connector>,
        table_pattern: &str,
    ) -> Result<Self> {
        let schema = config.effective_schema()?;
        tracing::info!(
            "(database) reading meta data for {} schema={}",
            config.name,
            schema
        );

        let pattern = table_pattern.trim().to_lowercase();
        let mut names: Vec<String> = metadata::list_tables(conn.as_ref(), &schema)
            .await?
            .into_iter()
            .filter(|name| pattern.is_empty() || name.to_lowercase() == pattern)
            .filter(|name| !config.is_ignored(name))
            .collect();
        names.sort();

        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            tracing::debug!("(table) get metrics for {} {}", config.name, name);
            let table = metadata::load_table(conn.clone(), &config, &schema, name).await?;
            tables.push(table);
        }

        Ok(Self::from_tables(config, conn, tables))
    }

    pub fn from_tables(config: DatabaseConfig, conn: Arc<dyn Connector>, tables: Vec<Table>) -> Self {
        let tables: Vec<Arc<Table>> = tables.into_iter().map(Arc::new).collect();
        let by_name = tables
            .iter()
            .map(|t| (t.name.to_lowercase(), t.clone()))
            .collect();
        let max_table_name_length = tables.iter().map(|t| t.name.len()).max().unwrap_or(0);
        Self {
            config,
            conn,
            tables,
            by_name,
            max_table_name_length,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.conn
    }

    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    /// Table names in catalog spelling, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.by_name.get(&name.to_lowercase()).cloned()
    }

    pub fn max_table_name_length(&self) -> usize {
        self.max_table_name_length
    }

    /// Prefix for qualifying table names in this database.
    pub fn schema_prefix(&self) -> String {
        schema_prefix(self.dialect(), &self.config.schema)
    }

    pub fn is_ignored(&self, table: &str) -> bool {
        self.config.is_ignored(table)
    }
}

/// `"schema".` for a configured schema, empty otherwise.
pub fn schema_prefix(dialect: Dialect, schema: &str) -> String {
    if schema.is_empty() {
        String::new()
    } else {
        format!("{}.", dialect.quote_identifier(schema))
    }
}

/// Require a primary key, the whole sync depends on one.
pub(crate) fn require_primary_key(table: &str, primary_key: &[String]) -> Result<(), SyncError> {
    if primary_key.is_empty() {
        Err(SyncError::MissingPrimaryKey(table.to_string()))
    } else {
        Ok(())
    }
}
