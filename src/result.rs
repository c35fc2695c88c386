//! Query results as handed to callers.
//!
//! Values are kept in the text format the server sent them in. Decoding into
//! Rust types is left to the caller.

use std::rc::Rc;

use crate::protocol::types::{FormatCode, Oid};

/// Column metadata from RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Source table OID, 0 for computed columns.
    pub table_oid: Oid,
    /// Attribute number within the source table, 0 for computed columns.
    pub column_id: i16,
    pub type_oid: Oid,
    /// Negative for variable-length types.
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

/// Something that selects a column: a position or a name.
pub trait ColumnIndex {
    fn position(&self, columns: &[Column]) -> Option<usize>;
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[Column]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }
}

impl ColumnIndex for &str {
    fn position(&self, columns: &[Column]) -> Option<usize> {
        columns.iter().position(|c| c.name == *self)
    }
}

/// One row of a result set.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Rc<[Column]>,
    values: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Text value of a column. `None` for NULL, an unknown column, or a
    /// value that is not UTF-8.
    pub fn get(&self, index: impl ColumnIndex) -> Option<&str> {
        self.get_bytes(index)
            .and_then(|bytes| simdutf8::basic::from_utf8(bytes).ok())
    }

    /// Raw bytes of a column. `None` for NULL or an unknown column.
    pub fn get_bytes(&self, index: impl ColumnIndex) -> Option<&[u8]> {
        let position = index.position(&self.columns)?;
        self.values.get(position)?.as_deref()
    }

    /// True if the column exists and is NULL.
    pub fn is_null(&self, index: impl ColumnIndex) -> bool {
        index
            .position(&self.columns)
            .and_then(|p| self.values.get(p))
            .is_some_and(Option::is_none)
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone)]
pub struct QueryResult {
    columns: Rc<[Column]>,
    rows: Vec<Row>,
    command_tag: Option<String>,
    param_oids: Vec<Oid>,
}

impl QueryResult {
    pub fn new(
        columns: Vec<Column>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        command_tag: Option<String>,
        param_oids: Vec<Oid>,
    ) -> Self {
        let columns: Rc<[Column]> = columns.into();
        let rows = rows
            .into_iter()
            .map(|values| Row {
                columns: Rc::clone(&columns),
                values,
            })
            .collect();
        Self {
            columns,
            rows,
            command_tag,
            param_oids,
        }
    }

    /// A result with no columns, rows or tag (e.g. after Parse).
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), None, Vec::new())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Command tag, e.g. `"SELECT 5"` or `"INSERT 0 1"`.
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// First word of the command tag.
    pub fn command(&self) -> Option<&str> {
        self.command_tag()?.split_whitespace().next()
    }

    /// Row count from the command tag, for commands that report one.
    pub fn rows_affected(&self) -> Option<u64> {
        let parts: Vec<&str> = self.command_tag()?.split_whitespace().collect();
        match parts.as_slice() {
            ["INSERT", _oid, count] => count.parse().ok(),
            ["SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH", count] => {
                count.parse().ok()
            }
            _ => None,
        }
    }

    /// Parameter types, filled by describing a prepared statement.
    pub fn param_oids(&self) -> &[Oid] {
        &self.param_oids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, type_oid: Oid) -> Column {
        Column {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: FormatCode::Text,
        }
    }

    #[test]
    fn row_access_by_index_and_name() {
        let result = QueryResult::new(
            vec![column("id", 23), column("note", 25)],
            vec![vec![Some(b"1".to_vec()), None]],
            Some("SELECT 1".into()),
            Vec::new(),
        );

        let row = result.first().unwrap();
        assert_eq!(row.get(0), Some("1"));
        assert_eq!(row.get("id"), Some("1"));
        assert_eq!(row.get("note"), None);
        assert!(row.is_null("note"));
        assert!(!row.is_null("missing"));
        assert_eq!(row.get(5), None);
        assert_eq!(result.rows_affected(), Some(1));
        assert_eq!(result.command(), Some("SELECT"));
    }

    #[test]
    fn rows_affected_by_command() {
        let tagged = |tag: &str| QueryResult::new(Vec::new(), Vec::new(), Some(tag.into()), Vec::new());
        assert_eq!(tagged("INSERT 0 3").rows_affected(), Some(3));
        assert_eq!(tagged("UPDATE 10").rows_affected(), Some(10));
        assert_eq!(tagged("CREATE TABLE").rows_affected(), None);
        assert_eq!(QueryResult::empty().rows_affected(), None);
    }
}
