use bytes::Bytes;

// -----------------------------------------------------------------------------
// ----- Field / Row -----------------------------------------------------------

/// Column metadata as reported by a shard backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub type_code: i64,
}

impl Field {
    pub fn new(name: impl Into<String>, type_code: i64) -> Self {
        Self {
            name: name.into(),
            type_code,
        }
    }
}

/// One row; `None` is SQL NULL.
pub type Row = Vec<Option<Bytes>>;

// -----------------------------------------------------------------------------
// ----- QueryResult -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub fields: Vec<Field>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub insert_id: u64,
}

impl QueryResult {
    /// Folds one shard's partial result into this one. Rows are appended, so
    /// calling this in shard-list order yields rows in shard-list order.
    /// Fields come from the first shard that reported any; a scatter query is
    /// schema-identical across shards.
    pub fn append(&mut self, other: QueryResult) {
        if self.fields.is_empty() {
            self.fields = other.fields;
        }
        self.rows_affected += other.rows_affected;
        if self.insert_id == 0 {
            self.insert_id = other.insert_id;
        }
        self.rows.extend(other.rows);
    }

    pub fn merge(parts: impl IntoIterator<Item = QueryResult>) -> QueryResult {
        parts.into_iter().fold(QueryResult::default(), |mut acc, part| {
            acc.append(part);
            acc
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
