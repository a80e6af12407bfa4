/// The version of a model schema.
///
/// Every change to a model schema or to one of its fields increments the version.  Dynamic models remember the version
/// they were built from, which is how stale models are detected.  Serializes as a u64.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct SchemaVersion(u64);

impl SchemaVersion {
    /// The version of a freshly created schema.
    pub const INITIAL: SchemaVersion = SchemaVersion(1);

    pub fn new(version: u64) -> SchemaVersion {
        SchemaVersion(version)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Get the next version after this one.
    ///
    /// Panics if this isn't possible, which is a sign of a bug: we'd have to have a u64::MAX - 1 version.
    #[must_use]
    pub fn increment(&self) -> SchemaVersion {
        let nv = self.0.checked_add(1).expect("We hit the max version!");
        SchemaVersion(nv)
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl rusqlite::ToSql for SchemaVersion {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::from(self.0 as i64))
    }
}

impl rusqlite::types::FromSql for SchemaVersion {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let v = value.as_i64()?;
        u64::try_from(v)
            .map(SchemaVersion)
            .map_err(|_| rusqlite::types::FromSqlError::OutOfRange(v))
    }
}
