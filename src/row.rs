use ordermap::OrderMap;

use crate::ResultAccessor;


/// A result row held in memory: column names in select order, each with
/// optional text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryRow {
    columns: OrderMap<String, Option<String>>,
}

impl MemoryRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, keeping its original position if it already exists.
    pub fn insert(&mut self, column: impl Into<String>, text: Option<String>) {
        self.columns.insert(column.into(), text);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for MemoryRow {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl ResultAccessor for MemoryRow {
    fn text_by_name(&self, column: &str) -> anyhow::Result<Option<String>> {
        match self.columns.get(column) {
            Some(text) => Ok(text.clone()),
            None => Err(anyhow::anyhow!("No column named {}", column)),
        }
    }

    fn text_by_position(&self, position: usize) -> anyhow::Result<Option<String>> {
        match self.columns.get_index(position) {
            Some((_, text)) => Ok(text.clone()),
            None => Err(anyhow::anyhow!(
                "Column position {} out of range for row with {} columns",
                position,
                self.columns.len()
            )),
        }
    }
}
