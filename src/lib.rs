mod adapter;
mod error;
pub mod json;
mod postgres;
mod row;

use std::fmt::{Display, Formatter};

use serde::{de::DeserializeOwned, Serialize};

pub use adapter::{DecodeDiagnostic, Decoded, JsonColumnAdapter};
pub use error::ColumnError;
pub use json::{CodecOptions, JsonCodec};
pub use postgres::{JsonCell, JsonText};
pub use row::MemoryRow;


/// Shape of the value a JSON column materializes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    Value,
    // an ordered sequence; scalars may be coerced into one element
    Sequence,
}

/// Describes which concrete type a column's JSON text decodes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetType {
    name: &'static str,
    shape: TargetShape,
}

impl TargetType {
    pub fn value<T: ?Sized>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            shape: TargetShape::Value,
        }
    }

    pub fn sequence<T: ?Sized>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            shape: TargetShape::Sequence,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> TargetShape {
        self.shape
    }

    pub fn is_sequence(&self) -> bool {
        self.shape == TargetShape::Sequence
    }
}

impl Display for TargetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.shape {
            TargetShape::Value => write!(f, "{}", self.name),
            TargetShape::Sequence => write!(f, "{} (sequence)", self.name),
        }
    }
}

/// A value that can be stored as JSON in a single column.
///
/// Records only need an empty impl; sequences report their shape so that
/// a lone scalar can be read back as a one-element list.
pub trait ColumnObject: Serialize + DeserializeOwned + Send + Sync {
    fn target_type() -> TargetType {
        TargetType::value::<Self>()
    }
}

impl<T: ColumnObject> ColumnObject for Vec<T> {
    fn target_type() -> TargetType {
        TargetType::sequence::<Self>()
    }
}

macro_rules! scalar_column_objects {
    ($($ty:ty),* $(,)?) => {
        $(impl ColumnObject for $ty {})*
    };
}

scalar_column_objects!(String, bool, i32, i64, u32, u64, f32, f64, serde_json::Value);

/// Reads the raw text of a storage cell from a result row.
pub trait ResultAccessor {
    /// Text of the named column.
    /// - Returns `None` when the cell holds SQL `NULL`.
    fn text_by_name(&self, column: &str) -> anyhow::Result<Option<String>>;

    /// Text of the column at `position` (zero-based).
    /// - Returns `None` when the cell holds SQL `NULL`.
    fn text_by_position(&self, position: usize) -> anyhow::Result<Option<String>>;
}
