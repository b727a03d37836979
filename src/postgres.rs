use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgArguments, PgRow, PgTypeInfo, PgValueFormat, PgValueRef},
    query::Query,
    Decode, Encode, Postgres, Row, Type, TypeInfo, ValueRef,
};

use crate::{ColumnError, ColumnObject, Decoded, JsonCodec, JsonColumnAdapter, ResultAccessor};

// leading byte of a binary jsonb value
const JSONB_VERSION: u8 = 1;


/// Raw text of a Postgres value, with the jsonb version byte removed.
fn pg_text(value: PgValueRef<'_>) -> Result<Option<String>, BoxDynError> {
    if value.is_null() {
        return Ok(None);
    }
    let binary_jsonb =
        matches!(value.format(), PgValueFormat::Binary) && value.type_info().name() == "JSONB";
    let mut bytes = value.as_bytes()?;
    if binary_jsonb {
        bytes = strip_jsonb_version(bytes)?;
    }
    Ok(Some(std::str::from_utf8(bytes)?.to_string()))
}

fn strip_jsonb_version(bytes: &[u8]) -> Result<&[u8], BoxDynError> {
    match bytes.split_first() {
        Some((&JSONB_VERSION, rest)) => Ok(rest),
        Some((version, _)) => Err(format!("unsupported jsonb version {}", version).into()),
        None => Err("empty jsonb value".into()),
    }
}

fn write_jsonb(buf: &mut PgArgumentBuffer, text: &str) {
    buf.push(JSONB_VERSION);
    buf.extend_from_slice(text.as_bytes());
}

fn json_type_info() -> PgTypeInfo {
    <serde_json::Value as Type<Postgres>>::type_info()
}

fn json_compatible(ty: &PgTypeInfo) -> bool {
    <serde_json::Value as Type<Postgres>>::compatible(ty) || <String as Type<Postgres>>::compatible(ty)
}

impl ResultAccessor for PgRow {
    fn text_by_name(&self, column: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .try_get_raw(column)
            .with_context(|| format!("Failed to read column: {}", column))?;
        pg_text(value)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Failed to read text of column: {}", column))
    }

    fn text_by_position(&self, position: usize) -> anyhow::Result<Option<String>> {
        let value = self
            .try_get_raw(position)
            .with_context(|| format!("Failed to read column at position: {}", position))?;
        pg_text(value)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Failed to read text of column at position: {}", position))
    }
}

impl<T> JsonColumnAdapter<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Decodes a value handed over by the driver.
    pub fn read_value(&self, value: PgValueRef<'_>) -> Result<Decoded<T>, ColumnError> {
        let text = pg_text(value).map_err(|e| ColumnError::Accessor(anyhow::anyhow!(e)))?;
        Ok(self.decode_from_storage(text.as_deref()))
    }

    /// Encodes `value` and binds it as the next positioned parameter.
    /// - Fails before the query runs if the value cannot be encoded.
    pub fn bind<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
        value: &T,
    ) -> Result<Query<'q, Postgres, PgArguments>, ColumnError> {
        let text = self.encode_for_storage(value)?;
        Ok(query.bind(JsonText(text)))
    }
}

/// JSON text that has already been encoded, bound as `jsonb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonText(pub String);

impl Type<Postgres> for JsonText {
    fn type_info() -> PgTypeInfo {
        json_type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        json_compatible(ty)
    }
}

impl Encode<'_, Postgres> for JsonText {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        write_jsonb(buf, &self.0);
        Ok(IsNull::No)
    }
}

/// A JSON column value decoded with the shared codec.
///
/// Malformed payloads read as `JsonCell(None)` and are logged; values that
/// cannot be encoded fail the query.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonCell<T>(pub Option<T>);

impl<T> Default for JsonCell<T> {
    fn default() -> Self {
        JsonCell(None)
    }
}

impl<T> JsonCell<T> {
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

impl<T> From<T> for JsonCell<T> {
    fn from(value: T) -> Self {
        JsonCell(Some(value))
    }
}

impl<T> Type<Postgres> for JsonCell<T> {
    fn type_info() -> PgTypeInfo {
        json_type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        json_compatible(ty)
    }
}

impl<T: ColumnObject> Encode<'_, Postgres> for JsonCell<T> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let Some(value) = &self.0 else {
            return Ok(IsNull::Yes);
        };
        let text = JsonCodec::shared().encode(value, &T::target_type())?;
        write_jsonb(buf, &text);
        Ok(IsNull::No)
    }
}

impl<'r, T: ColumnObject> Decode<'r, Postgres> for JsonCell<T> {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let adapter = JsonColumnAdapter::<T>::for_type(JsonCodec::shared());
        Ok(JsonCell(adapter.read_value(value)?.into_option()))
    }
}
