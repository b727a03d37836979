use std::{marker::PhantomData, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};

use crate::{ColumnError, ColumnObject, JsonCodec, ResultAccessor, TargetType};


/// Text that was present in a storage cell but could not be decoded.
#[derive(Debug)]
pub struct DecodeDiagnostic {
    pub text: String,
    pub error: ColumnError,
}

/// Outcome of reading one JSON column.
#[derive(Debug)]
pub enum Decoded<T> {
    Present(T),
    // SQL NULL, empty text, or a payload that stands for "no value"
    Absent,
    Invalid(DecodeDiagnostic),
}

impl<T> Decoded<T> {
    /// Drops the diagnostic; invalid payloads read as `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Decoded::Present(value) => Some(value),
            Decoded::Absent | Decoded::Invalid(_) => None,
        }
    }

    pub fn present(&self) -> Option<&T> {
        match self {
            Decoded::Present(value) => Some(value),
            Decoded::Absent | Decoded::Invalid(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Decoded::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Decoded::Absent)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Decoded::Invalid(_))
    }

    pub fn diagnostic(&self) -> Option<&DecodeDiagnostic> {
        match self {
            Decoded::Invalid(diagnostic) => Some(diagnostic),
            _ => None,
        }
    }
}

/// Converts values of `T` to and from the JSON text of one column.
pub struct JsonColumnAdapter<T> {
    codec: Arc<JsonCodec>,
    target: TargetType,
    _target: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonColumnAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            target: self.target.clone(),
            _target: PhantomData,
        }
    }
}

impl<T: ColumnObject> JsonColumnAdapter<T> {
    pub fn for_type(codec: Arc<JsonCodec>) -> Self {
        Self {
            codec,
            target: T::target_type(),
            _target: PhantomData,
        }
    }
}

impl<T> JsonColumnAdapter<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Binds the adapter to a target type.
    /// - Fails when the target type is missing or names a type other than `T`.
    pub fn new(codec: Arc<JsonCodec>, target: Option<TargetType>) -> Result<Self, ColumnError> {
        let target = target.ok_or_else(|| {
            ColumnError::InvalidConfiguration("target type argument cannot be absent".to_string())
        })?;
        if target.name() != std::any::type_name::<T>() {
            return Err(ColumnError::InvalidConfiguration(format!(
                "target type {} does not match {}",
                target.name(),
                std::any::type_name::<T>()
            )));
        }
        Ok(Self {
            codec,
            target,
            _target: PhantomData,
        })
    }

    pub fn target(&self) -> &TargetType {
        &self.target
    }

    pub fn codec(&self) -> &JsonCodec {
        &self.codec
    }

    pub fn encode_for_storage(&self, value: &T) -> Result<String, ColumnError> {
        self.codec.encode(value, &self.target)
    }

    pub fn decode_from_storage(&self, text: Option<&str>) -> Decoded<T> {
        let Some(text) = text else {
            return Decoded::Absent;
        };
        match self.codec.decode(text, &self.target) {
            Ok(Some(value)) => Decoded::Present(value),
            Ok(None) => Decoded::Absent,
            Err(error) => {
                tracing::error!(
                    target_type = %self.target,
                    text = %text,
                    error = %error,
                    "Failed to deserialize stored JSON, reading as absent"
                );
                Decoded::Invalid(DecodeDiagnostic {
                    text: text.to_string(),
                    error,
                })
            }
        }
    }

    pub fn read_by_name<R>(&self, row: &R, column: &str) -> Result<Decoded<T>, ColumnError>
    where
        R: ResultAccessor + ?Sized,
    {
        let text = row.text_by_name(column).map_err(ColumnError::Accessor)?;
        Ok(self.decode_from_storage(text.as_deref()))
    }

    pub fn read_by_position<R>(&self, row: &R, position: usize) -> Result<Decoded<T>, ColumnError>
    where
        R: ResultAccessor + ?Sized,
    {
        let text = row.text_by_position(position).map_err(ColumnError::Accessor)?;
        Ok(self.decode_from_storage(text.as_deref()))
    }
}
