//! The configured JSON codec shared by every column adapter.

use std::sync::{Arc, OnceLock};

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_path_to_error::{Path, Segment};

use crate::{ColumnError, TargetType};

static SHARED: OnceLock<Arc<JsonCodec>> = OnceLock::new();

/// Behaviors of the codec, loadable from kebab-case JSON configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CodecOptions {
    pub ignore_unknown_fields_on_decode: bool,
    /// Applies to the root value only; nested list fields opt in with
    /// [`one_or_many`].
    pub accept_single_value_as_sequence: bool,
    /// Empty input text reads as absent, and a `""` that fails to
    /// materialize is retried as `null`, one location at a time.
    pub treat_empty_string_as_absent: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            ignore_unknown_fields_on_decode: true,
            accept_single_value_as_sequence: true,
            treat_empty_string_as_absent: true,
        }
    }
}

impl CodecOptions {
    pub fn from_json(text: &str) -> Result<Self, ColumnError> {
        serde_json::from_str(text).map_err(|e| {
            ColumnError::InvalidConfiguration(format!("malformed codec options: {}", e))
        })
    }

    pub fn ignore_unknown_fields(mut self, enabled: bool) -> Self {
        self.ignore_unknown_fields_on_decode = enabled;
        self
    }

    pub fn accept_single_value_as_sequence(mut self, enabled: bool) -> Self {
        self.accept_single_value_as_sequence = enabled;
        self
    }

    pub fn treat_empty_string_as_absent(mut self, enabled: bool) -> Self {
        self.treat_empty_string_as_absent = enabled;
        self
    }
}

/// Immutable JSON encoder/decoder.
///
/// Date and time values are written through their serde representation,
/// which for `chrono` types is RFC 3339 text rather than a numeric
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonCodec {
    options: CodecOptions,
}

impl JsonCodec {
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Installs the process-wide codec.
    /// - Installing the same options again returns the existing codec.
    /// - Installing different options after the first call is an error.
    pub fn install(options: CodecOptions) -> Result<Arc<JsonCodec>, ColumnError> {
        let codec = SHARED.get_or_init(|| {
            tracing::debug!(?options, "installing shared JSON codec");
            Arc::new(JsonCodec::new(options))
        });
        if codec.options != options {
            return Err(ColumnError::InvalidConfiguration(format!(
                "shared JSON codec already installed with {:?}",
                codec.options
            )));
        }
        Ok(codec.clone())
    }

    /// The process-wide codec, installing the default options on first use.
    pub fn shared() -> Arc<JsonCodec> {
        SHARED
            .get_or_init(|| {
                tracing::debug!("installing shared JSON codec with default options");
                Arc::new(JsonCodec::default())
            })
            .clone()
    }

    pub fn encode<T: Serialize>(&self, value: &T, target: &TargetType) -> Result<String, ColumnError> {
        serde_json::to_string(value).map_err(|source| ColumnError::Encoding {
            target: target.name(),
            source,
        })
    }

    /// Decodes `text` into the target type.
    /// - Returns `Ok(None)` for empty text, `null`, and empty strings that
    ///   stand for a missing object.
    pub fn decode<T>(&self, text: &str, target: &TargetType) -> Result<Option<T>, ColumnError>
    where
        T: Serialize + DeserializeOwned,
    {
        let decoding = |source: serde_json::Error| ColumnError::Decoding {
            target: target.name(),
            source,
        };

        if text.is_empty() && self.options.treat_empty_string_as_absent {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(text).map_err(decoding)?;
        if value.is_null() {
            return Ok(None);
        }

        let (decoded, source) = match self.materialize::<T>(value, target) {
            Ok(Some(found)) => found,
            Ok(None) => return Ok(None),
            Err(e) => return Err(decoding(e)),
        };

        if !self.options.ignore_unknown_fields_on_decode {
            let encoded = serde_json::to_value(&decoded).map_err(decoding)?;
            if let Some(path) = unknown_field(&source, &encoded, String::new()) {
                return Err(decoding(serde::de::Error::custom(format!(
                    "unknown field `{}`",
                    path
                ))));
            }
        }
        Ok(Some(decoded))
    }

    // Tries the payload as-is, then wrapped in a one-element sequence when
    // the target allows it. Each candidate gets its empty strings nulled one
    // failing location at a time. Returns the decoded value together with
    // the JSON it was decoded from.
    fn materialize<T: DeserializeOwned>(
        &self,
        value: Value,
        target: &TargetType,
    ) -> Result<Option<(T, Value)>, serde_json::Error> {
        let wrapped = (target.is_sequence()
            && self.options.accept_single_value_as_sequence
            && !value.is_array())
        .then(|| Value::Array(vec![value.clone()]));

        let first = match self.blank_until_valid::<T>(value) {
            Ok(found) => return Ok(found),
            Err(e) => e,
        };
        match wrapped.map(|candidate| self.blank_until_valid::<T>(candidate)) {
            Some(Ok(found)) => Ok(found),
            _ => Err(first),
        }
    }

    fn blank_until_valid<T: DeserializeOwned>(
        &self,
        mut value: Value,
    ) -> Result<Option<(T, Value)>, serde_json::Error> {
        loop {
            let attempt: Result<T, _> = serde_path_to_error::deserialize(&value);
            let error = match attempt {
                Ok(decoded) => return Ok(Some((decoded, value))),
                Err(e) => e,
            };
            if !self.options.treat_empty_string_as_absent || !blank_at(&mut value, error.path()) {
                return Err(error.into_inner());
            }
            if value.is_null() {
                return Ok(None);
            }
        }
    }
}

// Nulls the `""` at `path`, returning whether there was one.
fn blank_at(value: &mut Value, path: &Path) -> bool {
    let mut slot = value;
    for segment in path.iter() {
        let next = match (segment, slot) {
            (Segment::Seq { index }, Value::Array(items)) => items.get_mut(*index),
            (Segment::Map { key }, Value::Object(fields)) => fields.get_mut(key),
            _ => None,
        };
        match next {
            Some(child) => slot = child,
            None => return false,
        }
    }
    if slot.as_str() == Some("") {
        *slot = Value::Null;
        return true;
    }
    false
}

// First non-null key of `source` that did not survive into `encoded`.
fn unknown_field(source: &Value, encoded: &Value, path: String) -> Option<String> {
    match (source, encoded) {
        (Value::Object(fields), Value::Object(kept)) => fields.iter().find_map(|(key, item)| {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            match kept.get(key) {
                None if item.is_null() => None,
                None => Some(child),
                Some(other) => unknown_field(item, other, child),
            }
        }),
        (Value::Array(items), Value::Array(kept)) => items
            .iter()
            .zip(kept)
            .enumerate()
            .find_map(|(i, (item, other))| unknown_field(item, other, format!("{}[{}]", path, i))),
        _ => None,
    }
}

/// Field helper: accepts either a single value or a list of values.
///
/// ```ignore
/// #[serde(deserialize_with = "json_column::json::one_or_many")]
/// tags: Vec<String>,
/// ```
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

/// Field helper: reads `""` as `None` for optional nested values.
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(value) => T::deserialize(value).map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ColumnObject;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct OnlyA {
        a: i32,
    }

    impl ColumnObject for OnlyA {}

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct ImageUrl {
        original: String,
        #[serde(default)]
        thumbnail: Option<Thumbnail>,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct Thumbnail {
        url: String,
    }

    impl ColumnObject for ImageUrl {}

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct Illustration {
        id: i64,
        title: String,
        created: DateTime<Utc>,
    }

    impl ColumnObject for Illustration {}

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    struct Tagged {
        #[serde(deserialize_with = "one_or_many")]
        tags: Vec<String>,
        #[serde(default, deserialize_with = "empty_as_none")]
        cover: Option<Thumbnail>,
    }

    fn decode<T: ColumnObject>(codec: &JsonCodec, text: &str) -> Result<Option<T>, ColumnError> {
        codec.decode(text, &T::target_type())
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let codec = JsonCodec::default();
        let decoded: Option<OnlyA> = decode(&codec, r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(decoded, Some(OnlyA { a: 1 }));
    }

    #[test]
    fn test_unknown_fields_rejected_when_strict() {
        let codec = JsonCodec::new(CodecOptions::default().ignore_unknown_fields(false));
        let err = decode::<OnlyA>(&codec, r#"{"a":1,"b":2}"#).unwrap_err();
        assert!(err.is_decoding());
        assert!(err.to_string().contains("unknown field `b`"));

        // null-valued extras carry no data
        let decoded: Option<OnlyA> = decode(&codec, r#"{"a":1,"b":null}"#).unwrap();
        assert_eq!(decoded, Some(OnlyA { a: 1 }));
    }

    #[test]
    fn test_single_value_as_sequence() {
        let codec = JsonCodec::default();
        let decoded: Option<Vec<String>> = decode(&codec, r#""x""#).unwrap();
        assert_eq!(decoded, Some(vec!["x".to_string()]));

        let decoded: Option<Vec<OnlyA>> = decode(&codec, r#"{"a":7}"#).unwrap();
        assert_eq!(decoded, Some(vec![OnlyA { a: 7 }]));
    }

    #[test]
    fn test_single_value_rejected_when_disabled() {
        let codec = JsonCodec::new(CodecOptions::default().accept_single_value_as_sequence(false));
        assert!(decode::<Vec<String>>(&codec, r#""x""#).is_err());
    }

    #[test]
    fn test_single_value_only_applies_to_sequences() {
        let codec = JsonCodec::default();
        // a struct would accept `[1]` as a tuple-like sequence; value targets are not wrapped
        assert!(decode::<OnlyA>(&codec, "1").is_err());
    }

    #[test]
    fn test_empty_input_is_absent() {
        let codec = JsonCodec::default();
        assert_eq!(decode::<OnlyA>(&codec, "").unwrap(), None);
        assert_eq!(decode::<OnlyA>(&codec, "null").unwrap(), None);
        assert_eq!(decode::<OnlyA>(&codec, r#""""#).unwrap(), None);
    }

    #[test]
    fn test_whitespace_input_is_decoding_error() {
        let codec = JsonCodec::default();
        assert!(decode::<OnlyA>(&codec, "   ").unwrap_err().is_decoding());
    }

    #[test]
    fn test_empty_string_is_kept_for_string_targets() {
        let codec = JsonCodec::default();
        assert_eq!(decode::<String>(&codec, r#""""#).unwrap(), Some(String::new()));
    }

    #[test]
    fn test_empty_input_fails_when_option_disabled() {
        let codec = JsonCodec::new(CodecOptions::default().treat_empty_string_as_absent(false));
        assert!(decode::<OnlyA>(&codec, "").is_err());
        assert!(decode::<OnlyA>(&codec, r#""""#).is_err());
    }

    #[test]
    fn test_nested_empty_string_becomes_absent() {
        let codec = JsonCodec::default();
        let decoded: Option<ImageUrl> =
            decode(&codec, r#"{"original":"a.png","thumbnail":""}"#).unwrap();
        assert_eq!(
            decoded,
            Some(ImageUrl {
                original: "a.png".to_string(),
                thumbnail: None,
            })
        );
    }

    #[test]
    fn test_empty_string_field_kept_next_to_blanked_object() {
        let codec = JsonCodec::default();
        let decoded: Option<ImageUrl> =
            decode(&codec, r#"{"original":"","thumbnail":""}"#).unwrap();
        assert_eq!(
            decoded,
            Some(ImageUrl {
                original: String::new(),
                thumbnail: None,
            })
        );
    }

    #[test]
    fn test_empty_strings_blanked_per_element() {
        let codec = JsonCodec::default();
        let decoded: Option<Vec<ImageUrl>> = decode(
            &codec,
            r#"[{"original":"a.png","thumbnail":""},{"original":"","thumbnail":{"url":"b.png"}}]"#,
        )
        .unwrap();
        let decoded = decoded.unwrap();
        assert_eq!(decoded[0].thumbnail, None);
        assert_eq!(decoded[1].original, "");
        assert_eq!(decoded[1].thumbnail, Some(Thumbnail { url: "b.png".to_string() }));
    }

    #[test]
    fn test_single_record_with_empty_string_into_sequence() {
        let codec = JsonCodec::default();
        let decoded: Option<Vec<ImageUrl>> =
            decode(&codec, r#"{"original":"a.png","thumbnail":""}"#).unwrap();
        assert_eq!(
            decoded,
            Some(vec![ImageUrl {
                original: "a.png".to_string(),
                thumbnail: None,
            }])
        );
    }

    #[test]
    fn test_unfixable_payload_reports_first_error() {
        let codec = JsonCodec::default();
        let err = decode::<ImageUrl>(&codec, r#"{"original":7,"thumbnail":""}"#).unwrap_err();
        assert!(err.is_decoding());
        assert!(err.to_string().contains("invalid type"));
    }

    #[test]
    fn test_field_helpers() {
        let codec = JsonCodec::default();
        let decoded: Option<Tagged> = decode(&codec, r#"{"tags":"solo","cover":""}"#).unwrap();
        assert_eq!(
            decoded,
            Some(Tagged {
                tags: vec!["solo".to_string()],
                cover: None,
            })
        );

        let decoded: Option<Tagged> =
            decode(&codec, r#"{"tags":["a","b"],"cover":{"url":"c.png"}}"#).unwrap();
        let decoded = decoded.unwrap();
        assert_eq!(decoded.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(decoded.cover, Some(Thumbnail { url: "c.png".to_string() }));
    }

    impl ColumnObject for Tagged {}

    #[test]
    fn test_dates_are_structured_text() {
        let codec = JsonCodec::default();
        let illust = Illustration {
            id: 42,
            title: "sunset".to_string(),
            created: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        let text = codec.encode(&illust, &Illustration::target_type()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert!(value["created"].is_string());
        assert!(value["created"].as_str().unwrap().starts_with("2024-01-02T03:04:05"));

        let decoded: Option<Illustration> = decode(&codec, &text).unwrap();
        assert_eq!(decoded, Some(illust));
    }

    #[test]
    fn test_encode_rejects_non_string_keys() {
        let codec = JsonCodec::default();
        let mut grid = HashMap::new();
        grid.insert((1u8, 2u8), "tile".to_string());
        let err = codec.encode(&grid, &TargetType::value::<HashMap<(u8, u8), String>>()).unwrap_err();
        assert!(err.is_encoding());
    }

    #[test]
    fn test_malformed_text_is_decoding_error() {
        let codec = JsonCodec::default();
        let err = decode::<OnlyA>(&codec, "{not valid json").unwrap_err();
        assert!(err.is_decoding());
    }

    #[test]
    fn test_options_from_json() {
        let options = CodecOptions::from_json(r#"{"ignore-unknown-fields-on-decode": false}"#).unwrap();
        assert!(!options.ignore_unknown_fields_on_decode);
        assert!(options.accept_single_value_as_sequence);
        assert!(options.treat_empty_string_as_absent);

        assert!(matches!(
            CodecOptions::from_json("{"),
            Err(ColumnError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_shared_codec_install() {
        let codec = JsonCodec::install(CodecOptions::default()).unwrap();
        assert_eq!(codec.options(), &CodecOptions::default());
        assert!(Arc::ptr_eq(&codec, &JsonCodec::shared()));

        let conflicting = CodecOptions::default().ignore_unknown_fields(false);
        assert!(matches!(
            JsonCodec::install(conflicting),
            Err(ColumnError::InvalidConfiguration(_))
        ));
    }
}
