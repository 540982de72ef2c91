//! Form body decoding.
//!
//! [`decode`] turns a complete request body into [`FormData`] according to the
//! request `Content-Type`:
//!
//! | Content type                          | Decoder                    |
//! |---------------------------------------|----------------------------|
//! | `application/x-www-form-urlencoded`   | percent-decoded pairs      |
//! | `multipart/form-data; boundary=…`     | [`multipart`], byte-exact  |
//! | anything else                         | empty [`FormData`]         |
//!
//! Repeated names are coalesced: the field keeps the position where its name
//! first appeared and collects every value in order.

use bytes::Bytes;
use percent_encoding::percent_decode;
use serde::Serialize;

pub mod multipart;

/// One value of a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    File {
        filename: String,
        content_type: Option<String>,
        data: Bytes,
    },
}

impl FieldValue {
    /// The value as text, or `None` for file uploads.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File { .. } => None,
        }
    }

    /// The raw bytes of the value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::File { data, .. } => data,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::File { filename, .. } => Some(filename),
            Self::Text(_) => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::File { content_type, .. } => content_type.as_deref(),
            Self::Text(_) => None,
        }
    }
}

/// A named form field with one or more values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    name: String,
    values: Vec<FieldValue>,
}

impl FormField {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The first value. Every field has at least one.
    pub fn value(&self) -> &FieldValue {
        &self.values[0]
    }

    /// All values in the order they were sent.
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// The first value as text.
    pub fn text(&self) -> Option<&str> {
        self.value().as_text()
    }

    /// `true` if any value is a file upload.
    pub fn is_file(&self) -> bool {
        self.values.iter().any(|v| v.filename().is_some())
    }
}

/// The decoded fields of a form body, in first-seen order.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use wwwroot::form::decode;
///
/// let form = decode(
///     Some("application/x-www-form-urlencoded"),
///     &Bytes::from_static(b"tag=a&title=Hello+World%21&tag=b"),
/// );
/// assert_eq!(form.len(), 2);
/// assert_eq!(form.get("title").and_then(|f| f.text()), Some("Hello World!"));
///
/// let tags: Vec<_> = form.get("tag").unwrap().values().iter()
///     .filter_map(|v| v.as_text())
///     .collect();
/// assert_eq!(tags, ["a", "b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<FormField>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, coalescing it into an existing field of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.values.push(value),
            None => self.fields.push(FormField {
                name,
                values: vec![value],
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The first field carrying a file upload.
    pub fn first_file(&self) -> Option<(&FormField, &FieldValue)> {
        self.fields.iter().find_map(|field| {
            field
                .values
                .iter()
                .find(|v| v.filename().is_some())
                .map(|v| (field, v))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormField> {
        self.fields.iter()
    }

    /// Number of distinct field names.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A serializable summary: text values verbatim, files as metadata and size.
    pub fn summary(&self) -> Vec<FieldSummary<'_>> {
        self.fields
            .iter()
            .flat_map(|field| {
                field.values.iter().map(move |value| match value {
                    FieldValue::Text(text) => FieldSummary {
                        name: &field.name,
                        value: Some(text),
                        filename: None,
                        content_type: None,
                        size: text.len(),
                    },
                    FieldValue::File {
                        filename,
                        content_type,
                        data,
                    } => FieldSummary {
                        name: &field.name,
                        value: None,
                        filename: Some(filename),
                        content_type: content_type.as_deref(),
                        size: data.len(),
                    },
                })
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a FormData {
    type Item = &'a FormField;
    type IntoIter = std::slice::Iter<'a, FormField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// JSON-friendly view of one form value, see [`FormData::summary`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSummary<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<&'a str>,
    pub size: usize,
}

/// Decodes a complete body according to `content_type`.
///
/// Unsupported or missing content types yield an empty [`FormData`].
pub fn decode(content_type: Option<&str>, body: &Bytes) -> FormData {
    let Some(content_type) = content_type else {
        return FormData::new();
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();

    if essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        decode_urlencoded(body)
    } else if essence.eq_ignore_ascii_case("multipart/form-data") {
        match multipart::boundary(content_type) {
            Some(boundary) => multipart::decode(body, &boundary),
            None => FormData::new(),
        }
    } else {
        FormData::new()
    }
}

/// Decodes an `application/x-www-form-urlencoded` body.
pub fn decode_urlencoded(body: &[u8]) -> FormData {
    let mut form = FormData::new();
    for (name, value) in decode_pairs(body) {
        form.push(name, FieldValue::Text(value));
    }
    form
}

/// Splits `key=value&…` input into decoded pairs. `+` means space; invalid
/// UTF-8 after percent-decoding is replaced lossily. Empty segments are skipped.
pub(crate) fn decode_pairs(input: &[u8]) -> impl Iterator<Item = (String, String)> + '_ {
    input
        .split(|&b| b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = match memchr::memchr(b'=', pair) {
                Some(idx) => (&pair[..idx], &pair[idx + 1..]),
                None => (pair, &[][..]),
            };
            (decode_component(key), decode_component(value))
        })
}

fn decode_component(raw: &[u8]) -> String {
    let spaced: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&spaced).decode_utf8_lossy().into_owned()
}
