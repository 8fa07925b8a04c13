//! Request bodies and multi-row form decoding.
//!
//! Forms that carry several records at once (meals of a diet plan, exercises
//! of a program) encode them as flat fields named
//! `<collection>[<index>][<attribute>]`. [`decode_rows`] folds those fields
//! back into records in one pass, grouping by index in a `BTreeMap` so the
//! output is ordered by index regardless of submission order. Indices do not
//! have to be contiguous; what happens to gaps is decided by [`GapPolicy`].
//!
//! [`Payload`] is the body extractor every write handler uses. It accepts
//! JSON, urlencoded forms and multipart forms (the only way to attach an
//! image) and turns form bodies into the same JSON shape a JSON client would
//! send, so handlers deserialize one typed request either way.

use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use super::error::ApiError;

/// Upper bound on records accepted for one collection
const MAX_ROWS: usize = 200;

lazy_static! {
    /// `collection[index][attribute]`
    static ref ROW_KEY_REGEX: Regex =
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\[(\d+)\]\[([A-Za-z_][A-Za-z0-9_]*)\]$").unwrap();
}

#[derive(Debug, Error, PartialEq)]
pub enum FormError {
    #[error("{field}: {message}")]
    Field { field: String, message: String },
    #[error("{0}")]
    Body(String),
}

impl FormError {
    fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        FormError::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// What to do when submitted indices are not `0, 1, 2, ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Keep the records that exist, ordered by index; each remembers its index
    #[default]
    Compact,
    /// Any missing index is a validation error
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => Value::from(*f),
        }
    }
}

/// Key under which a decoded row carries its submitted index
pub const ROW_INDEX_KEY: &str = "index";

/// One reassembled record and the index it was submitted under
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRow {
    pub index: usize,
    pub fields: BTreeMap<String, FieldValue>,
}

impl IndexedRow {
    pub fn get(&self, attr: &str) -> Option<&FieldValue> {
        self.fields.get(attr)
    }

    /// The record as a JSON object; the submitted index rides along under
    /// [`ROW_INDEX_KEY`] so errors can name the row the client sent.
    pub fn to_json(&self) -> Value {
        let mut object: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        object.insert(ROW_INDEX_KEY.to_string(), Value::from(self.index));
        Value::Object(object)
    }
}

/// A row collection and which of its attributes are numbers
#[derive(Debug, Clone, Copy)]
pub struct RowSpec {
    pub collection: &'static str,
    pub numeric: &'static [&'static str],
}

/// Shape of a whole form submission
#[derive(Debug, Clone, Copy)]
pub struct FormSchema {
    /// Top-level fields holding numbers
    pub numeric: &'static [&'static str],
    pub rows: &'static [RowSpec],
}

impl FormSchema {
    pub const fn flat(numeric: &'static [&'static str]) -> Self {
        Self { numeric, rows: &[] }
    }

    /// Turn flat form pairs into the JSON object a JSON client would send.
    ///
    /// Blank top-level values are dropped so optional fields read as absent.
    /// Row collections appear as arrays only when at least one row was sent.
    pub fn to_json(&self, fields: &[(String, String)], policy: GapPolicy) -> Result<Value, FormError> {
        let mut object = Map::new();

        for (key, raw) in fields {
            if key.contains('[') {
                continue;
            }
            if raw.trim().is_empty() {
                continue;
            }
            let value = if self.numeric.contains(&key.as_str()) {
                match coerce_number(key, raw)? {
                    Some(n) => n.to_json(),
                    None => continue,
                }
            } else {
                Value::String(raw.clone())
            };
            object.insert(key.clone(), value);
        }

        for spec in self.rows {
            let rows = decode_rows(fields, spec, policy)?;
            if !rows.is_empty() {
                let array = rows.iter().map(IndexedRow::to_json).collect();
                object.insert(spec.collection.to_string(), Value::Array(array));
            }
        }

        Ok(Value::Object(object))
    }
}

/// Reassemble the records of one collection from flat form fields.
///
/// Attributes listed in `spec.numeric` are coerced to integers (or floats
/// when the text is not an integer); blank numeric values are left absent.
/// An attribute missing for some index is simply absent on that record.
pub fn decode_rows(
    fields: &[(String, String)],
    spec: &RowSpec,
    policy: GapPolicy,
) -> Result<Vec<IndexedRow>, FormError> {
    let mut rows: BTreeMap<usize, BTreeMap<String, FieldValue>> = BTreeMap::new();

    for (key, raw) in fields {
        let Some(caps) = ROW_KEY_REGEX.captures(key) else {
            continue;
        };
        if &caps[1] != spec.collection {
            continue;
        }

        let index: usize = caps[2]
            .parse()
            .map_err(|_| FormError::field(key.as_str(), "row index is out of range"))?;
        let attr = caps[3].to_string();

        if !rows.contains_key(&index) && rows.len() >= MAX_ROWS {
            return Err(FormError::field(
                spec.collection,
                format!("at most {} rows may be submitted", MAX_ROWS),
            ));
        }
        let row = rows.entry(index).or_default();

        if spec.numeric.contains(&attr.as_str()) {
            if let Some(value) = coerce_number(key, raw)? {
                row.insert(attr, value);
            }
        } else {
            row.insert(attr, FieldValue::Text(raw.clone()));
        }
    }

    if policy == GapPolicy::Reject {
        if let Some(missing) = (0..rows.len()).find(|i| !rows.contains_key(i)) {
            return Err(FormError::field(
                spec.collection,
                format!("rows must be numbered from 0 without gaps; index {} is missing", missing),
            ));
        }
    }

    Ok(rows
        .into_iter()
        .map(|(index, fields)| IndexedRow { index, fields })
        .collect())
}

fn coerce_number(key: &str, raw: &str) -> Result<Option<FieldValue>, FormError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Some(FieldValue::Integer(i)));
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(Some(FieldValue::Float(f))),
        _ => Err(FormError::field(key, "must be a number")),
    }
}

// -------------------------------------------------------------------------
// Body extractor
// -------------------------------------------------------------------------

/// A file part from a multipart body
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug)]
enum Body {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A write request body in any of the accepted encodings
#[derive(Debug)]
pub struct Payload {
    body: Body,
    image: Option<UploadedFile>,
}

impl Payload {
    pub fn json(value: Value) -> Self {
        Self {
            body: Body::Json(value),
            image: None,
        }
    }

    pub fn form(fields: Vec<(String, String)>, image: Option<UploadedFile>) -> Self {
        Self {
            body: Body::Form(fields),
            image,
        }
    }

    /// Deserialize the body into `T`, decoding form fields through `schema`.
    /// Returns the attached image, if any, alongside.
    pub fn into_parts<T: DeserializeOwned>(
        self,
        schema: &FormSchema,
    ) -> Result<(T, Option<UploadedFile>), FormError> {
        let value = match self.body {
            Body::Json(value) => value,
            Body::Form(fields) => schema.to_json(&fields, GapPolicy::Compact)?,
        };
        let parsed = serde_json::from_value(value).map_err(|e| FormError::Body(e.to_string()))?;
        Ok((parsed, self.image))
    }
}

#[async_trait]
impl<S> FromRequest<S> for Payload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;

            let mut fields = Vec::new();
            let mut image = None;

            while let Some(field) = multipart.next_field().await? {
                let name = field.name().unwrap_or_default().to_string();

                if field.file_name().is_some() || name == "image" {
                    let filename = field.file_name().map(str::to_string);
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    if name == "image" && !bytes.is_empty() {
                        image = Some(UploadedFile {
                            filename,
                            content_type,
                            bytes,
                        });
                    }
                    continue;
                }

                let text = field.text().await?;
                fields.push((name, text));
            }

            Ok(Payload::form(fields, image))
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            Ok(Payload::form(fields, None))
        } else {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            Ok(Payload::json(value))
        }
    }
}
