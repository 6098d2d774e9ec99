//! Template System - Documents, Validated Fields and Certificates
//!
//! `TemplateDoc` is the template as authored. `Template` is what validation
//! produces; it serializes back to the document shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};
use std::fmt;
use std::fs;
use std::path::Path;

/// Names no field may take; `template`, `uid` and `_id` are also stripped from rows.
pub const RESERVED_NAMES: [&str; 4] = ["TITLE", "template", "uid", "_id"];

/// Column overriding the certificate title
pub const TITLE_COLUMN: &str = "TITLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Number,
    Boolean,
    String,
    Image,
    Date,
}

impl FieldType {
    pub const ALL: [FieldType; 5] = [
        FieldType::Number,
        FieldType::Boolean,
        FieldType::String,
        FieldType::Image,
        FieldType::Date,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::String => "String",
            FieldType::Image => "Image",
            FieldType::Date => "Date",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Documents (as authored) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDoc {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub background: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub fields: Option<Vec<FieldDoc>>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl TemplateDoc {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDoc {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fixed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub placeholder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<SizeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_format: Option<TextFormat>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

/// Expected image size. Only its presence is required; the renderer reads the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub style_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient: Option<Gradient>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl TextStyle {
    pub fn is_gradient(&self) -> bool {
        self.style_type.as_deref() == Some("gradient")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stops: Option<Vec<Json>>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

// --- Validated model ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "TemplateDoc")]
pub struct Template {
    pub name: String,
    pub title: String,
    pub uid: Option<String>,
    /// Resolved background path
    pub background: String,
    pub dimensions: Option<Dimensions>,
    pub fields: Vec<Field>,
    pub extra: Map<String, Json>,
}

impl Template {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl From<Template> for TemplateDoc {
    fn from(t: Template) -> Self {
        TemplateDoc {
            name: t.name,
            title: t.title,
            uid: t.uid,
            background: t.background,
            dimensions: t.dimensions,
            fields: Some(t.fields.into_iter().map(FieldDoc::from).collect()),
            extra: t.extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub required: bool,
    pub fixed: bool,
    pub placeholder: bool,
    pub kind: FieldKind,
    /// Layout attributes passed through to the renderer
    pub extra: Map<String, Json>,
}

/// Per-type attributes. Date values are normalized RFC 3339 strings;
/// image values are resolved relative paths.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Number {
        value: Option<Number>,
        default_value: Option<Number>,
        text_format: TextFormat,
    },
    Boolean {
        value: Option<bool>,
        default_value: Option<bool>,
        text_format: TextFormat,
    },
    String {
        value: Option<String>,
        default_value: Option<String>,
        text_format: TextFormat,
    },
    Date {
        value: Option<String>,
        default_value: Option<String>,
        text_format: TextFormat,
    },
    Image {
        value: Option<String>,
        default_value: Option<String>,
        image: SizeSpec,
    },
}

impl FieldKind {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldKind::Number { .. } => FieldType::Number,
            FieldKind::Boolean { .. } => FieldType::Boolean,
            FieldKind::String { .. } => FieldType::String,
            FieldKind::Date { .. } => FieldType::Date,
            FieldKind::Image { .. } => FieldType::Image,
        }
    }

    pub fn value(&self) -> Option<FieldValue> {
        match self {
            FieldKind::Number { value, .. } => value.clone().map(FieldValue::Number),
            FieldKind::Boolean { value, .. } => value.map(FieldValue::Boolean),
            FieldKind::String { value, .. } => value.clone().map(FieldValue::String),
            FieldKind::Date { value, .. } => value.clone().map(FieldValue::Date),
            FieldKind::Image { value, .. } => value.clone().map(FieldValue::Image),
        }
    }

    pub fn has_default(&self) -> bool {
        match self {
            FieldKind::Number { default_value, .. } => default_value.is_some(),
            FieldKind::Boolean { default_value, .. } => default_value.is_some(),
            FieldKind::String { default_value, .. }
            | FieldKind::Date { default_value, .. }
            | FieldKind::Image { default_value, .. } => default_value.is_some(),
        }
    }
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        self.kind.field_type()
    }
}

impl From<Field> for FieldDoc {
    fn from(f: Field) -> Self {
        let field_type = Some(f.kind.field_type().as_str().to_string());
        let (value, default_value, image, text_format) = match f.kind {
            FieldKind::Number { value, default_value, text_format } => (
                value.map(Json::Number),
                default_value.map(Json::Number),
                None,
                Some(text_format),
            ),
            FieldKind::Boolean { value, default_value, text_format } => (
                value.map(Json::Bool),
                default_value.map(Json::Bool),
                None,
                Some(text_format),
            ),
            FieldKind::String { value, default_value, text_format }
            | FieldKind::Date { value, default_value, text_format } => (
                value.map(Json::String),
                default_value.map(Json::String),
                None,
                Some(text_format),
            ),
            FieldKind::Image { value, default_value, image } => (
                value.map(Json::String),
                default_value.map(Json::String),
                Some(image),
                None,
            ),
        };
        FieldDoc {
            name: f.name,
            field_type,
            required: f.required,
            fixed: f.fixed,
            placeholder: f.placeholder,
            value,
            default_value,
            image,
            text_format,
            extra: f.extra,
        }
    }
}

// --- Values and certificates ---

/// A typed value, tagged by field type
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(Number),
    Boolean(bool),
    String(String),
    Date(String),
    Image(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Image(_) => FieldType::Image,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            FieldValue::Number(n) => Json::Number(n.clone()),
            FieldValue::Boolean(b) => Json::Bool(*b),
            FieldValue::String(s) | FieldValue::Date(s) | FieldValue::Image(s) => {
                Json::String(s.clone())
            }
        }
    }

    pub fn from_json(field_type: FieldType, json: Json) -> Option<Self> {
        match (field_type, json) {
            (FieldType::Number, Json::Number(n)) => Some(FieldValue::Number(n)),
            (FieldType::Boolean, Json::Bool(b)) => Some(FieldValue::Boolean(b)),
            (FieldType::String, Json::String(s)) => Some(FieldValue::String(s)),
            (FieldType::Date, Json::String(s)) => Some(FieldValue::Date(s)),
            (FieldType::Image, Json::String(s)) => Some(FieldValue::Image(s)),
            _ => None,
        }
    }
}

/// One merged output entry: `{ name, type, value, visible }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ValueDoc", try_from = "ValueDoc")]
pub struct Value {
    pub name: String,
    pub value: FieldValue,
    pub visible: bool,
}

/// Wire form of [`Value`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub value: Json,
    pub visible: bool,
}

impl From<Value> for ValueDoc {
    fn from(v: Value) -> Self {
        ValueDoc {
            name: v.name,
            field_type: v.value.field_type(),
            value: v.value.to_json(),
            visible: v.visible,
        }
    }
}

impl TryFrom<ValueDoc> for Value {
    type Error = String;

    fn try_from(doc: ValueDoc) -> Result<Self, Self::Error> {
        let value = FieldValue::from_json(doc.field_type, doc.value)
            .ok_or_else(|| format!("value of '{}' is not a {}", doc.name, doc.field_type))?;
        Ok(Value {
            name: doc.name,
            value,
            visible: doc.visible,
        })
    }
}

/// One submitted value, before merging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub name: String,
    #[serde(default)]
    pub value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

impl Submission {
    pub fn new(name: impl Into<String>, value: impl Into<Json>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            visible: None,
        }
    }

    pub fn hidden(name: impl Into<String>, value: Option<Json>) -> Self {
        Self {
            name: name.into(),
            value,
            visible: Some(false),
        }
    }
}

/// A candidate certificate awaiting merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateDraft {
    pub uid: String,
    pub template: String,
    pub title: String,
    pub date: String,
    pub values: Vec<Submission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub uid: String,
    pub template: String,
    pub title: String,
    pub date: String,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Certificate {
    /// A failed candidate retained for reporting; carries no values.
    pub fn failed(draft: CertificateDraft, error: impl Into<String>) -> Self {
        Self {
            uid: draft.uid,
            template: draft.template,
            title: draft.title,
            date: draft.date,
            values: vec![],
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|v| v.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_parse() {
        assert_eq!(FieldType::parse("Image"), Some(FieldType::Image));
        assert_eq!(FieldType::parse("image"), None);
        assert_eq!(FieldType::parse("Color"), None);
    }

    #[test]
    fn test_template_doc_preserves_layout_keys() {
        let doc = TemplateDoc::from_json(
            r#"{"name":"award","title":"Award","background":"bg.png",
                "dimensions":{"width":1920,"height":1080},
                "fields":[{"name":"Name","x":10,"y":20,"textFormat":{"size":32}}]}"#,
        )
        .unwrap();
        let fields = doc.fields.as_ref().unwrap();
        assert_eq!(fields[0].field_type, None);
        assert_eq!(fields[0].extra.get("x"), Some(&json!(10)));
        assert_eq!(
            fields[0].text_format.as_ref().unwrap().extra.get("size"),
            Some(&json!(32))
        );
    }

    #[test]
    fn test_value_wire_shape() {
        let v = Value {
            name: "Age".into(),
            value: FieldValue::Number(42.into()),
            visible: true,
        };
        let wire = serde_json::to_value(&v).unwrap();
        assert_eq!(wire, json!({"name":"Age","type":"Number","value":42,"visible":true}));

        let back: Value = serde_json::from_value(wire).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_value_type_mismatch_rejected_on_read() {
        let wire = json!({"name":"Age","type":"Number","value":"42","visible":true});
        assert!(serde_json::from_value::<Value>(wire).is_err());
    }

    #[test]
    fn test_date_value_survives_round_trip_as_date() {
        let v = Value {
            name: "Issued".into(),
            value: FieldValue::Date("2024-01-01T00:00:00Z".into()),
            visible: true,
        };
        let back: Value = serde_json::from_str(&serde_json::to_string(&v).unwrap()).unwrap();
        assert_eq!(back.value.field_type(), FieldType::Date);
    }
}
