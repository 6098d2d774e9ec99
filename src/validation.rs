//! Validation System - Template Schema Checks
//!
//! A template is all-or-nothing: the first violation aborts validation.
//! Validation produces a new, normalized `Template`.

use log::debug;
use serde_json::Value as Json;
use thiserror::Error;

use crate::convert::normalize_date;
use crate::image::{ImageResolver, ImageSource};
use crate::templates::{
    Field, FieldDoc, FieldKind, FieldType, Template, TemplateDoc, TextFormat, RESERVED_NAMES,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid value for fields!")]
    MissingFields,

    #[error("Invalid {subject}: {reason}")]
    Schema { subject: String, reason: String },

    #[error("Duplicate fields named '{0}' received!")]
    DuplicateField(String),

    #[error("Duplicate values for the field '{0}' received!")]
    DuplicateValue(String),

    #[error("Received no value for field '{0}'!")]
    MissingValue(String),

    #[error("Empty values not allowed!")]
    EmptyValues,

    #[error("Only {expected} values accepted for '{field}'!")]
    TypeMismatch { field: String, expected: FieldType },

    #[error("Invalid date for '{0}'! Use the UTC/ISO format.")]
    DateParse(String),

    #[error("Invalid value for {subject}: {reason}")]
    ImageUnavailable { subject: String, reason: String },
}

impl ValidationError {
    fn schema(field: &str, reason: impl Into<String>) -> Self {
        Self::Schema {
            subject: format!("field '{}'", field),
            reason: reason.into(),
        }
    }
}

/// Decides whether a placeholder field is well formed.
pub trait PlaceholderRule {
    fn name(&self) -> &'static str;
    fn accepts(&self, field: &FieldDoc, field_type: FieldType) -> bool;
}

/// Accepts placeholders whose literal matches the declared type.
/// Text literals must be non-empty.
pub struct LiteralPlaceholder;

impl PlaceholderRule for LiteralPlaceholder {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn accepts(&self, field: &FieldDoc, field_type: FieldType) -> bool {
        match (field_type, &field.value) {
            (FieldType::Number, Some(Json::Number(_))) => true,
            (FieldType::Boolean, Some(Json::Bool(_))) => true,
            (FieldType::Image, Some(Json::String(s))) => !s.is_empty() && field.image.is_some(),
            (FieldType::String | FieldType::Date, Some(Json::String(s))) => !s.is_empty(),
            _ => false,
        }
    }
}

/// Resolve an image reference or fail with the reason a template author needs.
pub(crate) fn require_image(
    resolver: &ImageResolver,
    reference: &str,
    subject: impl FnOnce() -> String,
) -> Result<String, ValidationError> {
    if ImageSource::classify(reference) == ImageSource::Local && !resolver.validate(reference) {
        return Err(ValidationError::ImageUnavailable {
            subject: subject(),
            reason: "Image not found!".into(),
        });
    }
    resolver
        .resolve(reference)
        .ok_or_else(|| ValidationError::ImageUnavailable {
            subject: subject(),
            reason: "Image not accessible!".into(),
        })
}

/// Validates template documents against the field schema.
pub struct TemplateValidator<'r> {
    resolver: &'r ImageResolver,
    placeholder_rule: Box<dyn PlaceholderRule + Send + Sync>,
}

impl<'r> TemplateValidator<'r> {
    pub fn new(resolver: &'r ImageResolver) -> Self {
        Self {
            resolver,
            placeholder_rule: Box::new(LiteralPlaceholder),
        }
    }

    pub fn with_placeholder_rule(mut self, rule: Box<dyn PlaceholderRule + Send + Sync>) -> Self {
        self.placeholder_rule = rule;
        self
    }

    pub fn validate(&self, doc: TemplateDoc) -> Result<Template, ValidationError> {
        let background = require_image(self.resolver, &doc.background, || {
            "certificate background".to_string()
        })?;

        let docs = doc.fields.ok_or(ValidationError::MissingFields)?;

        let mut fields = Vec::with_capacity(docs.len());
        for field in &docs {
            if docs.iter().filter(|f| f.name == field.name).count() > 1 {
                return Err(ValidationError::DuplicateField(field.name.clone()));
            }
            fields.push(self.validate_field(field.clone())?);
        }

        debug!("Template '{}' validated with {} fields", doc.name, fields.len());

        Ok(Template {
            name: doc.name,
            title: doc.title,
            uid: doc.uid,
            background,
            dimensions: doc.dimensions,
            fields,
            extra: doc.extra,
        })
    }

    fn validate_field(&self, mut doc: FieldDoc) -> Result<Field, ValidationError> {
        let type_name = doc.field_type.as_deref().unwrap_or("String");
        let field_type = FieldType::parse(type_name).ok_or_else(|| {
            ValidationError::schema(
                &doc.name,
                "Only Number, Boolean, String, Image, and Date allowed.",
            )
        })?;

        if RESERVED_NAMES.contains(&doc.name.as_str()) {
            return Err(ValidationError::schema(&doc.name, "Name not allowed for fields."));
        }

        let has_literal = !matches!(doc.value, None | Some(Json::Null));
        if (doc.fixed || doc.placeholder) && !has_literal {
            return Err(ValidationError::schema(
                &doc.name,
                "A fixed field cannot have an empty value.",
            ));
        }

        if doc.placeholder {
            if !self.placeholder_rule.accepts(&doc, field_type) {
                return Err(ValidationError::schema(
                    &doc.name,
                    format!("Not a valid placeholder ({} rule).", self.placeholder_rule.name()),
                ));
            }
            return build_field(doc, field_type);
        }

        match field_type {
            FieldType::Image => {
                if doc.image.is_none() {
                    return Err(ValidationError::schema(
                        &doc.name,
                        "An expected size must be defined.",
                    ));
                }
                let name = doc.name.clone();
                doc.value = self.resolve_image_slot(doc.value.take(), || {
                    format!("field '{}'", name)
                })?;
                doc.default_value = self.resolve_image_slot(doc.default_value.take(), || {
                    format!("default value of field '{}'", name)
                })?;
            }
            _ => {
                let format = doc.text_format.get_or_insert_with(TextFormat::default);
                if let Some(style) = &format.style {
                    let stops = style
                        .gradient
                        .as_ref()
                        .and_then(|g| g.stops.as_ref())
                        .map_or(0, Vec::len);
                    if style.is_gradient() && stops < 2 {
                        return Err(ValidationError::schema(
                            &doc.name,
                            "Invalid gradient configuration!",
                        ));
                    }
                }
            }
        }

        if field_type == FieldType::Date {
            doc.value = normalize_date_slot(&doc.name, doc.value.take())?;
            doc.default_value = normalize_date_slot(&doc.name, doc.default_value.take())?;
        }

        build_field(doc, field_type)
    }

    fn resolve_image_slot(
        &self,
        slot: Option<Json>,
        subject: impl FnOnce() -> String,
    ) -> Result<Option<Json>, ValidationError> {
        match slot {
            Some(Json::String(reference)) => {
                require_image(self.resolver, &reference, subject).map(|p| Some(Json::String(p)))
            }
            other => Ok(other),
        }
    }
}

fn normalize_date_slot(name: &str, slot: Option<Json>) -> Result<Option<Json>, ValidationError> {
    match slot {
        Some(Json::String(s)) => normalize_date(&s)
            .map(|d| Some(Json::String(d)))
            .ok_or_else(|| ValidationError::DateParse(name.to_string())),
        Some(Json::Null) | None => Ok(None),
        Some(_) => Err(ValidationError::DateParse(name.to_string())),
    }
}

/// Narrow the document's JSON literals to the declared type.
fn build_field(doc: FieldDoc, field_type: FieldType) -> Result<Field, ValidationError> {
    let name = doc.name;
    let mismatch = || ValidationError::TypeMismatch {
        field: name.clone(),
        expected: field_type,
    };
    let text_format = doc.text_format.unwrap_or_default();

    let kind = match field_type {
        FieldType::Number => FieldKind::Number {
            value: narrow(doc.value, |j| j.as_number().cloned()).ok_or_else(mismatch)?,
            default_value: narrow(doc.default_value, |j| j.as_number().cloned())
                .ok_or_else(mismatch)?,
            text_format,
        },
        FieldType::Boolean => FieldKind::Boolean {
            value: narrow(doc.value, |j| j.as_bool()).ok_or_else(mismatch)?,
            default_value: narrow(doc.default_value, |j| j.as_bool()).ok_or_else(mismatch)?,
            text_format,
        },
        FieldType::String => FieldKind::String {
            value: narrow(doc.value, string).ok_or_else(mismatch)?,
            default_value: narrow(doc.default_value, string).ok_or_else(mismatch)?,
            text_format,
        },
        FieldType::Date => FieldKind::Date {
            value: narrow(doc.value, string).ok_or_else(mismatch)?,
            default_value: narrow(doc.default_value, string).ok_or_else(mismatch)?,
            text_format,
        },
        FieldType::Image => FieldKind::Image {
            value: narrow(doc.value, string).ok_or_else(mismatch)?,
            default_value: narrow(doc.default_value, string).ok_or_else(mismatch)?,
            image: doc.image.ok_or_else(|| {
                ValidationError::schema(&name, "An expected size must be defined.")
            })?,
        },
    };

    Ok(Field {
        name,
        required: doc.required,
        fixed: doc.fixed,
        placeholder: doc.placeholder,
        kind,
        extra: doc.extra,
    })
}

/// `Some(None)` for an absent slot, `None` when the literal has the wrong type.
fn narrow<T>(slot: Option<Json>, f: impl Fn(&Json) -> Option<T>) -> Option<Option<T>> {
    match slot {
        None | Some(Json::Null) => Some(None),
        Some(json) => f(&json).map(Some),
    }
}

fn string(json: &Json) -> Option<String> {
    json.as_str().map(str::to_string)
}
