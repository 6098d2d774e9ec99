//! Certificate Merger
//!
//! Merges one record's submitted values against a validated template. The
//! template is authoritative for the output field set; any violation aborts
//! the whole record.

use serde_json::Value as Json;
use std::sync::OnceLock;

use crate::convert::normalize_date;
use crate::image::{ImageResolver, SINGLE_WHITE_PIXEL};
use crate::templates::{
    Certificate, CertificateDraft, Field, FieldType, FieldValue, Submission, Template, Value,
};
use crate::validation::{require_image, ValidationError};

/// Values emitted in place of hidden submissions, one per field type.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultValues {
    pub number: serde_json::Number,
    pub boolean: bool,
    pub string: String,
    pub date: String,
    pub image: String,
}

impl Default for DefaultValues {
    fn default() -> Self {
        Self {
            number: 0.into(),
            boolean: false,
            string: String::new(),
            date: "1970-01-01T00:00:00Z".to_string(),
            image: SINGLE_WHITE_PIXEL.to_string(),
        }
    }
}

impl DefaultValues {
    pub fn for_type(&self, field_type: FieldType) -> FieldValue {
        match field_type {
            FieldType::Number => FieldValue::Number(self.number.clone()),
            FieldType::Boolean => FieldValue::Boolean(self.boolean),
            FieldType::String => FieldValue::String(self.string.clone()),
            FieldType::Date => FieldValue::Date(self.date.clone()),
            FieldType::Image => FieldValue::Image(self.image.clone()),
        }
    }
}

pub struct CertificateMerger<'r> {
    resolver: &'r ImageResolver,
    defaults: DefaultValues,
    hidden_image: OnceLock<String>,
}

impl<'r> CertificateMerger<'r> {
    pub fn new(resolver: &'r ImageResolver) -> Self {
        Self {
            resolver,
            defaults: DefaultValues::default(),
            hidden_image: OnceLock::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: DefaultValues) -> Self {
        self.defaults = defaults;
        self.hidden_image = OnceLock::new();
        self
    }

    pub fn defaults(&self) -> &DefaultValues {
        &self.defaults
    }

    pub fn merge(
        &self,
        draft: CertificateDraft,
        template: &Template,
    ) -> Result<Certificate, ValidationError> {
        if draft.values.iter().any(is_empty_submission) {
            return Err(ValidationError::EmptyValues);
        }

        let mut values = Vec::with_capacity(template.fields.len());
        for field in &template.fields {
            if let Some(value) = self.merge_field(field, &draft.values)? {
                values.push(value);
            }
        }

        Ok(Certificate {
            uid: draft.uid,
            template: draft.template,
            title: draft.title,
            date: draft.date,
            values,
            error: None,
        })
    }

    fn merge_field(
        &self,
        field: &Field,
        submissions: &[Submission],
    ) -> Result<Option<Value>, ValidationError> {
        let mut matches = submissions.iter().filter(|s| s.name == field.name);
        let submission = matches.next();
        if matches.next().is_some() {
            return Err(ValidationError::DuplicateValue(field.name.clone()));
        }

        let visible = submission.and_then(|s| s.visible).unwrap_or(true);

        if field.placeholder {
            if visible {
                return Ok(None);
            }
            // Hidden placeholders keep the template's literal
            return Ok(field.kind.value().map(|value| Value {
                name: field.name.clone(),
                value,
                visible: false,
            }));
        }

        if !visible {
            if field.fixed {
                return Ok(None);
            }
            // A hidden value never leaks what was submitted
            return Ok(Some(Value {
                name: field.name.clone(),
                value: self.hidden_default(field.field_type()),
                visible: false,
            }));
        }

        let submitted = submission.and_then(|s| s.value.as_ref()).filter(|v| !v.is_null());

        if submitted.is_none() && field.required && !field.kind.has_default() {
            return Err(ValidationError::MissingValue(field.name.clone()));
        }

        let submitted = match submitted {
            Some(json) if !field.fixed => json,
            _ => return Ok(None),
        };

        Ok(Some(Value {
            name: field.name.clone(),
            value: self.check_value(field, submitted)?,
            visible,
        }))
    }

    fn hidden_default(&self, field_type: FieldType) -> FieldValue {
        match field_type {
            FieldType::Image => FieldValue::Image(self.hidden_image().to_string()),
            other => self.defaults.for_type(other),
        }
    }

    /// The image sentinel as a resolved path, stored once per merger.
    /// Without a scratch root the sentinel is emitted as configured.
    fn hidden_image(&self) -> &str {
        self.hidden_image.get_or_init(|| {
            self.resolver
                .resolve(&self.defaults.image)
                .unwrap_or_else(|| self.defaults.image.clone())
        })
    }

    fn check_value(&self, field: &Field, json: &Json) -> Result<FieldValue, ValidationError> {
        let field_type = field.field_type();
        let mismatch = || ValidationError::TypeMismatch {
            field: field.name.clone(),
            expected: field_type,
        };

        match (field_type, json) {
            (FieldType::Number, Json::Number(n)) => Ok(FieldValue::Number(n.clone())),
            (FieldType::Boolean, Json::Bool(b)) => Ok(FieldValue::Boolean(*b)),
            (FieldType::String, Json::String(s)) => Ok(FieldValue::String(s.clone())),
            (FieldType::Date, Json::String(s)) => normalize_date(s)
                .map(FieldValue::Date)
                .ok_or_else(|| ValidationError::DateParse(field.name.clone())),
            (FieldType::Date, _) => Err(ValidationError::DateParse(field.name.clone())),
            (FieldType::Image, Json::String(s)) => {
                require_image(self.resolver, s, || format!("field '{}'", field.name))
                    .map(FieldValue::Image)
            }
            _ => Err(mismatch()),
        }
    }
}

fn is_empty_submission(s: &Submission) -> bool {
    s.value.as_ref().map_or(true, Json::is_null) && s.visible != Some(false)
}
