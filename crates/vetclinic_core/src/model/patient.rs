//! Patient entity: the animals under care.

use crate::model::entity::{DumpValue, Entity, EntityMeta, ValidationError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Recorded sex of a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Unspecified,
}

impl Sex {
    /// External label persisted in storage; part of the stored-data contract.
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Male => "Macho",
            Self::Female => "Hembra",
            Self::Unspecified => "Indeterminado",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "Macho" => Some(Self::Male),
            "Hembra" => Some(Self::Female),
            "Indeterminado" => Some(Self::Unspecified),
            _ => None,
        }
    }
}

/// An animal patient identified by its clinic record number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    #[serde(flatten)]
    pub meta: EntityMeta,
    /// Unique business identifier, assigned at creation; immutable.
    pub record_number: i64,
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub breed: Option<String>,
    pub sex: Sex,
    pub color: Option<String>,
}

impl Patient {
    pub fn new(record_number: i64, name: impl Into<String>, sex: Sex) -> Self {
        Self {
            meta: EntityMeta::new(),
            record_number,
            name: name.into(),
            birth_date: None,
            breed: None,
            sex,
            color: None,
        }
    }
}

impl Entity for Patient {
    const TABLE: &'static str = "patient";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.record_number <= 0 {
            return Err(ValidationError::InvalidField {
                entity: Self::TABLE,
                field: "record_number",
                reason: "must be a positive number",
            });
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: Self::TABLE,
                field: "name",
            });
        }
        Ok(())
    }

    fn dump_fields(&self) -> Vec<(&'static str, DumpValue)> {
        vec![
            ("record_number", DumpValue::Int(self.record_number)),
            ("name", DumpValue::Text(self.name.clone())),
            (
                "birth_date",
                self.birth_date
                    .map_or(DumpValue::Null, |date| DumpValue::Text(date.to_string())),
            ),
            (
                "breed",
                self.breed
                    .clone()
                    .map_or(DumpValue::Null, DumpValue::Text),
            ),
            ("sex", DumpValue::Text(self.sex.as_label().to_string())),
            (
                "color",
                self.color
                    .clone()
                    .map_or(DumpValue::Null, DumpValue::Text),
            ),
        ]
    }
}
