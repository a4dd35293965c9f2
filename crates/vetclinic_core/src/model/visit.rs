//! Visit record entity: one veterinary check-up.

use crate::model::entity::{DumpValue, Entity, EntityId, EntityMeta, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One check-up performed on a patient by a veterinarian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub visit_date: DateTime<Utc>,
    /// Scheduled follow-up; must not precede `visit_date`.
    pub next_visit_date: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub diagnosis: String,
    pub note: Option<String>,
    /// Attending veterinarian; must resolve to a live person at write time.
    pub veterinarian_id: EntityId,
    /// Patient this visit belongs to; bound when the visit is attached.
    pub patient_id: Option<EntityId>,
}

impl VisitRecord {
    pub fn new(
        visit_date: DateTime<Utc>,
        next_visit_date: DateTime<Utc>,
        diagnosis: impl Into<String>,
        veterinarian_id: EntityId,
    ) -> Self {
        Self {
            meta: EntityMeta::new(),
            visit_date,
            next_visit_date,
            temperature: None,
            weight: None,
            height: None,
            diagnosis: diagnosis.into(),
            note: None,
            veterinarian_id,
            patient_id: None,
        }
    }
}

impl Entity for VisitRecord {
    const TABLE: &'static str = "visit_record";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.diagnosis.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: Self::TABLE,
                field: "diagnosis",
            });
        }
        if self.veterinarian_id <= 0 {
            return Err(ValidationError::MissingField {
                entity: Self::TABLE,
                field: "veterinarian_id",
            });
        }
        if self.next_visit_date < self.visit_date {
            return Err(ValidationError::InvalidField {
                entity: Self::TABLE,
                field: "next_visit_date",
                reason: "must not be earlier than visit_date",
            });
        }
        Ok(())
    }

    fn dump_fields(&self) -> Vec<(&'static str, DumpValue)> {
        vec![
            ("visit_date", DumpValue::Text(self.visit_date.to_rfc3339())),
            (
                "next_visit_date",
                DumpValue::Text(self.next_visit_date.to_rfc3339()),
            ),
            (
                "temperature",
                self.temperature.map_or(DumpValue::Null, DumpValue::Float),
            ),
            (
                "weight",
                self.weight.map_or(DumpValue::Null, DumpValue::Float),
            ),
            (
                "height",
                self.height.map_or(DumpValue::Null, DumpValue::Float),
            ),
            ("diagnosis", DumpValue::Text(self.diagnosis.clone())),
            (
                "note",
                self.note.clone().map_or(DumpValue::Null, DumpValue::Text),
            ),
            ("veterinarian", DumpValue::Ref(Some(self.veterinarian_id))),
            ("patient", DumpValue::Ref(self.patient_id)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::VisitRecord;
    use crate::model::entity::{dump, Entity, ValidationError};
    use chrono::{TimeZone, Utc};

    fn sample() -> VisitRecord {
        let visit = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap();
        VisitRecord::new(visit, next, "healthy", 7)
    }

    #[test]
    fn validate_rejects_follow_up_before_visit() {
        let mut visit = sample();
        std::mem::swap(&mut visit.visit_date, &mut visit.next_visit_date);
        assert_eq!(
            visit.validate(),
            Err(ValidationError::InvalidField {
                entity: "visit_record",
                field: "next_visit_date",
                reason: "must not be earlier than visit_date",
            })
        );
    }

    #[test]
    fn validate_rejects_blank_diagnosis() {
        let mut visit = sample();
        visit.diagnosis = String::new();
        assert!(visit.validate().is_err());
    }

    #[test]
    fn dump_renders_veterinarian_as_id_only() {
        let visit = sample();
        let text = dump(&visit);
        assert!(text.contains("\"veterinarian\": 7"));
        assert!(text.contains("\"patient\": null"));
    }
}
