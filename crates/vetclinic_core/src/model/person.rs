//! Person entity: clinic clients and veterinarians.

use crate::model::entity::{DumpValue, Entity, EntityId, EntityMeta, ValidationError};
use crate::model::patient::Patient;
use serde::{Deserialize, Serialize};

/// Role of a person within the practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Veterinarian,
}

impl Role {
    /// External label persisted in storage.
    ///
    /// Labels are part of the stored-data contract and must never change.
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Client => "Cliente",
            Self::Veterinarian => "Veterinario",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "Cliente" => Some(Self::Client),
            "Veterinario" => Some(Self::Veterinarian),
            _ => None,
        }
    }
}

/// A natural person: client or attending veterinarian.
///
/// `password` carries plaintext only between construction and the first
/// successful persistence call; rows loaded from storage leave it `None`
/// and the ciphertext stays inside the `password_encrypted` column. Use
/// the repository's password verification instead of reading it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    #[serde(flatten)]
    pub meta: EntityMeta,
    /// Unique national identifier; immutable after creation.
    pub national_id: String,
    pub name: String,
    #[serde(skip)]
    pub password: Option<String>,
    pub role: Role,
    /// Associated patients, ordered by record number when loaded.
    #[serde(skip)]
    pub patients: Vec<Patient>,
}

impl Person {
    pub fn new(
        national_id: impl Into<String>,
        name: impl Into<String>,
        password: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            meta: EntityMeta::new(),
            national_id: national_id.into(),
            name: name.into(),
            password: Some(password.into()),
            role,
            patients: Vec::new(),
        }
    }

    /// Ids of the associated persisted patients.
    pub fn patient_ids(&self) -> Vec<EntityId> {
        self.patients
            .iter()
            .filter_map(|patient| patient.meta.id)
            .collect()
    }
}

impl Entity for Person {
    const TABLE: &'static str = "person";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.national_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: Self::TABLE,
                field: "national_id",
            });
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                entity: Self::TABLE,
                field: "name",
            });
        }
        match &self.password {
            Some(password) if password.trim().is_empty() => {
                return Err(ValidationError::MissingField {
                    entity: Self::TABLE,
                    field: "password",
                });
            }
            // A loaded person keeps no plaintext; absence is only a
            // violation before the first insert.
            None if !self.meta.is_persisted() => {
                return Err(ValidationError::MissingField {
                    entity: Self::TABLE,
                    field: "password",
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn dump_fields(&self) -> Vec<(&'static str, DumpValue)> {
        vec![
            ("national_id", DumpValue::Text(self.national_id.clone())),
            ("name", DumpValue::Text(self.name.clone())),
            ("role", DumpValue::Text(self.role.as_label().to_string())),
            ("patients", DumpValue::RefList(self.patient_ids())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{Person, Role};
    use crate::model::entity::{dump, Entity, ValidationError};

    #[test]
    fn role_labels_round_trip_and_differ_from_variant_names() {
        for role in [Role::Client, Role::Veterinarian] {
            assert_eq!(Role::from_label(role.as_label()), Some(role));
        }
        assert_eq!(Role::from_label("Client"), None);
        assert_eq!(Role::from_label("veterinario"), None);
    }

    #[test]
    fn validate_requires_national_id_name_and_password() {
        let valid = Person::new("1-1", "Ana", "secret", Role::Client);
        assert!(valid.validate().is_ok());

        let missing_id = Person::new("", "Ana", "secret", Role::Client);
        assert_eq!(
            missing_id.validate(),
            Err(ValidationError::MissingField {
                entity: "person",
                field: "national_id",
            })
        );

        let mut missing_password = Person::new("1-1", "Ana", "secret", Role::Client);
        missing_password.password = None;
        assert!(missing_password.validate().is_err());

        let blank_password = Person::new("1-1", "Ana", "   ", Role::Client);
        assert_eq!(
            blank_password.validate(),
            Err(ValidationError::MissingField {
                entity: "person",
                field: "password",
            })
        );
    }

    #[test]
    fn persisted_person_without_plaintext_password_is_valid() {
        let mut person = Person::new("1-1", "Ana", "secret", Role::Client);
        person.meta.mark_inserted(1, 1_000);
        person.password = None;
        assert!(person.validate().is_ok());
    }

    #[test]
    fn dump_never_contains_the_password() {
        let person = Person::new("1-1", "Ana", "hunter2", Role::Veterinarian);
        let text = dump(&person);
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("password"));
        assert!(text.contains("\"role\": \"Veterinario\""));
    }
}
