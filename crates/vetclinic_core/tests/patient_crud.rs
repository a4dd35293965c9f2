use chrono::NaiveDate;
use vetclinic_core::db::open_db_in_memory;
use vetclinic_core::repo::history::history_for;
use vetclinic_core::{Patient, RepoError, Sex, SqlitePatientRepository};

#[test]
fn insert_and_get_by_record_number_round_trips() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut patient = Patient::new(987_654_321, "Rinho", Sex::Male);
    patient.birth_date = NaiveDate::from_ymd_opt(2020, 5, 17);
    patient.breed = Some("Boxer".to_string());
    patient.color = Some("Cafe".to_string());
    let id = repo.insert(&mut patient).unwrap();

    assert!(id > 0);
    assert_eq!(patient.meta.version, 1);

    let loaded = repo.get_by_record_number(987_654_321).unwrap().unwrap();
    assert_eq!(loaded.record_number, 987_654_321);
    assert_eq!(loaded.name, "Rinho");
    assert_eq!(loaded.birth_date, NaiveDate::from_ymd_opt(2020, 5, 17));
    assert_eq!(loaded.breed.as_deref(), Some("Boxer"));
    assert_eq!(loaded.sex, Sex::Male);
}

#[test]
fn get_unknown_record_number_is_a_normal_absent_result() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    assert!(repo.get_by_record_number(999_999).unwrap().is_none());
}

#[test]
fn list_is_ordered_by_record_number() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    for (record_number, name) in [(30, "Tres"), (10, "Uno"), (20, "Dos")] {
        let mut patient = Patient::new(record_number, name, Sex::Unspecified);
        repo.insert(&mut patient).unwrap();
    }

    let record_numbers: Vec<i64> = repo
        .list()
        .unwrap()
        .iter()
        .map(|patient| patient.record_number)
        .collect();
    assert_eq!(record_numbers, vec![10, 20, 30]);
}

#[test]
fn soft_delete_hides_patient_but_history_snapshot_remains() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut keeper = Patient::new(1, "Visible", Sex::Female);
    let mut doomed = Patient::new(2, "Oculto", Sex::Male);
    repo.insert(&mut keeper).unwrap();
    let doomed_id = repo.insert(&mut doomed).unwrap();

    repo.soft_delete(&mut doomed).unwrap();
    assert!(doomed.meta.deleted);
    assert_eq!(doomed.meta.version, 2);

    let visible = repo.list().unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].record_number, 1);
    assert!(repo.get_by_record_number(2).unwrap().is_none());

    let entries = history_for(&conn, "patient", doomed_id).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[1].snapshot.contains("Oculto"));
    assert!(entries[1].snapshot.contains("\"deleted\":true"));
}

#[test]
fn duplicate_record_number_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut first = Patient::new(7, "Primero", Sex::Male);
    repo.insert(&mut first).unwrap();

    let mut second = Patient::new(7, "Clonado", Sex::Male);
    let err = repo.insert(&mut second).unwrap_err();
    assert!(matches!(
        err,
        RepoError::UniqueConstraint {
            table: "patient",
            column: "record_number",
        }
    ));
}

#[test]
fn search_by_name_matches_substrings() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    for (record_number, name) in [(1, "pepe"), (2, "pepa"), (3, "rex")] {
        let mut patient = Patient::new(record_number, name, Sex::Unspecified);
        repo.insert(&mut patient).unwrap();
    }

    let hits = repo.search_by_name("pep").unwrap();
    let names: Vec<&str> = hits.iter().map(|patient| patient.name.as_str()).collect();
    assert_eq!(names, vec!["pepe", "pepa"]);

    assert!(repo.search_by_name("zzz").unwrap().is_empty());
}

#[test]
fn search_treats_like_metacharacters_literally() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    for (record_number, name) in [(1, "pepe"), (2, "100%"), (3, "a_b")] {
        let mut patient = Patient::new(record_number, name, Sex::Unspecified);
        repo.insert(&mut patient).unwrap();
    }

    let percent_hits = repo.search_by_name("%").unwrap();
    let names: Vec<&str> = percent_hits
        .iter()
        .map(|patient| patient.name.as_str())
        .collect();
    assert_eq!(names, vec!["100%"]);

    let underscore_hits = repo.search_by_name("_").unwrap();
    assert_eq!(underscore_hits.len(), 1);
    assert_eq!(underscore_hits[0].name, "a_b");
}

#[test]
fn search_excludes_soft_deleted_patients() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut patient = Patient::new(1, "pepe", Sex::Male);
    repo.insert(&mut patient).unwrap();
    repo.soft_delete(&mut patient).unwrap();

    assert!(repo.search_by_name("pep").unwrap().is_empty());
}

#[test]
fn stale_update_fails_with_optimistic_lock() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut patient = Patient::new(5, "Conflicto", Sex::Male);
    repo.insert(&mut patient).unwrap();

    let mut first_reader = repo.get_by_record_number(5).unwrap().unwrap();
    let mut second_reader = repo.get_by_record_number(5).unwrap().unwrap();

    first_reader.name = "Conflicto A".to_string();
    repo.update(&mut first_reader).unwrap();

    second_reader.color = Some("Negro".to_string());
    let err = repo.update(&mut second_reader).unwrap_err();
    assert!(matches!(err, RepoError::OptimisticLock { table: "patient", .. }));
}

#[test]
fn update_after_soft_delete_reports_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut patient = Patient::new(6, "Fantasma", Sex::Female);
    repo.insert(&mut patient).unwrap();

    let mut stale_copy = repo.get_by_record_number(6).unwrap().unwrap();
    repo.soft_delete(&mut patient).unwrap();

    stale_copy.name = "Fantasma Editado".to_string();
    let err = repo.update(&mut stale_copy).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { table: "patient", .. }));
}

#[test]
fn update_on_transient_patient_requires_an_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut transient = Patient::new(8, "SinId", Sex::Male);
    let err = repo.update(&mut transient).unwrap_err();
    assert!(matches!(err, RepoError::MissingId { table: "patient" }));
}

#[test]
fn double_insert_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePatientRepository::new(&conn);

    let mut patient = Patient::new(9, "Doble", Sex::Male);
    repo.insert(&mut patient).unwrap();
    let err = repo.insert(&mut patient).unwrap_err();
    assert!(matches!(err, RepoError::AlreadyPersisted { table: "patient", .. }));
}
