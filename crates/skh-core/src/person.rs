//! Person records and the deduplication unit.
//!
//! People are deduplicated on (full name, birth date), not on their
//! identifier: at intake the identifier is often unknown, in which case a
//! placeholder is generated and may be replaced later.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Phase, Result, store::PersonTx};

/// Prefix of generated identifiers.
pub const PLACEHOLDER_PREFIX: &str = "TEMP";

/// Width of the time-derived placeholder suffix.
const PLACEHOLDER_DIGITS: u32 = 12;

/// How many successive suffixes to try before giving up.
const PLACEHOLDER_ATTEMPTS: usize = 32;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PersonId(pub i64);

impl fmt::Display for PersonId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// A stored person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
  pub person_id:   PersonId,
  /// Government identifier, or a placeholder starting with
  /// [`PLACEHOLDER_PREFIX`].
  pub identifier:  String,
  pub full_name:   String,
  pub birth_place: String,
  pub birth_date:  NaiveDate,
  pub gender:      String,
  pub religion:    String,
  pub occupation:  String,
  pub address:     String,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

impl Person {
  pub fn has_placeholder_identifier(&self) -> bool {
    is_placeholder(&self.identifier)
  }
}

/// Person fields as submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonData {
  pub identifier:  Option<String>,
  pub full_name:   String,
  pub birth_place: String,
  pub birth_date:  Option<NaiveDate>,
  pub gender:      String,
  pub religion:    String,
  pub occupation:  String,
  pub address:     String,
}

impl PersonData {
  /// Convenience constructor with only the deduplication key set.
  pub fn new(full_name: impl Into<String>, birth_date: NaiveDate) -> Self {
    Self {
      full_name: full_name.into(),
      birth_date: Some(birth_date),
      ..Self::default()
    }
  }

  /// Check the deduplication key is present and return the birth date.
  pub fn validate(&self) -> Result<NaiveDate> {
    if self.full_name.trim().is_empty() {
      return Err(Error::MissingField("full name"));
    }
    self.birth_date.ok_or(Error::MissingField("birth date"))
  }

  /// The supplied identifier, if it is non-blank.
  fn supplied_identifier(&self) -> Option<&str> {
    self
      .identifier
      .as_deref()
      .map(str::trim)
      .filter(|s| !s.is_empty())
  }
}

/// A validated person ready for insertion.
#[derive(Debug, Clone)]
pub struct NewPerson {
  pub identifier:  String,
  pub full_name:   String,
  pub birth_place: String,
  pub birth_date:  NaiveDate,
  pub gender:      String,
  pub religion:    String,
  pub occupation:  String,
  pub address:     String,
}

impl NewPerson {
  pub fn into_person(self, person_id: PersonId, at: DateTime<Utc>) -> Person {
    Person {
      person_id,
      identifier: self.identifier,
      full_name: self.full_name,
      birth_place: self.birth_place,
      birth_date: self.birth_date,
      gender: self.gender,
      religion: self.religion,
      occupation: self.occupation,
      address: self.address,
      created_at: at,
      updated_at: at,
    }
  }
}

// ─── Placeholder identifiers ─────────────────────────────────────────────────

pub fn is_placeholder(identifier: &str) -> bool {
  identifier.starts_with(PLACEHOLDER_PREFIX)
}

/// `TEMP` followed by the last twelve digits of the nanosecond timestamp.
pub fn placeholder_identifier(at: DateTime<Utc>) -> String {
  format_placeholder(placeholder_suffix(at))
}

fn placeholder_suffix(at: DateTime<Utc>) -> u64 {
  let nanos = i128::from(at.timestamp()) * 1_000_000_000
    + i128::from(at.timestamp_subsec_nanos());
  // rem_euclid keeps the value in [0, 10^12), which always fits a u64.
  nanos.rem_euclid(10_i128.pow(PLACEHOLDER_DIGITS)) as u64
}

fn format_placeholder(suffix: u64) -> String {
  format!(
    "{PLACEHOLDER_PREFIX}{suffix:0width$}",
    width = PLACEHOLDER_DIGITS as usize
  )
}

/// Generate a placeholder not yet used by any person, stepping the suffix
/// forward on collision.
fn free_placeholder<T: PersonTx + ?Sized>(
  tx: &mut T,
  at: DateTime<Utc>,
) -> Result<String> {
  let modulus = 10_u64.pow(PLACEHOLDER_DIGITS);
  let mut suffix = placeholder_suffix(at);
  for _ in 0..PLACEHOLDER_ATTEMPTS {
    let candidate = format_placeholder(suffix);
    if !tx
      .identifier_taken(&candidate)
      .map_err(Error::storage(Phase::PersonResolution))?
    {
      return Ok(candidate);
    }
    suffix = (suffix + 1) % modulus;
  }
  Err(Error::PlaceholderExhausted(PLACEHOLDER_ATTEMPTS))
}

// ─── Deduplication ───────────────────────────────────────────────────────────

/// Return the id of the person matching `candidate` on (full name, birth
/// date), inserting a new person when there is none.
///
/// Only a definitive "no match" leads to an insert; a failed lookup aborts.
pub fn resolve<T: PersonTx + ?Sized>(
  tx: &mut T,
  candidate: &PersonData,
  now: DateTime<Utc>,
) -> Result<PersonId> {
  let birth_date = candidate.validate()?;

  let existing = tx
    .find_person_by_key(&candidate.full_name, birth_date)
    .map_err(Error::storage(Phase::PersonResolution))?;
  if let Some(person) = existing {
    debug!(person = %person.person_id, "reusing existing person");
    return Ok(person.person_id);
  }

  let identifier = match candidate.supplied_identifier() {
    Some(id) => {
      if tx
        .identifier_taken(id)
        .map_err(Error::storage(Phase::PersonResolution))?
      {
        return Err(Error::IdentifierTaken(id.to_owned()));
      }
      id.to_owned()
    }
    None => free_placeholder(tx, now)?,
  };

  let new_person = NewPerson {
    identifier,
    full_name: candidate.full_name.clone(),
    birth_place: candidate.birth_place.clone(),
    birth_date,
    gender: candidate.gender.clone(),
    religion: candidate.religion.clone(),
    occupation: candidate.occupation.clone(),
    address: candidate.address.clone(),
  };

  let id = tx
    .insert_person(&new_person, now)
    .map_err(Error::storage(Phase::PersonResolution))?;
  debug!(person = %id, "created person");
  Ok(id)
}

/// Apply `candidate` to an existing person in place and return the person the
/// document should now reference.
///
/// If the revised (full name, birth date) already belongs to a different
/// person, that person is revised instead of duplicating the key. A
/// placeholder identifier may be replaced by a supplied one; a real
/// identifier is never overwritten.
pub fn revise<T: PersonTx + ?Sized>(
  tx: &mut T,
  current: Person,
  candidate: &PersonData,
  now: DateTime<Utc>,
) -> Result<Person> {
  let birth_date = candidate.validate()?;

  let current = match tx
    .find_person_by_key(&candidate.full_name, birth_date)
    .map_err(Error::storage(Phase::Update))?
  {
    Some(other) if other.person_id != current.person_id => {
      debug!(
        from = %current.person_id,
        to = %other.person_id,
        "relinking to existing person"
      );
      other
    }
    _ => current,
  };

  let identifier = match candidate.supplied_identifier() {
    Some(id) if current.has_placeholder_identifier() && id != current.identifier => {
      if tx
        .identifier_taken(id)
        .map_err(Error::storage(Phase::Update))?
      {
        return Err(Error::IdentifierTaken(id.to_owned()));
      }
      id.to_owned()
    }
    _ => current.identifier.clone(),
  };

  let revised = Person {
    identifier,
    full_name: candidate.full_name.clone(),
    birth_place: candidate.birth_place.clone(),
    birth_date,
    gender: candidate.gender.clone(),
    religion: candidate.religion.clone(),
    occupation: candidate.occupation.clone(),
    address: candidate.address.clone(),
    updated_at: now,
    ..current
  };

  tx.update_person(&revised)
    .map_err(Error::storage(Phase::Update))?;
  Ok(revised)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::store::memory::MemoryTx;

  fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 8, 30, 0).unwrap()
  }

  fn budi() -> PersonData {
    PersonData {
      birth_place: "Bandung".into(),
      occupation: "Pedagang".into(),
      ..PersonData::new("Budi Santoso", NaiveDate::from_ymd_opt(1990, 4, 12).unwrap())
    }
  }

  #[test]
  fn placeholder_has_prefix_and_fixed_width() {
    let id = placeholder_identifier(at());
    assert!(id.starts_with("TEMP"));
    assert_eq!(id.len(), 16);
    assert!(id[4..].chars().all(|c| c.is_ascii_digit()));
  }

  #[test]
  fn placeholder_keeps_last_twelve_digits() {
    let t = Utc.timestamp_opt(1_736_152_200, 123_456_789).unwrap();
    // 1736152200123456789 ns
    assert_eq!(placeholder_identifier(t), "TEMP200123456789");
  }

  #[test]
  fn resolve_creates_person_with_placeholder() {
    let mut tx = MemoryTx::default();
    let id = resolve(&mut tx, &budi(), at()).unwrap();
    assert_eq!(tx.people.len(), 1);
    assert_eq!(tx.people[0].person_id, id);
    assert!(tx.people[0].has_placeholder_identifier());
  }

  #[test]
  fn resolve_reuses_matching_person() {
    let mut tx = MemoryTx::default();
    let first = resolve(&mut tx, &budi(), at()).unwrap();

    let mut again = budi();
    again.address = "Jl. Merdeka 1".into();
    again.occupation = "Guru".into();
    let second = resolve(&mut tx, &again, at()).unwrap();

    assert_eq!(first, second);
    assert_eq!(tx.people.len(), 1);
  }

  #[test]
  fn resolve_keeps_supplied_identifier() {
    let mut tx = MemoryTx::default();
    let mut data = budi();
    data.identifier = Some("3273011204900001".into());
    resolve(&mut tx, &data, at()).unwrap();
    assert_eq!(tx.people[0].identifier, "3273011204900001");
  }

  #[test]
  fn resolve_steps_past_colliding_placeholder() {
    let mut tx = MemoryTx::default();
    let mut other = budi();
    other.full_name = "Siti Aminah".into();
    other.identifier = Some(placeholder_identifier(at()));
    resolve(&mut tx, &other, at()).unwrap();

    resolve(&mut tx, &budi(), at()).unwrap();
    assert_eq!(tx.people.len(), 2);
    assert_ne!(tx.people[0].identifier, tx.people[1].identifier);
  }

  #[test]
  fn resolve_rejects_missing_name() {
    let mut tx = MemoryTx::default();
    let mut data = budi();
    data.full_name = "   ".into();
    let err = resolve(&mut tx, &data, at()).unwrap_err();
    assert!(matches!(err, Error::MissingField("full name")));
    assert!(tx.people.is_empty());
  }

  #[test]
  fn failed_lookup_does_not_create() {
    let mut tx = MemoryTx { fail: true, ..MemoryTx::default() };
    let err = resolve(&mut tx, &budi(), at()).unwrap_err();
    assert_eq!(err.phase(), Some(Phase::PersonResolution));
    assert!(tx.people.is_empty());
  }

  #[test]
  fn revise_replaces_placeholder_identifier() {
    let mut tx = MemoryTx::default();
    let id = resolve(&mut tx, &budi(), at()).unwrap();
    let current = tx.get_person(id).unwrap().unwrap();

    let mut data = budi();
    data.identifier = Some("3273011204900001".into());
    let revised = revise(&mut tx, current, &data, at()).unwrap();

    assert_eq!(revised.identifier, "3273011204900001");
    assert_eq!(tx.people[0].identifier, "3273011204900001");
  }

  #[test]
  fn revise_preserves_real_identifier() {
    let mut tx = MemoryTx::default();
    let mut data = budi();
    data.identifier = Some("3273011204900001".into());
    let id = resolve(&mut tx, &data, at()).unwrap();
    let current = tx.get_person(id).unwrap().unwrap();

    data.identifier = Some("9999999999999999".into());
    data.address = "Jl. Baru 2".into();
    let revised = revise(&mut tx, current, &data, at()).unwrap();

    assert_eq!(revised.identifier, "3273011204900001");
    assert_eq!(revised.address, "Jl. Baru 2");
    assert_eq!(tx.people.len(), 1);
  }

  #[test]
  fn revise_keeps_placeholder_when_none_supplied() {
    let mut tx = MemoryTx::default();
    let id = resolve(&mut tx, &budi(), at()).unwrap();
    let current = tx.get_person(id).unwrap().unwrap();
    let before = current.identifier.clone();

    let revised = revise(&mut tx, current, &budi(), at()).unwrap();
    assert_eq!(revised.identifier, before);
  }

  #[test]
  fn revise_onto_existing_key_relinks() {
    let mut tx = MemoryTx::default();
    let budi_id = resolve(&mut tx, &budi(), at()).unwrap();
    let mut siti = budi();
    siti.full_name = "Siti Aminah".into();
    let siti_id = resolve(&mut tx, &siti, at()).unwrap();
    let current = tx.get_person(siti_id).unwrap().unwrap();

    let mut data = budi();
    data.address = "Jl. Asia Afrika 8".into();
    let revised = revise(&mut tx, current, &data, at()).unwrap();

    assert_eq!(revised.person_id, budi_id);
    assert_eq!(tx.people.len(), 2);
    let matching = tx
      .people
      .iter()
      .filter(|p| p.full_name == "Budi Santoso")
      .count();
    assert_eq!(matching, 1);
    assert_eq!(tx.get_person(budi_id).unwrap().unwrap().address, "Jl. Asia Afrika 8");
    assert_eq!(tx.get_person(siti_id).unwrap().unwrap().full_name, "Siti Aminah");
  }
}
