//! How each model is keyed, partitioned and staged for persistence.

use std::sync::Arc;

use super::Reconciler;
use super::repository::{LookupKey, Record, Repository};
use super::store::Snapshot;
use crate::models::names::normalize_for_matching;
use crate::models::{Course, Department, Entry, Professor, Term};

/// A record kind the [`Reconciler`] owns a repository for.
pub trait Reconciled: Record {
    fn repository(reconciler: &Reconciler) -> &Repository<Self>;

    /// Append `batch` to the matching snapshot field.
    fn stage(batch: Vec<Arc<Self>>, snapshot: &mut Snapshot);
}

fn unwrap_all<E: Clone>(batch: Vec<Arc<E>>) -> impl Iterator<Item = E> {
    batch
        .into_iter()
        .map(|e| Arc::try_unwrap(e).unwrap_or_else(|shared| (*shared).clone()))
}

impl Record for Department {
    type Key = u32;
    type Partition = ();
    const KIND: &'static str = "department";

    fn natural_key(&self) -> u32 {
        self.id
    }

    fn partition(&self) {}

    fn lookup_keys(&self) -> Vec<LookupKey> {
        vec![
            LookupKey::Id(u64::from(self.id)),
            LookupKey::Name(self.name.clone()),
        ]
    }

    fn id(&self) -> Option<u64> {
        Some(u64::from(self.id))
    }
}

impl Reconciled for Department {
    fn repository(reconciler: &Reconciler) -> &Repository<Self> {
        &reconciler.departments
    }

    fn stage(batch: Vec<Arc<Self>>, snapshot: &mut Snapshot) {
        snapshot.departments.extend(unwrap_all(batch));
    }
}

impl Record for Term {
    type Key = u32;
    type Partition = ();
    const KIND: &'static str = "term";

    fn natural_key(&self) -> u32 {
        self.id
    }

    fn partition(&self) {}

    fn lookup_keys(&self) -> Vec<LookupKey> {
        vec![
            LookupKey::Id(u64::from(self.id)),
            LookupKey::Name(self.name.clone()),
        ]
    }

    fn id(&self) -> Option<u64> {
        Some(u64::from(self.id))
    }
}

impl Reconciled for Term {
    fn repository(reconciler: &Reconciler) -> &Repository<Self> {
        &reconciler.terms
    }

    fn stage(batch: Vec<Arc<Self>>, snapshot: &mut Snapshot) {
        snapshot.terms.extend(unwrap_all(batch));
    }
}

impl Record for Course {
    /// Department, base code and base title.
    type Key = (u32, String, String);
    type Partition = ();
    const KIND: &'static str = "course";
    const ASSIGNS_IDS: bool = true;

    fn natural_key(&self) -> Self::Key {
        (
            self.department_id,
            self.base_code().to_string(),
            self.base_name().to_string(),
        )
    }

    fn partition(&self) {}

    fn lookup_keys(&self) -> Vec<LookupKey> {
        let mut keys = vec![LookupKey::Id(self.id)];
        keys.extend(self.codes.iter().map(|c| LookupKey::Code(c.value.clone())));
        keys
    }

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Reconciled for Course {
    fn repository(reconciler: &Reconciler) -> &Repository<Self> {
        &reconciler.courses
    }

    fn stage(batch: Vec<Arc<Self>>, snapshot: &mut Snapshot) {
        snapshot.courses.extend(unwrap_all(batch));
    }
}

impl Professor {
    pub(crate) fn full_name_key(&self) -> Option<LookupKey> {
        let first = normalize_for_matching(&self.first_name);
        let last = normalize_for_matching(&self.last_name);
        (!first.is_empty() && !last.is_empty()).then_some(LookupKey::FullName { first, last })
    }
}

impl Record for Professor {
    /// Department and N-number.
    type Key = (u32, String);
    /// Department id.
    type Partition = u32;
    const KIND: &'static str = "professor";
    const ASSIGNS_IDS: bool = true;

    fn natural_key(&self) -> Self::Key {
        (self.department_id, self.n_number.clone())
    }

    fn partition(&self) -> u32 {
        self.department_id
    }

    fn lookup_keys(&self) -> Vec<LookupKey> {
        let mut keys = vec![
            LookupKey::Id(self.id),
            LookupKey::NNumber(self.n_number.clone()),
        ];
        keys.extend(self.full_name_key());
        keys
    }

    fn unique_keys(&self) -> Vec<LookupKey> {
        self.full_name_key().into_iter().collect()
    }

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Reconciled for Professor {
    fn repository(reconciler: &Reconciler) -> &Repository<Self> {
        &reconciler.professors
    }

    fn stage(batch: Vec<Arc<Self>>, snapshot: &mut Snapshot) {
        snapshot.professors.extend(unwrap_all(batch));
    }
}

impl Record for Entry {
    /// Course, term and CRN.
    type Key = (u64, u32, u32);
    type Partition = ();
    const KIND: &'static str = "entry";

    fn natural_key(&self) -> Self::Key {
        (self.course_id, self.term_id, self.crn)
    }

    fn partition(&self) {}

    fn lookup_keys(&self) -> Vec<LookupKey> {
        vec![
            LookupKey::Course(self.course_id),
            LookupKey::Professor(self.professor_id),
        ]
    }

    fn id(&self) -> Option<u64> {
        None
    }
}

impl Reconciled for Entry {
    fn repository(reconciler: &Reconciler) -> &Repository<Self> {
        &reconciler.entries
    }

    fn stage(batch: Vec<Arc<Self>>, snapshot: &mut Snapshot) {
        snapshot.entries.extend(unwrap_all(batch));
    }
}
