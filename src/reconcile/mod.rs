//! Entity reconciliation.
//!
//! The [`Reconciler`] owns one [`Repository`] per entity kind, hydrated once
//! from a [`Store`]. Everything written afterwards is queued and handed to the
//! store on [`Reconciler::flush`], which batch adds call implicitly.

pub mod records;
pub mod repository;
pub mod store;

pub use records::Reconciled;
pub use repository::{LookupKey, Record, Repository, Upsert, Writer};
pub use store::{Checkpoint, JsonStore, MemoryStore, Snapshot, Store, StoreError};

use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{Course, Department, Entry, Professor, Term, normalize_code};
use store::StoreState;

/// What a course merge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseMerge {
    Inserted,
    /// Existing course gained a code, a title or an earlier first listing.
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct MergedCourse {
    pub course: Arc<Course>,
    pub outcome: CourseMerge,
}

pub struct Reconciler {
    departments: Repository<Department>,
    terms: Repository<Term>,
    courses: Repository<Course>,
    professors: Repository<Professor>,
    entries: Repository<Entry>,
    checkpoints: DashSet<Checkpoint>,
    pending_checkpoints: SegQueue<Checkpoint>,
    store: Arc<dyn Store>,
    /// Drained but not yet accepted by the store. Retried on the next flush.
    unflushed: Mutex<StoreState>,
}

impl Reconciler {
    /// Hydrate every repository from `store`. The store is never read again.
    pub async fn load(store: Arc<dyn Store>) -> Result<Self, StoreError> {
        let snapshot = store.load_all().await?;
        info!(
            departments = snapshot.departments.len(),
            terms = snapshot.terms.len(),
            courses = snapshot.courses.len(),
            professors = snapshot.professors.len(),
            entries = snapshot.entries.len(),
            checkpoints = snapshot.checkpoints.len(),
            "Reconciler hydrated"
        );

        Ok(Self {
            departments: Repository::hydrate(snapshot.departments),
            terms: Repository::hydrate(snapshot.terms),
            courses: Repository::hydrate(snapshot.courses),
            professors: Repository::hydrate(snapshot.professors),
            entries: Repository::hydrate(snapshot.entries),
            checkpoints: snapshot.checkpoints.into_iter().collect(),
            pending_checkpoints: SegQueue::new(),
            store,
            unflushed: Mutex::new(StoreState::default()),
        })
    }

    pub fn departments(&self) -> &Repository<Department> {
        &self.departments
    }

    pub fn terms(&self) -> &Repository<Term> {
        &self.terms
    }

    pub fn courses(&self) -> &Repository<Course> {
        &self.courses
    }

    pub fn professors(&self) -> &Repository<Professor> {
        &self.professors
    }

    pub fn entries(&self) -> &Repository<Entry> {
        &self.entries
    }

    /// Insert unless known. Queued for the next flush.
    pub async fn add<E: Reconciled>(&self, entity: E) -> Upsert<E> {
        E::repository(self).add(entity).await
    }

    /// Insert a batch and persist it. Returns the number of new records.
    pub async fn add_range<E: Reconciled>(
        &self,
        entities: impl IntoIterator<Item = E>,
    ) -> Result<usize, StoreError> {
        let inserted = E::repository(self).add_range(entities).await;
        self.flush().await?;
        Ok(inserted)
    }

    /// Hand everything written since the last flush to the store.
    ///
    /// On failure the batch is kept and retried by the next flush.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let mut unflushed = self.unflushed.lock().await;

        let mut batch = Snapshot::default();
        Department::stage(self.departments.drain_pending(), &mut batch);
        Term::stage(self.terms.drain_pending(), &mut batch);
        Course::stage(self.courses.drain_pending(), &mut batch);
        Professor::stage(self.professors.drain_pending(), &mut batch);
        Entry::stage(self.entries.drain_pending(), &mut batch);
        batch
            .checkpoints
            .extend(std::iter::from_fn(|| self.pending_checkpoints.pop()));
        unflushed.apply(batch);

        if unflushed.is_empty() {
            return Ok(0);
        }
        let snapshot = unflushed.to_snapshot();
        let records = snapshot.record_count();
        if let Err(e) = self.store.persist(snapshot).await {
            warn!(records, error = %e, "Persist failed, batch kept for retry");
            return Err(e);
        }
        *unflushed = StoreState::default();
        debug!(records, "Flushed");
        Ok(records)
    }

    /// Flush and let the store finish any deferred writes.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.flush().await?;
        self.store.close().await
    }

    pub fn is_complete(&self, checkpoint: &Checkpoint) -> bool {
        self.checkpoints.contains(checkpoint)
    }

    /// Mark a unit of work done and persist it with everything written so far.
    pub async fn complete(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        if self.checkpoints.insert(checkpoint) {
            self.pending_checkpoints.push(checkpoint);
        }
        self.flush().await.map(drop)
    }

    /// Reconcile one listed course. See [`Reconciler::merge_listing`].
    pub async fn merge_course(
        &self,
        department_id: u32,
        code: &str,
        title: &str,
        term_id: u32,
    ) -> MergedCourse {
        let rows = [(code.to_string(), title.to_string())];
        let mut merged = self.merge_listing(department_id, term_id, &rows).await;
        // One row in, one result out.
        merged.swap_remove(0)
    }

    /// Reconcile every `(code, title)` row of one department's listing for one
    /// term, under a single write lock.
    ///
    /// A row matches the department course that carries its code, preferring
    /// the one whose code is in effect for the term. A changed title extends
    /// that course's name history. A code no department course carries is a
    /// new course. Titles never decide identity, so listings merge to the same
    /// courses whatever order they arrive in.
    pub async fn merge_listing(
        &self,
        department_id: u32,
        term_id: u32,
        rows: &[(String, String)],
    ) -> Vec<MergedCourse> {
        let rows: Vec<(String, &str)> = rows
            .iter()
            .map(|(code, title)| (normalize_code(code), title.as_str()))
            .collect();

        self.courses
            .write(&(), |w| {
                rows.iter()
                    .map(|(code, title)| merge_row(w, department_id, code, title, term_id))
                    .collect()
            })
            .await
    }

    /// Record that the department course listed as `old_code` is listed as
    /// `new_code` from `since_term` on.
    ///
    /// Returns `None` when no department course carries `old_code`, or when
    /// `new_code` already belongs to a different course.
    pub async fn renumber_course(
        &self,
        department_id: u32,
        old_code: &str,
        new_code: &str,
        since_term: u32,
    ) -> Option<MergedCourse> {
        let old_code = normalize_code(old_code);
        let new_code = normalize_code(new_code);

        self.courses
            .write(&(), |w| {
                let existing = department_course(w, department_id, &old_code, since_term)?;
                let taken = department_course(w, department_id, &new_code, since_term)
                    .is_some_and(|other| other.id != existing.id);
                if taken {
                    return None;
                }

                let mut updated = (*existing).clone();
                if !updated.observe_code(&new_code, since_term) {
                    return Some(MergedCourse {
                        course: existing,
                        outcome: CourseMerge::Unchanged,
                    });
                }
                info!(
                    course_id = existing.id,
                    %old_code,
                    %new_code,
                    since_term,
                    "Course renumbered"
                );
                Some(MergedCourse {
                    course: w.replace(&existing, updated),
                    outcome: CourseMerge::Updated,
                })
            })
            .await
    }

    /// The course that was listed as `code` in `term_id`.
    pub async fn resolve_course(&self, code: &str, term_id: u32) -> Option<Arc<Course>> {
        let code = normalize_code(code);
        self.courses
            .get_all(&LookupKey::Code(code.clone()))
            .await
            .into_iter()
            .filter(|course| course.code_as_of(term_id) == code)
            .min_by_key(|course| course.id)
    }

    /// Known terms, oldest first.
    pub async fn terms_sorted(&self) -> Vec<Arc<Term>> {
        let mut terms = self.terms.all().await;
        terms.sort_by_key(|t| t.id);
        terms
    }

    /// The known term `offset` places after (or before, if negative) `term_id`.
    pub async fn term_offset(&self, term_id: u32, offset: i32) -> Option<Arc<Term>> {
        let terms = self.terms_sorted().await;
        let index = terms.iter().position(|t| t.id == term_id)?;
        let target = i64::try_from(index).ok()? + i64::from(offset);
        usize::try_from(target)
            .ok()
            .and_then(|i| terms.get(i))
            .cloned()
    }

    /// The latest `count` known terms, newest first.
    pub async fn recent_terms(&self, count: usize) -> Vec<Arc<Term>> {
        let mut terms = self.terms_sorted().await;
        terms.reverse();
        terms.truncate(count);
        terms
    }

    /// Every professor record for one person, one per department they teach
    /// in, lowest id first.
    pub async fn professors_by_n_number(&self, n_number: &str) -> Vec<Arc<Professor>> {
        let mut professors = self
            .professors
            .get_all(&LookupKey::NNumber(n_number.to_string()))
            .await;
        professors.sort_by_key(|p| p.id);
        professors
    }

    /// The lowest-id professor record with this N-number.
    pub async fn professor_by_n_number(&self, n_number: &str) -> Option<Arc<Professor>> {
        self.professors_by_n_number(n_number)
            .await
            .into_iter()
            .next()
    }

    /// Entries of every professor record with this N-number.
    pub async fn entries_for_n_number(&self, n_number: &str) -> Vec<Arc<Entry>> {
        let mut entries = Vec::new();
        for professor in self.professors_by_n_number(n_number).await {
            entries.extend(
                self.entries
                    .get_all(&LookupKey::Professor(professor.id))
                    .await,
            );
        }
        entries.sort_by_key(|e| (e.term_id, e.crn, e.professor_id));
        entries
    }

    pub async fn entries_for_professor(&self, professor_id: u64) -> Vec<Arc<Entry>> {
        let mut entries = self
            .entries
            .get_all(&LookupKey::Professor(professor_id))
            .await;
        entries.sort_by_key(|e| (e.term_id, e.crn));
        entries
    }

    /// Courses of one department, ordered by their code as of `term_id`.
    pub async fn department_courses(&self, department_id: u32, term_id: u32) -> Vec<Arc<Course>> {
        let mut courses: Vec<_> = self
            .courses
            .all()
            .await
            .into_iter()
            .filter(|c| c.department_id == department_id)
            .collect();
        courses.sort_by(|a, b| a.code_as_of(term_id).cmp(b.code_as_of(term_id)));
        courses
    }
}

/// The department course carrying `code`, preferring the one whose code is in
/// effect for `term_id`, then the lowest id.
fn department_course(
    w: &Writer<'_, Course>,
    department_id: u32,
    code: &str,
    term_id: u32,
) -> Option<Arc<Course>> {
    let mut by_code: Vec<_> = w
        .get_all(&LookupKey::Code(code.to_string()))
        .into_iter()
        .filter(|c| c.department_id == department_id)
        .collect();
    by_code.sort_by_key(|c| (c.code_as_of(term_id) != code, c.id));
    by_code.into_iter().next()
}

fn merge_row(
    w: &mut Writer<'_, Course>,
    department_id: u32,
    code: &str,
    title: &str,
    term_id: u32,
) -> MergedCourse {
    let Some(existing) = department_course(w, department_id, code, term_id) else {
        let upsert = w.insert(Course::listed(department_id, code, title, term_id));
        let outcome = if upsert.inserted() {
            CourseMerge::Inserted
        } else {
            CourseMerge::Unchanged
        };
        return MergedCourse {
            course: upsert.into_inner(),
            outcome,
        };
    };

    let mut updated = (*existing).clone();
    let mut changed = updated.observe_code(code, term_id);
    if !title.is_empty() {
        changed |= updated.observe_name(title, term_id);
    }
    changed |= updated.observed_in(term_id);

    if !changed {
        return MergedCourse {
            course: existing,
            outcome: CourseMerge::Unchanged,
        };
    }
    debug!(
        course_id = existing.id,
        code,
        title,
        term_id,
        "Course history extended"
    );
    MergedCourse {
        course: w.replace(&existing, updated),
        outcome: CourseMerge::Updated,
    }
}
