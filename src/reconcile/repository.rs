//! Generic in-memory entity index.
//!
//! A [`Repository`] holds one entity kind. Entities live in partitions (one
//! per department for professors, a single partition for everything else),
//! each guarded by its own async `RwLock`: lookups share the lock, writes take
//! it exclusively, and writers in different partitions never contend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{trace, warn};

/// A secondary index key. Several entities may share one; `get` returns the
/// first one indexed under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Id(u64),
    Name(String),
    /// Any course code a course has carried.
    Code(String),
    NNumber(String),
    /// Normalized first and last name.
    FullName { first: String, last: String },
    Course(u64),
    Professor(u64),
}

/// An entity kind the reconciler can index.
pub trait Record: Clone + Debug + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync;
    type Partition: Eq + Ord + Hash + Clone + Debug + Send + Sync;

    const KIND: &'static str;
    /// Whether inserts hand out surrogate ids.
    const ASSIGNS_IDS: bool = false;

    fn natural_key(&self) -> Self::Key;

    fn partition(&self) -> Self::Partition;

    fn lookup_keys(&self) -> Vec<LookupKey>;

    /// Keys no two entities in a partition may share.
    fn unique_keys(&self) -> Vec<LookupKey> {
        Vec::new()
    }

    fn id(&self) -> Option<u64>;

    fn set_id(&mut self, _id: u64) {}
}

/// Result of an insert attempt.
#[derive(Debug, Clone)]
pub enum Upsert<E> {
    Inserted(Arc<E>),
    /// Already known; holds the indexed instance.
    Existing(Arc<E>),
}

impl<E> Upsert<E> {
    pub fn inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    pub fn get(&self) -> &Arc<E> {
        match self {
            Self::Inserted(e) | Self::Existing(e) => e,
        }
    }

    pub fn into_inner(self) -> Arc<E> {
        match self {
            Self::Inserted(e) | Self::Existing(e) => e,
        }
    }
}

struct Indices<E: Record> {
    by_key: HashMap<E::Key, Arc<E>>,
    lookups: HashMap<LookupKey, Vec<Arc<E>>>,
}

impl<E: Record> Default for Indices<E> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            lookups: HashMap::new(),
        }
    }
}

/// Lookup keys without repeats; a course may carry the same code twice.
fn distinct_keys<E: Record>(entity: &E) -> Vec<LookupKey> {
    let mut seen = HashSet::new();
    let mut keys = entity.lookup_keys();
    keys.retain(|key| seen.insert(key.clone()));
    keys
}

impl<E: Record> Indices<E> {
    fn index(&mut self, entity: &Arc<E>) {
        self.by_key.insert(entity.natural_key(), Arc::clone(entity));
        for key in distinct_keys(entity.as_ref()) {
            self.lookups.entry(key).or_default().push(Arc::clone(entity));
        }
    }

    /// Swap `old` for `new` in every index, keeping `new` at `old`'s position
    /// wherever both are indexed.
    fn reindex(&mut self, old: &Arc<E>, new: &Arc<E>) {
        let old_key = old.natural_key();
        let new_key = new.natural_key();
        if old_key != new_key {
            self.by_key.remove(&old_key);
        }
        self.by_key.insert(new_key, Arc::clone(new));

        let old_keys = distinct_keys(old.as_ref());
        let new_keys = distinct_keys(new.as_ref());
        for key in &old_keys {
            let Some(slot) = self.lookups.get_mut(key) else {
                continue;
            };
            if new_keys.contains(key) {
                for e in slot.iter_mut().filter(|e| Arc::ptr_eq(e, old)) {
                    *e = Arc::clone(new);
                }
            } else {
                slot.retain(|e| !Arc::ptr_eq(e, old));
                if slot.is_empty() {
                    self.lookups.remove(key);
                }
            }
        }
        for key in new_keys {
            if !old_keys.contains(&key) {
                self.lookups.entry(key).or_default().push(Arc::clone(new));
            }
        }
    }

    fn first(&self, key: &LookupKey) -> Option<Arc<E>> {
        self.lookups.get(key).and_then(|slot| slot.first()).cloned()
    }
}

/// Exclusive access to one partition, handed to [`Repository::write`].
pub struct Writer<'a, E: Record> {
    repo: &'a Repository<E>,
    indices: &'a mut Indices<E>,
}

impl<E: Record> Writer<'_, E> {
    pub fn get(&self, key: &LookupKey) -> Option<Arc<E>> {
        self.indices.first(key)
    }

    pub fn get_all(&self, key: &LookupKey) -> Vec<Arc<E>> {
        self.indices.lookups.get(key).cloned().unwrap_or_default()
    }

    pub fn get_by_key(&self, key: &E::Key) -> Option<Arc<E>> {
        self.indices.by_key.get(key).cloned()
    }

    /// Insert unless the natural key or a unique key is already taken.
    pub fn insert(&mut self, mut entity: E) -> Upsert<E> {
        if let Some(existing) = self.get_by_key(&entity.natural_key()) {
            return Upsert::Existing(existing);
        }
        for key in entity.unique_keys() {
            if let Some(existing) = self.indices.first(&key) {
                warn!(
                    kind = E::KIND,
                    key = ?key,
                    incoming = ?entity.natural_key(),
                    existing = ?existing.natural_key(),
                    "Unique key collision, keeping existing record"
                );
                return Upsert::Existing(existing);
            }
        }

        match entity.id() {
            Some(0) | None if E::ASSIGNS_IDS => entity.set_id(self.repo.allocate_id()),
            Some(id) => self.repo.observe_id(id),
            None => {}
        }

        let entity = Arc::new(entity);
        self.indices.index(&entity);
        self.repo.count.fetch_add(1, Ordering::Relaxed);
        self.repo.pending.push(Arc::clone(&entity));
        trace!(kind = E::KIND, key = ?entity.natural_key(), "Inserted");
        Upsert::Inserted(entity)
    }

    /// Replace an indexed entity with an updated copy. The id is kept.
    pub fn replace(&mut self, old: &Arc<E>, mut updated: E) -> Arc<E> {
        if let Some(id) = old.id() {
            updated.set_id(id);
        }
        let updated = Arc::new(updated);
        self.indices.reindex(old, &updated);
        self.repo.pending.push(Arc::clone(&updated));
        trace!(kind = E::KIND, key = ?updated.natural_key(), "Updated");
        updated
    }
}

type Partition<E> = Arc<RwLock<Indices<E>>>;

pub struct Repository<E: Record> {
    partitions: DashMap<E::Partition, Partition<E>>,
    next_id: AtomicU64,
    count: AtomicUsize,
    /// Inserted or replaced since the last drain, in write order.
    pending: SegQueue<Arc<E>>,
}

impl<E: Record> Default for Repository<E> {
    fn default() -> Self {
        Self {
            partitions: DashMap::new(),
            next_id: AtomicU64::new(1),
            count: AtomicUsize::new(0),
            pending: SegQueue::new(),
        }
    }
}

impl<E: Record> Repository<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build indices from stored records. Nothing is queued for persistence.
    pub fn hydrate(items: impl IntoIterator<Item = E>) -> Self {
        let repo = Self::new();
        let mut partitions: HashMap<E::Partition, Indices<E>> = HashMap::new();
        let mut count = 0;
        for item in items {
            if let Some(id) = item.id() {
                repo.observe_id(id);
            }
            let indices = partitions.entry(item.partition()).or_default();
            if indices.by_key.contains_key(&item.natural_key()) {
                warn!(kind = E::KIND, key = ?item.natural_key(), "Duplicate stored record skipped");
                continue;
            }
            indices.index(&Arc::new(item));
            count += 1;
        }
        for (partition, indices) in partitions {
            repo.partitions
                .insert(partition, Arc::new(RwLock::new(indices)));
        }
        repo.count.store(count, Ordering::Relaxed);
        repo
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn observe_id(&self, id: u64) {
        self.next_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }

    fn partition_lock(&self, partition: &E::Partition) -> Partition<E> {
        // Clone the Arc out so no shard guard is held across an await.
        if let Some(existing) = self.partitions.get(partition) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.partitions.entry(partition.clone()).or_default().value())
    }

    /// Every partition lock, in ascending partition order.
    fn partition_locks(&self) -> Vec<Partition<E>> {
        let mut locks: Vec<_> = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        locks.sort_by(|(a, _), (b, _)| a.cmp(b));
        locks.into_iter().map(|(_, lock)| lock).collect()
    }

    /// Number of indexed entities.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First entity under `key`, searching partitions in ascending order.
    pub async fn get(&self, key: &LookupKey) -> Option<Arc<E>> {
        for partition in self.partition_locks() {
            if let Some(found) = partition.read().await.first(key) {
                return Some(found);
            }
        }
        None
    }

    /// First entity under `key` in one partition.
    pub async fn get_in(&self, partition: &E::Partition, key: &LookupKey) -> Option<Arc<E>> {
        let lock = self.partitions.get(partition).map(|p| Arc::clone(p.value()))?;
        let indices = lock.read().await;
        indices.first(key)
    }

    /// Every entity under `key`, across partitions in ascending order.
    pub async fn get_all(&self, key: &LookupKey) -> Vec<Arc<E>> {
        let mut found = Vec::new();
        for partition in self.partition_locks() {
            if let Some(slot) = partition.read().await.lookups.get(key) {
                found.extend(slot.iter().cloned());
            }
        }
        found
    }

    pub async fn get_by_key(&self, key: &E::Key) -> Option<Arc<E>> {
        for partition in self.partition_locks() {
            if let Some(found) = partition.read().await.by_key.get(key) {
                return Some(Arc::clone(found));
            }
        }
        None
    }

    /// Every indexed entity, in no particular order.
    pub async fn all(&self) -> Vec<Arc<E>> {
        let mut all = Vec::with_capacity(self.len());
        for partition in self.partition_locks() {
            all.extend(partition.read().await.by_key.values().cloned());
        }
        all
    }

    /// Run `f` with exclusive access to one partition.
    pub async fn write<R>(
        &self,
        partition: &E::Partition,
        f: impl FnOnce(&mut Writer<'_, E>) -> R,
    ) -> R {
        let lock = self.partition_lock(partition);
        let mut indices = lock.write().await;
        let mut writer = Writer {
            repo: self,
            indices: &mut *indices,
        };
        f(&mut writer)
    }

    /// Insert unless already known. Idempotent.
    pub async fn add(&self, entity: E) -> Upsert<E> {
        let partition = entity.partition();
        self.write(&partition, |w| w.insert(entity)).await
    }

    /// Insert many, one lock acquisition per partition. Duplicates inside the
    /// batch count once. Returns the number inserted.
    pub async fn add_range(&self, entities: impl IntoIterator<Item = E>) -> usize {
        let mut grouped: BTreeMap<E::Partition, Vec<E>> = BTreeMap::new();
        for entity in entities {
            grouped.entry(entity.partition()).or_default().push(entity);
        }

        let mut inserted = 0;
        for (partition, batch) in grouped {
            inserted += self
                .write(&partition, |w| {
                    batch
                        .into_iter()
                        .map(|entity| w.insert(entity))
                        .filter(Upsert::inserted)
                        .count()
                })
                .await;
        }
        inserted
    }

    /// Take everything written since the last drain.
    pub fn drain_pending(&self) -> Vec<Arc<E>> {
        std::iter::from_fn(|| self.pending.pop()).collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        id: u64,
        shelf: u8,
        serial: String,
        label: String,
    }

    impl Widget {
        fn new(shelf: u8, serial: &str, label: &str) -> Self {
            Self {
                id: 0,
                shelf,
                serial: serial.into(),
                label: label.into(),
            }
        }
    }

    impl Record for Widget {
        type Key = String;
        type Partition = u8;
        const KIND: &'static str = "widget";
        const ASSIGNS_IDS: bool = true;

        fn natural_key(&self) -> String {
            self.serial.clone()
        }

        fn partition(&self) -> u8 {
            self.shelf
        }

        fn lookup_keys(&self) -> Vec<LookupKey> {
            vec![LookupKey::Id(self.id), LookupKey::Name(self.label.clone())]
        }

        fn unique_keys(&self) -> Vec<LookupKey> {
            vec![LookupKey::Name(self.label.clone())]
        }

        fn id(&self) -> Option<u64> {
            Some(self.id)
        }

        fn set_id(&mut self, id: u64) {
            self.id = id;
        }
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let repo = Repository::new();
        assert!(repo.add(Widget::new(1, "S1", "bolt")).await.inserted());
        let again = repo.add(Widget::new(1, "S1", "bolt")).await;
        assert!(!again.inserted());
        assert_eq!(again.get().id, 1);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.drain_pending().len(), 1);
    }

    #[tokio::test]
    async fn add_range_counts_batch_duplicates_once() {
        let repo = Repository::new();
        repo.add(Widget::new(1, "S1", "bolt")).await;
        repo.drain_pending();

        let inserted = repo
            .add_range([
                Widget::new(1, "S1", "bolt"),
                Widget::new(2, "S2", "nut"),
                Widget::new(2, "S2", "nut"),
            ])
            .await;
        assert_eq!(inserted, 1);
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.drain_pending().len(), 1);
    }

    #[tokio::test]
    async fn every_lookup_path_resolves_after_add() {
        let repo = Repository::new();
        let added = repo.add(Widget::new(3, "S9", "gear")).await.into_inner();
        let by_id = repo.get(&LookupKey::Id(added.id)).await.unwrap();
        let by_name = repo.get_in(&3, &LookupKey::Name("gear".into())).await.unwrap();
        let by_key = repo.get_by_key(&"S9".to_string()).await.unwrap();
        assert!(Arc::ptr_eq(&by_id, &added));
        assert!(Arc::ptr_eq(&by_name, &added));
        assert!(Arc::ptr_eq(&by_key, &added));
        assert!(repo.get_in(&4, &LookupKey::Name("gear".into())).await.is_none());
    }

    #[tokio::test]
    async fn unique_keys_are_enforced_per_partition() {
        let repo = Repository::new();
        assert!(repo.add(Widget::new(1, "S1", "bolt")).await.inserted());
        assert!(!repo.add(Widget::new(1, "S2", "bolt")).await.inserted());
        assert!(repo.add(Widget::new(2, "S3", "bolt")).await.inserted());
        assert_eq!(repo.get_all(&LookupKey::Name("bolt".into())).await.len(), 2);
    }

    #[tokio::test]
    async fn ids_continue_after_hydrated_max() {
        let mut stored = Widget::new(1, "S1", "bolt");
        stored.id = 41;
        let repo = Repository::hydrate([stored]);
        assert_eq!(repo.pending(), 0);
        let added = repo.add(Widget::new(1, "S2", "nut")).await.into_inner();
        assert_eq!(added.id, 42);
    }

    #[tokio::test]
    async fn replace_keeps_position_and_id() {
        let repo = Repository::new();
        let first = repo.add(Widget::new(1, "S1", "bolt")).await.into_inner();
        repo.drain_pending();

        let updated = repo
            .write(&1, |w| {
                let mut copy = (*first).clone();
                copy.id = 999;
                copy.label = "hex bolt".into();
                w.replace(&first, copy)
            })
            .await;

        assert_eq!(updated.id, first.id);
        assert!(repo.get(&LookupKey::Name("bolt".into())).await.is_none());
        let found = repo.get(&LookupKey::Name("hex bolt".into())).await.unwrap();
        assert!(Arc::ptr_eq(&found, &updated));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.drain_pending().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_adds_insert_once() {
        let repo = Arc::new(Repository::<Widget>::new());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move { repo.add(Widget::new(1, "S1", "bolt")).await.inserted() })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn lookups_across_partitions_follow_partition_order() {
        let repo = Repository::new();
        for shelf in [3, 1, 2] {
            repo.add(Widget::new(shelf, &format!("S{shelf}"), "bolt")).await;
        }

        let first = repo.get(&LookupKey::Name("bolt".into())).await.unwrap();
        assert_eq!(first.shelf, 1);
        let shelves: Vec<u8> = repo
            .get_all(&LookupKey::Name("bolt".into()))
            .await
            .iter()
            .map(|w| w.shelf)
            .collect();
        assert_eq!(shelves, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn held_partition_does_not_block_others() {
        let repo = Repository::new();
        repo.add(Widget::new(1, "S1", "bolt")).await;
        repo.add(Widget::new(2, "S2", "nut")).await;

        let lock = repo.partition_lock(&1);
        let _held = lock.write().await;
        let wait = Duration::from_millis(50);

        let added = timeout(wait, repo.add(Widget::new(2, "S3", "washer"))).await;
        assert!(added.expect("add in another partition").inserted());
        let found = timeout(wait, repo.get_in(&2, &LookupKey::Name("nut".into()))).await;
        assert!(found.expect("read in another partition").is_some());

        let blocked = timeout(wait, repo.get_in(&1, &LookupKey::Name("bolt".into()))).await;
        assert!(blocked.is_err());
    }
}
