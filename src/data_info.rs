//! # Data info provider
//!
//! The versioned data registry. Maps each logical datum (file path or
//! object key) to a [`DataInstance`] holding the current version, the
//! producer tasks of that version, and per-version reader sets used for
//! garbage release.
//!
//! Called only from the analyser loop, so no internal locking.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use tracing::trace;

use crate::types::{DataId, DataRef, DataVersion, Direction, TaskId};

// ============================================================================
// RECORDED ACCESSES
// ============================================================================

/// Whether a task observed or produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One registry access performed by a task, kept on the task so its
/// references can be released when it ends.
#[derive(Debug, Clone, Copy)]
pub struct RecordedAccess {
    pub data: DataId,
    pub version: DataVersion,
    pub kind: AccessKind,
}

// ============================================================================
// ACCESS PLAN
// ============================================================================

/// What the analyser must do for one parameter access: the tasks to
/// order after, and the versions touched.
#[derive(Debug, Clone)]
pub struct AccessPlan {
    pub data: DataId,
    /// Producers (and, for writes, readers) of the version this access
    /// builds on. May contain ids of tasks that already finished; the
    /// graph skips those when wiring edges.
    pub depends_on: Vec<TaskId>,
    pub read_version: Option<DataVersion>,
    pub written_version: Option<DataVersion>,
}

impl AccessPlan {
    /// The per-task access records to retain for later release.
    pub fn records(&self) -> Vec<RecordedAccess> {
        let mut records = Vec::with_capacity(2);
        if let Some(version) = self.read_version {
            records.push(RecordedAccess {
                data: self.data,
                version,
                kind: AccessKind::Read,
            });
        }
        if let Some(version) = self.written_version {
            records.push(RecordedAccess {
                data: self.data,
                version,
                kind: AccessKind::Write,
            });
        }
        records
    }
}

/// Result of a main-thread access, handed back once the producers have
/// finished.
#[derive(Debug, Clone)]
pub struct DataAccessGrant {
    pub data: DataId,
    pub version: DataVersion,
    /// Canonical path for file-backed data, None for objects.
    pub path: Option<PathBuf>,
}

// ============================================================================
// DATA INSTANCE
// ============================================================================

/// How the datum is identified outside the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOrigin {
    File(PathBuf),
    Object(u64),
}

/// An open concurrent or commutative access group. Members collectively
/// produce the next version when the group closes.
#[derive(Debug)]
struct AccessGroup {
    mode: Direction,
    members: Vec<TaskId>,
}

/// The runtime's view of one logical datum.
#[derive(Debug)]
pub struct DataInstance {
    id: DataId,
    origin: DataOrigin,
    current_version: DataVersion,
    /// Producers of the current version; empty when the datum was last
    /// written outside the runtime.
    writers: Vec<TaskId>,
    /// Reader sets per still-referenced version.
    versions: HashMap<DataVersion, HashSet<TaskId>>,
    group: Option<AccessGroup>,
}

impl DataInstance {
    fn new(id: DataId, origin: DataOrigin) -> Self {
        let mut versions = HashMap::new();
        versions.insert(DataVersion::INITIAL, HashSet::new());
        Self {
            id,
            origin,
            current_version: DataVersion::INITIAL,
            writers: Vec::new(),
            versions,
            group: None,
        }
    }

    pub fn id(&self) -> DataId {
        self.id
    }

    pub fn origin(&self) -> &DataOrigin {
        &self.origin
    }

    pub fn current_version(&self) -> DataVersion {
        self.current_version
    }

    pub fn current_writers(&self) -> &[TaskId] {
        &self.writers
    }

    fn path(&self) -> Option<PathBuf> {
        match &self.origin {
            DataOrigin::File(path) => Some(path.clone()),
            DataOrigin::Object(_) => None,
        }
    }

    /// Commit a new version with the given producers.
    fn bump(&mut self, producers: Vec<TaskId>) -> DataVersion {
        self.current_version = self.current_version.next();
        self.versions.insert(self.current_version, HashSet::new());
        self.writers = producers;
        self.current_version
    }

    /// Close the open access group, committing its members as the
    /// producers of a fresh version.
    fn close_group(&mut self) {
        if let Some(group) = self.group.take() {
            trace!(data = %self.id, members = group.members.len(), mode = %group.mode, "closing access group");
            self.bump(group.members);
        }
    }

    fn readers_of(&mut self, version: DataVersion) -> &mut HashSet<TaskId> {
        self.versions.entry(version).or_default()
    }

    /// Drop the reader set of a superseded version nobody reads.
    fn try_collect(&mut self, version: DataVersion) {
        if version < self.current_version {
            if let Some(readers) = self.versions.get(&version) {
                if readers.is_empty() {
                    self.versions.remove(&version);
                }
            }
        }
    }
}

// ============================================================================
// PROVIDER
// ============================================================================

/// Registry of every datum the runtime has observed.
#[derive(Debug, Default)]
pub struct DataInfoProvider {
    instances: HashMap<DataId, DataInstance>,
    /// Canonical path -> id.
    files: HashMap<PathBuf, DataId>,
    /// Application object key -> id.
    objects: HashMap<u64, DataId>,
    next_data_id: u64,
}

impl DataInfoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a reference to its datum, registering it on first sight.
    pub fn resolve(&mut self, data_ref: &DataRef) -> DataId {
        match data_ref {
            DataRef::File(path) => {
                let canonical = canonical_path(path);
                if let Some(id) = self.files.get(&canonical) {
                    return *id;
                }
                let id = self.fresh_id();
                self.files.insert(canonical.clone(), id);
                self.instances
                    .insert(id, DataInstance::new(id, DataOrigin::File(canonical)));
                id
            }
            DataRef::Object(key) => {
                if let Some(id) = self.objects.get(key) {
                    return *id;
                }
                let id = self.fresh_id();
                self.objects.insert(*key, id);
                self.instances
                    .insert(id, DataInstance::new(id, DataOrigin::Object(*key)));
                id
            }
        }
    }

    pub fn lookup(&self, data_ref: &DataRef) -> Option<DataId> {
        match data_ref {
            DataRef::File(path) => self.files.get(&canonical_path(path)).copied(),
            DataRef::Object(key) => self.objects.get(key).copied(),
        }
    }

    pub fn instance(&self, data: DataId) -> Option<&DataInstance> {
        self.instances.get(&data)
    }

    /// Record a task access and return the edge-wiring plan.
    ///
    /// Reads depend on the producers of the current version; writes
    /// additionally depend on its readers and commit a new version.
    /// Group accesses join the open group (opening one if needed) and
    /// defer their version commit to the group close.
    pub fn access(&mut self, data_ref: &DataRef, direction: Direction, task: TaskId) -> AccessPlan {
        let id = self.resolve(data_ref);
        let instance = self
            .instances
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("instance registered by resolve"));

        // A non-matching access finalizes any open group first.
        let group_matches = matches!(&instance.group, Some(group) if group.mode == direction);
        if instance.group.is_some() && !group_matches {
            instance.close_group();
        }

        let current = instance.current_version;
        let plan = match direction {
            Direction::In => {
                let depends_on = instance.writers.clone();
                instance.readers_of(current).insert(task);
                AccessPlan {
                    data: id,
                    depends_on,
                    read_version: Some(current),
                    written_version: None,
                }
            }
            Direction::Out | Direction::InOut => {
                let mut depends_on = instance.writers.clone();
                depends_on.extend(
                    instance
                        .readers_of(current)
                        .iter()
                        .copied()
                        .filter(|reader| *reader != task),
                );
                let read_version = if direction.reads() {
                    instance.readers_of(current).insert(task);
                    Some(current)
                } else {
                    None
                };
                let written = instance.bump(vec![task]);
                AccessPlan {
                    data: id,
                    depends_on,
                    read_version,
                    written_version: Some(written),
                }
            }
            Direction::Concurrent | Direction::Commutative => {
                // Peers in the group are ordered after the pre-group
                // producers but not among one another.
                let depends_on = instance.writers.clone();
                instance.readers_of(current).insert(task);
                let group = instance.group.get_or_insert_with(|| AccessGroup {
                    mode: direction,
                    members: Vec::new(),
                });
                group.members.push(task);
                AccessPlan {
                    data: id,
                    depends_on,
                    read_version: Some(current),
                    // Committed when the group closes.
                    written_version: Some(current.next()),
                }
            }
        };
        trace!(data = %id, %direction, %task, deps = plan.depends_on.len(), "registered access");
        plan
    }

    /// Main-thread access: returns the grant plus the producers the
    /// caller must wait for. Write-mode accesses commit a version with
    /// no producer task (the datum is modified outside the runtime).
    pub fn main_access(
        &mut self,
        data_ref: &DataRef,
        direction: Direction,
    ) -> (DataAccessGrant, Vec<TaskId>) {
        let id = self.resolve(data_ref);
        let instance = self
            .instances
            .get_mut(&id)
            .unwrap_or_else(|| unreachable!("instance registered by resolve"));

        instance.close_group();
        let wait_for = instance.writers.clone();
        let version = if direction.writes() {
            instance.bump(Vec::new())
        } else {
            instance.current_version
        };
        let grant = DataAccessGrant {
            data: id,
            version,
            path: instance.path(),
        };
        (grant, wait_for)
    }

    /// Commit a new version with an explicit producer (None marks a
    /// write from outside the runtime).
    pub fn new_version(&mut self, data: DataId, producer: Option<TaskId>) -> Option<DataVersion> {
        let instance = self.instances.get_mut(&data)?;
        Some(instance.bump(producer.into_iter().collect()))
    }

    /// Finalize the open group on a datum, if any.
    pub fn close_group(&mut self, data: DataId) {
        if let Some(instance) = self.instances.get_mut(&data) {
            instance.close_group();
        }
    }

    /// Drop one task from a version's reader set, collecting the
    /// version once it is superseded and unread.
    pub fn release_readers(&mut self, data: DataId, version: DataVersion, task: TaskId) {
        if let Some(instance) = self.instances.get_mut(&data) {
            if let Some(readers) = instance.versions.get_mut(&version) {
                readers.remove(&task);
            }
            instance.try_collect(version);
        }
    }

    /// Release every registry reference a finished task holds.
    pub fn release_task(&mut self, task: TaskId, accesses: &[RecordedAccess]) {
        for access in accesses {
            match access.kind {
                AccessKind::Read => self.release_readers(access.data, access.version, task),
                AccessKind::Write => {
                    if let Some(instance) = self.instances.get_mut(&access.data) {
                        instance.try_collect(access.version);
                    }
                }
            }
        }
    }

    /// Number of live (version, reader-set) entries, across all data.
    /// Exposed for tests and diagnostics.
    pub fn live_versions(&self) -> usize {
        self.instances.values().map(|i| i.versions.len()).sum()
    }

    fn fresh_id(&mut self) -> DataId {
        self.next_data_id += 1;
        DataId::from_raw(self.next_data_id)
    }
}

// ============================================================================
// PATH CANONICALIZATION
// ============================================================================

/// Canonicalize where the file exists, otherwise normalize lexically so
/// that equivalent spellings of a not-yet-created path still collide.
fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u64) -> TaskId {
        TaskId::from_raw(id)
    }

    #[test]
    fn first_observation_registers_the_datum() {
        let mut dip = DataInfoProvider::new();
        let plan = dip.access(&DataRef::object(10), Direction::In, t(1));

        assert!(plan.depends_on.is_empty());
        assert_eq!(plan.read_version, Some(DataVersion::INITIAL));
        assert_eq!(dip.lookup(&DataRef::object(10)), Some(plan.data));
    }

    #[test]
    fn readers_share_a_version_without_ordering() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        dip.access(&data, Direction::Out, t(1));
        let r1 = dip.access(&data, Direction::In, t(2));
        let r2 = dip.access(&data, Direction::In, t(3));

        assert_eq!(r1.depends_on, vec![t(1)]);
        assert_eq!(r2.depends_on, vec![t(1)]);
    }

    #[test]
    fn write_after_write_orders_on_the_previous_writer() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        let w1 = dip.access(&data, Direction::Out, t(1));
        let w2 = dip.access(&data, Direction::Out, t(2));

        assert!(w1.depends_on.is_empty());
        assert_eq!(w2.depends_on, vec![t(1)]);
        assert!(w2.written_version > w1.written_version);
        let id = dip.lookup(&data).unwrap();
        assert_eq!(dip.instance(id).unwrap().current_writers(), &[t(2)]);
    }

    #[test]
    fn writers_order_after_current_readers() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        dip.access(&data, Direction::Out, t(1));
        dip.access(&data, Direction::In, t(2));
        dip.access(&data, Direction::In, t(3));
        let w = dip.access(&data, Direction::InOut, t(4));

        let mut deps = w.depends_on.clone();
        deps.sort();
        assert_eq!(deps, vec![t(1), t(2), t(3)]);
    }

    #[test]
    fn group_members_have_no_mutual_ordering() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        dip.access(&data, Direction::Out, t(1));
        let c1 = dip.access(&data, Direction::Concurrent, t(2));
        let c2 = dip.access(&data, Direction::Concurrent, t(3));

        assert_eq!(c1.depends_on, vec![t(1)]);
        assert_eq!(c2.depends_on, vec![t(1)]);
        // One bump for the whole group, pending its close.
        assert_eq!(c1.written_version, c2.written_version);
    }

    #[test]
    fn reader_after_group_depends_on_all_members() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        dip.access(&data, Direction::Concurrent, t(1));
        dip.access(&data, Direction::Concurrent, t(2));
        let r = dip.access(&data, Direction::In, t(3));

        let mut deps = r.depends_on.clone();
        deps.sort();
        assert_eq!(deps, vec![t(1), t(2)]);
    }

    #[test]
    fn commutative_does_not_join_a_concurrent_group() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        dip.access(&data, Direction::Concurrent, t(1));
        let c = dip.access(&data, Direction::Commutative, t(2));

        // The concurrent group closed, so the commutative access is
        // ordered after its member.
        assert_eq!(c.depends_on, vec![t(1)]);
    }

    #[test]
    fn versions_are_strictly_monotonic() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        let mut last = DataVersion::INITIAL;
        for id in 1..=5 {
            let plan = dip.access(&data, Direction::Out, t(id));
            let written = plan.written_version.unwrap();
            assert!(written > last);
            last = written;
        }
    }

    #[test]
    fn superseded_unread_versions_are_collected() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        let w1 = dip.access(&data, Direction::Out, t(1));
        let r = dip.access(&data, Direction::In, t(2));
        dip.access(&data, Direction::Out, t(3));

        // t2 still reads the superseded version.
        let before = dip.live_versions();
        dip.release_task(t(2), &r.records());
        assert_eq!(dip.live_versions(), before - 1);

        // Releasing the writer of an already-collected version is a
        // no-op.
        dip.release_task(t(1), &w1.records());
    }

    #[test]
    fn main_write_has_no_producer_task() {
        let mut dip = DataInfoProvider::new();
        let data = DataRef::object(1);

        dip.access(&data, Direction::Out, t(1));
        let (grant, wait_for) = dip.main_access(&data, Direction::InOut);

        assert_eq!(wait_for, vec![t(1)]);
        assert_eq!(grant.version.as_u32(), 3);
        let id = dip.lookup(&data).unwrap();
        assert!(dip.instance(id).unwrap().current_writers().is_empty());
    }

    #[test]
    fn equivalent_path_spellings_collide() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.dat");
        std::fs::write(&file, b"x").unwrap();

        let mut dip = DataInfoProvider::new();
        let direct = dip.resolve(&DataRef::file(&file));
        let dotted = dip.resolve(&DataRef::File(dir.path().join("./sub/../out.dat")));

        assert_eq!(direct, dotted);
    }

    #[test]
    fn grant_carries_the_canonical_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("result.bin");
        std::fs::write(&file, b"x").unwrap();

        let mut dip = DataInfoProvider::new();
        let (grant, _) = dip.main_access(&DataRef::file(&file), Direction::In);
        assert_eq!(grant.path, Some(std::fs::canonicalize(&file).unwrap()));
    }
}
