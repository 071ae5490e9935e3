use crate::values::{FuncId, GlobalId, InstId, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

/// Where an abstract memory object comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectOrigin {
    Alloca(InstId),
    /// The heap allocation call that returns the object.
    HeapCall(InstId),
    Global(GlobalId),
    Function(FuncId),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryObject {
    pub id: ObjectId,
    pub origin: ObjectOrigin,
    /// Size in bytes, 0 when unknown.
    pub size: u64,
    /// Assigned the first time the object is buffered.
    pub buffer_id: Option<u32>,
}

impl MemoryObject {
    pub fn new(id: ObjectId, origin: ObjectOrigin, size: u64) -> Self {
        Self {
            id,
            origin,
            size,
            buffer_id: None,
        }
    }

    pub fn is_buffered(&self) -> bool {
        self.buffer_id.is_some()
    }
}

/// Points-to queries consumed by the instrumenter.
///
/// Objects are mutable through the oracle because buffer ids are assigned lazily.
pub trait PointsToOracle {
    fn points_to(&self, pointer: &Value) -> Vec<ObjectId>;

    fn object(&self, id: ObjectId) -> Option<&MemoryObject>;

    fn object_mut(&mut self, id: ObjectId) -> Option<&mut MemoryObject>;

    fn targets(&self, pointer: &Value) -> Vec<&MemoryObject> {
        self.points_to(pointer)
            .into_iter()
            .filter_map(|id| self.object(id))
            .collect()
    }
}

/// Table-backed oracle filled by whoever ran the points-to analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "PointsToData", into = "PointsToData")]
pub struct PointsToTable {
    objects: IndexMap<ObjectId, MemoryObject>,
    targets: IndexMap<Value, Vec<ObjectId>>,
}

impl PointsToTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, origin: ObjectOrigin, size: u64) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.insert(id, MemoryObject::new(id, origin, size));
        id
    }

    /// Record that `pointer` may point to `object`.
    pub fn add_target(&mut self, pointer: Value, object: ObjectId) {
        let entry = self.targets.entry(pointer).or_default();
        if !entry.contains(&object) {
            entry.push(object);
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &MemoryObject> {
        self.objects.values()
    }

    pub fn object_for(&self, origin: ObjectOrigin) -> Option<ObjectId> {
        self.objects
            .values()
            .find(|o| o.origin == origin)
            .map(|o| o.id)
    }

    pub fn clear_buffer_ids(&mut self) {
        for object in self.objects.values_mut() {
            object.buffer_id = None;
        }
    }
}

impl PointsToOracle for PointsToTable {
    fn points_to(&self, pointer: &Value) -> Vec<ObjectId> {
        self.targets.get(pointer).cloned().unwrap_or_default()
    }

    fn object(&self, id: ObjectId) -> Option<&MemoryObject> {
        self.objects.get(&id)
    }

    fn object_mut(&mut self, id: ObjectId) -> Option<&mut MemoryObject> {
        self.objects.get_mut(&id)
    }
}

#[derive(Serialize, Deserialize)]
struct PointsToData {
    objects: Vec<MemoryObject>,
    targets: Vec<PointsToEntry>,
}

#[derive(Serialize, Deserialize)]
struct PointsToEntry {
    pointer: Value,
    objects: Vec<ObjectId>,
}

impl From<PointsToData> for PointsToTable {
    fn from(data: PointsToData) -> Self {
        Self {
            objects: data.objects.into_iter().map(|o| (o.id, o)).collect(),
            targets: data
                .targets
                .into_iter()
                .map(|e| (e.pointer, e.objects))
                .collect(),
        }
    }
}

impl From<PointsToTable> for PointsToData {
    fn from(table: PointsToTable) -> Self {
        Self {
            objects: table.objects.into_values().collect(),
            targets: table
                .targets
                .into_iter()
                .map(|(pointer, objects)| PointsToEntry { pointer, objects })
                .collect(),
        }
    }
}
