use crate::analysis::PointsToTable;
use crate::graph::ProgramGraph;
use crate::module::Module;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Everything the slicer needs about one program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramBundle {
    pub module: Module,
    pub graph: ProgramGraph,
    pub points_to: PointsToTable,
}

impl ProgramBundle {
    pub fn to_json(&self) -> io::Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn from_json(json: &str) -> io::Result<Self> {
        serde_json::from_str(json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

pub fn save_bundle(bundle: &ProgramBundle, path: impl AsRef<Path>) -> io::Result<()> {
    let json = bundle.to_json()?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_bundle(path: impl AsRef<Path>) -> io::Result<ProgramBundle> {
    let json = fs::read_to_string(path)?;
    ProgramBundle::from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::types::{Signature, Type};
    use crate::values::Value;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_bundle() {
        let mut b = ProgramBuilder::new("persisted");
        let table = b.global("table", 256);
        b.annotate(table, "secret").unwrap();
        let main = b.function("main", Signature::default());
        let entry = b.block(main).unwrap();
        b.position_at_end(entry);
        let slot = b.alloca(Type::i64(), 2).unwrap();
        b.store(Value::i64(7), slot).unwrap();
        b.ret(None).unwrap();
        let bundle = b.finish().unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.json");
        save_bundle(&bundle, &path).unwrap();
        let loaded = load_bundle(&path).unwrap();

        assert_eq!(loaded.module.name, "persisted");
        assert_eq!(loaded.module.inst_count(), bundle.module.inst_count());
        assert_eq!(loaded.graph.node_count(), bundle.graph.node_count());
        assert_eq!(loaded.points_to, bundle.points_to);
        assert!(loaded.module.global(table).unwrap().has_annotation("secret"));
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let err = ProgramBundle::from_json("{not json").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
