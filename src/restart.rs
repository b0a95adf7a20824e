use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

/// Errors surfaced by the restart layer. Everything here is fatal to the
/// run; the driver reports the message and aborts.
#[derive(Debug, thiserror::Error)]
pub enum RestartError {
    #[error("restart record {0:?} not found")]
    MissingRecord(String),
    #[error("restart record {0:?} holds a {1}, expected {2}")]
    WrongType(String, &'static str, &'static str),
    #[error("restart file version {found} differs from class version {expected}")]
    VersionMismatch { found: i64, expected: i64 },
    #[error("restart file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("restart file is malformed: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
enum Record {
    Integer(i64),
    Double(f64),
    Bool(bool),
}

impl Record {
    fn type_name(&self) -> &'static str {
        match self {
            Record::Integer(_) => "integer",
            Record::Double(_) => "double",
            Record::Bool(_) => "bool",
        }
    }
}

/// A flat store of typed records persisted across runs, written as CBOR.
/// Components stash their scalar state here under well-known keys at
/// checkpoint time and read it back (with strict type and version checks)
/// on restart.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct RestartDatabase {
    records: BTreeMap<String, Record>,
}

// ============================================================================
impl RestartDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_integer(&mut self, key: &str, value: i64) {
        self.records.insert(key.to_string(), Record::Integer(value));
    }

    pub fn put_double(&mut self, key: &str, value: f64) {
        self.records.insert(key.to_string(), Record::Double(value));
    }

    pub fn put_bool(&mut self, key: &str, value: bool) {
        self.records.insert(key.to_string(), Record::Bool(value));
    }

    pub fn get_integer(&self, key: &str) -> Result<i64, RestartError> {
        match self.get(key)? {
            Record::Integer(v) => Ok(*v),
            other => Err(RestartError::WrongType(
                key.to_string(),
                other.type_name(),
                "integer",
            )),
        }
    }

    pub fn get_double(&self, key: &str) -> Result<f64, RestartError> {
        match self.get(key)? {
            Record::Double(v) => Ok(*v),
            other => Err(RestartError::WrongType(
                key.to_string(),
                other.type_name(),
                "double",
            )),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, RestartError> {
        match self.get(key)? {
            Record::Bool(v) => Ok(*v),
            other => Err(RestartError::WrongType(
                key.to_string(),
                other.type_name(),
                "bool",
            )),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    fn get(&self, key: &str) -> Result<&Record, RestartError> {
        self.records
            .get(key)
            .ok_or_else(|| RestartError::MissingRecord(key.to_string()))
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), RestartError> {
        ciborium::into_writer(self, writer).map_err(|e| RestartError::Decode(e.to_string()))
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self, RestartError> {
        ciborium::from_reader(reader).map_err(|e| RestartError::Decode(e.to_string()))
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), RestartError> {
        self.write_to(std::fs::File::create(path)?)
    }

    pub fn read_from_file(path: &Path) -> Result<Self, RestartError> {
        Self::read_from(std::fs::File::open(path)?)
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{RestartDatabase, RestartError};

    #[test]
    fn records_round_trip_through_cbor() {
        let mut db = RestartDatabase::new();
        db.put_integer("version", 3);
        db.put_double("cfl", 0.9);
        db.put_bool("use_flux_correction", true);

        let mut buffer = Vec::new();
        db.write_to(&mut buffer).unwrap();
        let restored = RestartDatabase::read_from(buffer.as_slice()).unwrap();

        assert_eq!(restored.get_integer("version").unwrap(), 3);
        assert_eq!(restored.get_double("cfl").unwrap(), 0.9);
        assert!(restored.get_bool("use_flux_correction").unwrap());
    }

    #[test]
    fn type_and_presence_errors_are_reported() {
        let mut db = RestartDatabase::new();
        db.put_double("cfl", 0.9);

        assert!(matches!(
            db.get_integer("cfl"),
            Err(RestartError::WrongType(_, "double", "integer"))
        ));
        assert!(matches!(
            db.get_double("missing"),
            Err(RestartError::MissingRecord(_))
        ));
    }

    #[test]
    fn files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.cbor");

        let mut db = RestartDatabase::new();
        db.put_bool("lag_dt_computation", false);
        db.write_to_file(&path).unwrap();

        let restored = RestartDatabase::read_from_file(&path).unwrap();
        assert!(!restored.get_bool("lag_dt_computation").unwrap());
    }
}
