//! Typed checkpoint tape

use crate::data::Data;
use crate::error::{Error, Result};

/// An ordered, typed stream of record values used to save and restore
/// pipeline positions.
///
/// Writes append to the end; typed reads consume from a cursor. The cursor
/// position is the entire checkpoint state, and `rewind` moves it back to
/// the start. The byte form produced by [`Tape::to_bytes`] is opaque to
/// callers; only the pipeline that wrote a tape (with an identical operator
/// graph) can reload it.
#[derive(Debug, Default, Clone)]
pub struct Tape {
    storage: Vec<Data>,
    position: usize,
}

impl Tape {
    /// Creates an empty tape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values recorded on the tape.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the tape holds no values.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the read cursor back to the start.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Appends a record value.
    pub fn write(&mut self, value: Data) {
        self.storage.push(value);
    }

    /// Appends an integer.
    pub fn write_int(&mut self, value: i64) {
        self.write(Data::Int(value));
    }

    /// Appends a non-negative count or index.
    pub fn write_size(&mut self, value: usize) {
        self.write(Data::Int(value as i64));
    }

    /// Appends a byte payload.
    pub fn write_bytes(&mut self, value: Vec<u8>) {
        self.write(Data::Bytes(value));
    }

    /// Appends an operator state tag.
    pub fn write_tag(&mut self, tag: u8) {
        self.write(Data::Int(i64::from(tag)));
    }

    /// Consumes and returns the next value of any case.
    pub fn read(&mut self) -> Result<Data> {
        let value = self
            .storage
            .get(self.position)
            .cloned()
            .ok_or_else(|| Error::CorruptedCheckpoint("the tape is exhausted".to_string()))?;

        self.position += 1;

        Ok(value)
    }

    /// Consumes the next value, failing unless it is an integer.
    pub fn read_int(&mut self) -> Result<i64> {
        let position = self.position;

        match self.read()? {
            Data::Int(value) => Ok(value),
            other => Err(type_mismatch("int", &other, position)),
        }
    }

    /// Consumes the next value as a non-negative count or index.
    pub fn read_size(&mut self) -> Result<usize> {
        let position = self.position;

        let value = self.read_int()?;

        usize::try_from(value).map_err(|_| {
            Error::CorruptedCheckpoint(format!(
                "expected a non-negative size at tape position {position}, found {value}"
            ))
        })
    }

    /// Consumes the next value, failing unless it is a byte payload.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let position = self.position;

        match self.read()? {
            Data::Bytes(value) => Ok(value),
            other => Err(type_mismatch("bytes", &other, position)),
        }
    }

    /// Consumes the next value and checks it against an operator state tag.
    ///
    /// A mismatch means the tape was written by a different operator graph.
    pub fn expect_tag(&mut self, tag: u8, operator: &str) -> Result<()> {
        let value = self.read_int()?;

        if value != i64::from(tag) {
            return Err(Error::CorruptedCheckpoint(format!(
                "the tape does not hold the state of a {operator} operator"
            )));
        }

        Ok(())
    }

    /// Serialises the tape contents to an opaque byte stream.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.storage)?)
    }

    /// Restores a tape from its byte-stream form, with the cursor rewound.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let storage: Vec<Data> = bincode::deserialize(bytes)
            .map_err(|err| Error::CorruptedCheckpoint(format!("invalid tape bytes: {err}")))?;

        Ok(Self {
            storage,
            position: 0,
        })
    }
}

fn type_mismatch(expected: &str, found: &Data, position: usize) -> Error {
    Error::CorruptedCheckpoint(format!(
        "expected {expected} at tape position {position}, found {}",
        found.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_in_order() {
        let mut tape = Tape::new();

        tape.write_size(7);
        tape.write(Data::from("state"));
        tape.write_bytes(vec![1, 2]);

        assert_eq!(tape.read_size().unwrap(), 7);
        assert_eq!(tape.read().unwrap(), Data::from("state"));
        assert_eq!(tape.read_bytes().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_rewind_replays_from_start() {
        let mut tape = Tape::new();

        tape.write_int(42);

        assert_eq!(tape.read_int().unwrap(), 42);

        tape.rewind();

        assert_eq!(tape.read_int().unwrap(), 42);
    }

    #[test]
    fn test_typed_read_rejects_other_case() {
        let mut tape = Tape::new();

        tape.write(Data::from("not an int"));

        assert!(matches!(
            tape.read_int(),
            Err(Error::CorruptedCheckpoint(_))
        ));
    }

    #[test]
    fn test_reading_past_the_end_fails() {
        let mut tape = Tape::new();

        assert!(matches!(tape.read(), Err(Error::CorruptedCheckpoint(_))));
    }

    #[test]
    fn test_tag_mismatch_is_detected() {
        let mut tape = Tape::new();

        tape.write_tag(3);

        assert!(matches!(
            tape.expect_tag(4, "take"),
            Err(Error::CorruptedCheckpoint(_))
        ));
    }

    #[test]
    fn test_byte_stream_round_trip() {
        let mut tape = Tape::new();

        tape.write_size(11);
        tape.write(Data::List(vec![Data::Int(1), Data::from("x")]));

        let bytes = tape.to_bytes().unwrap();
        let mut restored = Tape::from_bytes(&bytes).unwrap();

        assert_eq!(restored.read_size().unwrap(), 11);
        assert_eq!(
            restored.read().unwrap(),
            Data::List(vec![Data::Int(1), Data::from("x")])
        );
    }
}
