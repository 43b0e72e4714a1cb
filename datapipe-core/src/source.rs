//! The pull contract shared by every pipeline operator

use crate::data::Data;
use crate::error::Result;
use crate::tape::Tape;

/// A lazy producer of records.
///
/// Every operator in a pipeline chain implements this capability set, so a
/// chain is a stack of boxed sources each pulling from its upstream.
/// Sources are single-owner and are driven by one thread at a time; the
/// concurrent operators serialise access to their upstream internally.
pub trait DataSource: Send {
    /// Pulls the next record. `None` means end of stream.
    fn next(&mut self) -> Result<Option<Data>>;

    /// Rewinds the source to the start of the stream.
    fn reset(&mut self) -> Result<()>;

    /// Writes the source's resumption state to the tape.
    fn record_position(&mut self, tape: &mut Tape) -> Result<()>;

    /// Restores the source's resumption state from the tape.
    fn reload_position(&mut self, tape: &mut Tape) -> Result<()>;
}
