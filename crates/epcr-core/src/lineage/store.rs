//! Load/save interface for record persistence.

use super::{Record, Report};

/// Persistence behind the engine. Saving a report is atomic: either every
/// record of the report version is stored or none is.
pub trait RecordStore {
    type Error: std::error::Error;

    /// Load one record version by physical id.
    fn load(&self, id: &str) -> Result<Option<Record>, Self::Error>;

    /// Store one record version.
    fn save(&self, record: &Record) -> Result<(), Self::Error>;

    /// Store a report version and all of its sections.
    fn save_report(&self, report: &Report) -> Result<(), Self::Error>;

    /// Load a report version by the physical id of its report record.
    fn load_report(&self, id: &str) -> Result<Option<Report>, Self::Error>;
}
