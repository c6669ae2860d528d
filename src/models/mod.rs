pub mod artifact;
pub mod cell;
pub mod loaders;
pub mod matrix;

pub use artifact::{
    ComparisonArtifact, EntryOutcome, GroupStats, RatingRecord, RecordingFile, WebsiteEntry,
};
pub use cell::{CellGroup, CellKey, CellStatus, EvaluationCell, GroupKey, RawResult, StayDates};
pub use loaders::{load_matrix_definition, parse_matrix_definition};
pub use matrix::{MatrixDefinition, RunOptions, ValidatedMatrix};
