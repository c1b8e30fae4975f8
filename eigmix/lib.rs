#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod accumulate;
pub mod analysis;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod eigen;
pub mod normalize;
pub mod output;
pub mod plink;
pub mod progress;
pub mod source;
pub mod types;

pub use accumulate::{AccumulationEngine, EngineError};
pub use analysis::{AnalysisError, EigMixResult, RunSummary, relationship_matrix, run_eigmix};
pub use config::{ConfigError, EigMixConfig};
pub use eigen::{EigenError, EigenMethod, EigenSolver, Eigenpairs, FaerEigenSolver, PackedUpperTriangle};
pub use normalize::normalize;
pub use plink::{PlinkBedSource, PlinkError, SampleId};
pub use source::{GenotypeBlockSource, InMemoryGenotypes, SourceError};
