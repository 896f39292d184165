// Construction Tester Library
// Builds signed transfers against a construction API through a chain helper

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![allow(clippy::uninlined_format_args)]

extern crate log;

pub mod config;
pub mod error;
pub mod helper;
pub mod keys;
pub mod scenario;
pub mod types;

// Sender discovery, scenario generation and the construction pipeline
pub mod constructor;

// Clock and seeded randomness injected into the constructor
pub mod orchestrator;

// Local ledger implementing the helper, used for dry runs and tests
pub mod memory;

pub use config::{AccountingModel, ConstructionConfig};
pub use constructor::{Action, ConstructedTransaction, Constructor, Recipients, Sender};
pub use error::{ConstructorError, ConstructorResult, Step};
pub use helper::{ConstructorHandler, ConstructorHelper, ParsedTransaction};
pub use memory::InMemoryHelper;
