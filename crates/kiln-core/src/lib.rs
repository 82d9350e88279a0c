pub mod compiler;
pub mod deps;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod formula;
#[cfg(feature = "parsing")]
pub mod loader;
pub mod options;
pub mod patch;
pub mod paths;
pub mod selector;
pub mod session;
pub mod spec;

pub mod reporter;

pub use error::{BuildError, Result};
pub use exec::{BuildSnapshot, Executor, Snapshot};
pub use fetch::{Fetcher, LocalFetcher};
pub use formula::{Formula, FormulaDefinition, Formulary};
pub use reporter::{NullReporter, RecordingReporter, Reporter};
pub use selector::{BottleInstallability, BuildMode, PlatformBottlePolicy};
pub use session::{BuildContext, BuildSession, BuildStep, TestContext};
pub use spec::SpecKind;
