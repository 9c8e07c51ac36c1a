pub mod case;
pub mod config;
pub mod diff;
pub mod error;
pub mod interrupt;
pub mod loader;
pub mod marking;
pub mod marks;
pub mod options;
pub mod process;
pub mod report;
pub mod result;
pub mod runner;
pub mod signal;
pub mod style;
pub mod suite;

pub use crate::case::{Proc, TestCase};
pub use crate::config::MarksConfig;
pub use crate::error::{CaseError, CaseResult};
pub use crate::interrupt::Interrupt;
pub use crate::loader::{Loader, Registry};
pub use crate::marks::Marks;
pub use crate::options::{CleanupPolicy, Mode, Options};
pub use crate::process::Stream;
pub use crate::result::{Outcome, ResultDocument, TestResult};
pub use crate::runner::Runner;
pub use crate::suite::{Fixture, TestClass, TestMethod, TestModule, TestSuite};
