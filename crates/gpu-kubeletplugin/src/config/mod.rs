pub mod cli;
pub mod discovery;
pub mod run;

pub use cli::*;
pub use discovery::*;
pub use run::*;
