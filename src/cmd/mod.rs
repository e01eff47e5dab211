//! One handler per CLI subcommand. Handlers stay thin: argument
//! shuffling, wiring, and output; the semantics live in the library
//! modules.

pub mod audit;
pub mod doctor;
pub mod gc;
pub mod intervene;
pub mod orchestrate;
pub mod report;
pub mod resume;
pub mod run;
pub mod submit;
