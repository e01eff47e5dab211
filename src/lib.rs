pub mod cmd;
pub mod config;
pub mod gitx;
pub mod intervene;
pub mod orchestrate;
pub mod report;
pub mod resume;
pub mod scope;
pub mod stop;
pub mod store;
pub mod supervisor;
pub mod task;
pub mod util;
pub mod verify;
pub mod worker;
