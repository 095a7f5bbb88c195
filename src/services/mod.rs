pub mod broker;
pub mod classifier;
pub mod queue;
pub mod resources;
pub mod vision;
pub mod worker;
