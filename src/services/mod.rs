pub mod classifier;
pub mod events;
pub mod feedback;
pub mod intake;
pub mod quality;
pub mod reflection;
pub mod workflow;
