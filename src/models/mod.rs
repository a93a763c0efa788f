pub mod api;
pub mod event;
pub mod feedback;
pub mod image;
pub mod workflow;
