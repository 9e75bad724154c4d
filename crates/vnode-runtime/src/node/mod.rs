mod controller;
mod lease;
mod status;
mod timer;


pub use controller::{ErrorHandler, LeaseMode, NodeController, NodeControllerOptions};
