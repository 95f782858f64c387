pub mod command_processor;
pub mod intake_processor;
