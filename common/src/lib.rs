pub mod log_setup;
pub mod slot;

pub use slot::Slot;
