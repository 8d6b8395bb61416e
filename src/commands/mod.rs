pub mod case;
pub mod classify;
pub mod process;
pub mod search;
pub mod status;
