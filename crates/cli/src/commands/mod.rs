pub mod config_cmd;
pub mod daemon;
pub mod doctor;
pub mod simulate;
pub mod status;
