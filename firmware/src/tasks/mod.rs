pub mod current_sense;
pub mod i2c_secondary;
pub mod indicator;
pub mod state_machine;
