pub mod death;
pub mod redrive;
pub mod status;
