pub mod attendance;
pub mod classes;
pub mod core;
