pub mod config;
pub mod protocol;
pub mod retarget;
pub mod rig;
pub mod stream;
