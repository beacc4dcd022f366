//! 团队协作：角色、协调器与团队

pub mod coordinator;
pub mod role;
#[allow(clippy::module_inception)]
pub mod team;

pub use coordinator::*;
pub use role::*;
pub use team::*;
