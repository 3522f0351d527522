pub mod control;
pub mod dispatch;
pub mod status;

pub use control::ControlPlane;
