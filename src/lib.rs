pub mod clock;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod measurement;
pub mod network;
pub mod session_management;

pub use controller::controller_handler::ConnectivityController;
pub use session_management::public_result::PublicResult;
pub use session_management::SessionStatus;
