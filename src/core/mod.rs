pub mod avatar;
pub mod capture;
pub mod codec;
pub mod network;
pub mod orchestrator;
pub mod session;
