pub mod heartbeat;
pub mod lookup;
pub mod peers;
