pub mod control_rpc;
pub mod order_rpc;
