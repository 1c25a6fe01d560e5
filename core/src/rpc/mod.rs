pub mod control_rpc_impl;
pub mod event_bus;
pub mod order_rpc_impl;
pub mod server;
