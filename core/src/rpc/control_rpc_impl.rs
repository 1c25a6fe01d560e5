//! `ControlRpc` implementation (§5): the local IPC control-panel surface,
//! distinct from the order/operator surface in [`super::order_rpc_impl`].

use std::sync::Arc;
use std::time::Instant;

use jsonrpc_core::{Params, Result as RpcResult, Value};
use lbmatch_rpc::control_rpc::{server_side_error, ControlRpc, ErrorCode};

use crate::config::{save_settings, CONFIG_PATH};
use crate::lifecycle::app_lifetime_manager::ActionAfterGracefulShutdown;
use crate::lifecycle::engine::AppContext;

pub struct ControlRpcImpl {
    context: Arc<AppContext>,
    started_at: Instant,
}

impl ControlRpcImpl {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            started_at: Instant::now(),
        }
    }
}

impl ControlRpc for ControlRpcImpl {
    fn health(&self) -> RpcResult<Value> {
        Ok(Value::String("ok".into()))
    }

    fn stop(&self) -> RpcResult<Value> {
        match self
            .context
            .lifetime_manager
            .spawn_graceful_shutdown("stop signal from control RPC")
        {
            Some(_) => Ok(Value::String("shutdown started".into())),
            None => Err(server_side_error(ErrorCode::StopperIsNone)),
        }
    }

    fn get_config(&self) -> RpcResult<Value> {
        serde_json::to_value(&self.context.settings).map_err(|err| {
            log::error!("get_config: failed to serialize settings: {err:#}");
            server_side_error(ErrorCode::FailedToSaveNewConfig)
        })
    }

    /// Persists the new settings, then restarts so the process picks them up
    /// on the next boot; the RPC caller gets the acknowledgement before the
    /// restart actually runs.
    fn set_config(&self, params: Params) -> RpcResult<Value> {
        let (settings,): (String,) = params.parse().map_err(|err| {
            log::warn!("set_config: malformed params: {err:#}");
            server_side_error(ErrorCode::FailedToSaveNewConfig)
        })?;

        save_settings(&settings, CONFIG_PATH).map_err(|err| {
            log::warn!("set_config: failed to save new config: {err:#}");
            server_side_error(ErrorCode::FailedToSaveNewConfig)
        })?;

        match self.context.lifetime_manager.spawn_graceful_shutdown_with_action(
            "config updated over control RPC",
            ActionAfterGracefulShutdown::Restart,
        ) {
            Some(_) => Ok(Value::String("config saved, engine will restart".into())),
            None => Err(server_side_error(ErrorCode::UnableToSendSignal)),
        }
    }

    fn stats(&self) -> RpcResult<Value> {
        Ok(serde_json::json!({
            "uptime_secs": self.started_at.elapsed().as_secs(),
        }))
    }
}
