//! Process entry point (§1, §9): loads settings, runs migrations, opens the
//! db pool, and wires every long-running worker into the shutdown sequence.
//! Grounded on the teacher's `core/src/bin/*.rs` + `lifecycle::launcher::launch_app`
//! pattern — `launch_app` does everything up through `AppContext`, this file
//! is responsible for starting the workers that context's settings describe.

use std::sync::Arc;

use lbmatch_core::config::{CONFIG_PATH, CREDENTIALS_PATH};
use lbmatch_core::lifecycle::launcher::launch_app;
use lbmatch_core::manager;
use lbmatch_core::rate_cache::{self, RateCache};
use lbmatch_core::reconciliation;
use lbmatch_core::rpc::control_rpc_impl::ControlRpcImpl;
use lbmatch_core::rpc::event_bus::{spawn_notification_audit_log, BroadcastEventBus};
use lbmatch_core::rpc::order_rpc_impl::OrderRpcImpl;
use lbmatch_core::rpc::server::RpcService;
use lbmatch_external_marketplace::HttpMarketplaceClient;
use lbmatch_rpc::control_rpc::IPC_ADDRESS;

#[tokio::main]
async fn main() {
    let marketplace = Arc::new(HttpMarketplaceClient::new());

    let app = launch_app(CONFIG_PATH, CREDENTIALS_PATH, marketplace)
        .await
        .expect("failed to launch app");
    let context = app.context();

    let event_bus = Arc::new(BroadcastEventBus::default());
    spawn_notification_audit_log(event_bus.clone());
    let stop_token = context.lifetime_manager.stop_token();

    let (manager_handle, manager_service) = manager::spawn(
        context.db_pool.clone(),
        event_bus.clone(),
        context.settings.order_timeouts.clone(),
        stop_token.clone(),
    );
    context.shutdown_service.register_user_service(manager_service);

    let reconciliation_service = reconciliation::spawn(
        context.db_pool.clone(),
        context.marketplace.clone(),
        manager_handle.clone(),
        event_bus.clone(),
        context.settings.wallet.clone(),
        context.settings.deposit_reconciliation.clone(),
        stop_token.clone(),
    );
    context
        .shutdown_service
        .register_user_service(reconciliation_service);

    let rate_cache = RateCache::new(context.marketplace.clone(), &context.settings.rate_cache);
    let rate_cache_service = rate_cache::spawn(rate_cache.clone(), context.settings.rate_cache.clone(), stop_token);
    context.shutdown_service.register_user_service(rate_cache_service);

    let order_rpc = OrderRpcImpl::new(
        context.db_pool.clone(),
        context.marketplace.clone(),
        manager_handle,
        rate_cache,
        event_bus,
        context.settings.wallet.clone(),
        tokio::runtime::Handle::current(),
    );
    let control_rpc = ControlRpcImpl::new(context.clone());

    let ipc_address = context
        .settings
        .ipc_address
        .clone()
        .unwrap_or_else(|| IPC_ADDRESS.to_owned());
    let rpc_service =
        RpcService::start(&ipc_address, order_rpc, control_rpc).expect("failed to start RPC server");
    context.shutdown_service.register_user_service(rpc_service);

    app.run().await;
}
