//! JSON-RPC IPC server plumbing (§6, §9), grounded on the teacher's
//! `core/src/rpc/common.rs` + `core_api.rs`: build a `MetaIoHandler` from the
//! `#[rpc]` trait impls, start a Unix-socket server, and wrap start/stop as a
//! [`Service`] the shutdown sequence drains like everything else.

use std::sync::Arc;

use anyhow::{Context, Result};
use jsonrpc_core::MetaIoHandler;
use jsonrpc_ipc_server::{Server, ServerBuilder};
use lbmatch_rpc::control_rpc::ControlRpc;
use lbmatch_rpc::order_rpc::OrderRpc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::lifecycle::engine::Service;

fn build_io(order_rpc: impl OrderRpc, control_rpc: impl ControlRpc) -> MetaIoHandler<()> {
    let mut io = MetaIoHandler::<()>::default();
    io.extend_with(order_rpc.to_delegate());
    io.extend_with(control_rpc.to_delegate());
    io
}

pub struct RpcService {
    server_stopper_tx: Mutex<Option<mpsc::Sender<()>>>,
    work_finished_receiver: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl RpcService {
    pub fn start(
        address: &str,
        order_rpc: impl OrderRpc,
        control_rpc: impl ControlRpc,
    ) -> Result<Arc<Self>> {
        let io = build_io(order_rpc, control_rpc);
        let builder = ServerBuilder::new(io);
        let server = builder
            .start(address)
            .with_context(|| format!("couldn't open IPC socket at {address}"))?;

        let (server_stopper_tx, server_stopper_rx) = mpsc::channel::<()>(1);
        let (work_finished_sender, work_finished_receiver) = oneshot::channel();

        spawn_server_stopping_action(server, work_finished_sender, server_stopper_rx);

        log::info!("RPC server listening on {address}");

        Ok(Arc::new(Self {
            server_stopper_tx: Mutex::new(Some(server_stopper_tx)),
            work_finished_receiver: Mutex::new(Some(work_finished_receiver)),
        }))
    }
}

fn spawn_server_stopping_action(
    server: Server,
    work_finished_sender: oneshot::Sender<Result<()>>,
    mut server_stopper_rx: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        if server_stopper_rx.recv().await.is_none() {
            log::error!("RPC server stop channel dropped without a signal");
        }

        tokio::task::spawn_blocking(move || {
            server.close();
            if work_finished_sender.send(Ok(())).is_err() {
                log::warn!("unable to send notification that the RPC server stopped");
            }
        });
    });
}

impl Service for RpcService {
    fn name(&self) -> &str {
        "RpcServer"
    }

    fn graceful_shutdown(self: Arc<Self>) -> Option<oneshot::Receiver<Result<()>>> {
        if let Some(sender) = self.server_stopper_tx.lock().take() {
            if let Err(err) = sender.try_send(()) {
                log::error!("failed to signal RPC server to stop: {err:?}");
                return None;
            }
        }
        self.work_finished_receiver.lock().take()
    }
}
