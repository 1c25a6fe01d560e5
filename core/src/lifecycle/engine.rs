use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use futures::future::FutureExt;
use lbmatch_external_marketplace::Marketplace;
use lbmatch_storage::PgPool;
use lbmatch_utils::cancellation_token::CancellationToken;
use lbmatch_utils::logger::print_info;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;

use crate::infrastructure::unset_lifetime_manager;
use crate::lifecycle::app_lifetime_manager::{ActionAfterGracefulShutdown, AppLifetimeManager};
use crate::lifecycle::launcher::unwrap_or_handle_panic;
use crate::lifecycle::shutdown::ShutdownService;
use crate::settings::CoreSettings;

/// Implemented by every long-running worker the app starts (the order
/// manager, per-chat sessions, the deposit reconciliation loop, the rate
/// cache refresher, the RPC server) so [`ShutdownService`] can drain them
/// generically during a graceful shutdown.
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Returns `Some(oneshot::Receiver)` that resolves when the service has
    /// finished shutting down, or `None` if there is nothing to wait for.
    fn graceful_shutdown(self: Arc<Self>) -> Option<oneshot::Receiver<Result<()>>>;
}

/// Everything the app's workers need a handle to: the settings, the db pool,
/// the external marketplace client and the shutdown/lifetime machinery.
pub struct AppContext {
    pub settings: CoreSettings,
    pub db_pool: PgPool,
    pub marketplace: Arc<dyn Marketplace>,
    pub shutdown_service: Arc<ShutdownService>,
    pub lifetime_manager: Arc<AppLifetimeManager>,
    is_graceful_shutdown_started: AtomicBool,
    finish_graceful_shutdown_sender: Mutex<Option<oneshot::Sender<ActionAfterGracefulShutdown>>>,
}

impl AppContext {
    pub(crate) fn new(
        settings: CoreSettings,
        db_pool: PgPool,
        marketplace: Arc<dyn Marketplace>,
        finish_graceful_shutdown_sender: oneshot::Sender<ActionAfterGracefulShutdown>,
        lifetime_manager: Arc<AppLifetimeManager>,
    ) -> Arc<Self> {
        let context = Arc::new(AppContext {
            settings,
            db_pool,
            marketplace,
            shutdown_service: Default::default(),
            lifetime_manager: lifetime_manager.clone(),
            is_graceful_shutdown_started: Default::default(),
            finish_graceful_shutdown_sender: Mutex::new(Some(finish_graceful_shutdown_sender)),
        });

        lifetime_manager.setup_app_context(context.clone());

        context
    }

    pub(crate) async fn graceful(
        self: Arc<Self>,
        action: ActionAfterGracefulShutdown,
        futures_cancellation_token: CancellationToken,
    ) {
        if self
            .is_graceful_shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        print_info("Graceful shutdown started");

        self.lifetime_manager.stop_token().cancel();

        self.shutdown_service.user_lvl_shutdown().await;
        self.shutdown_service.core_lvl_shutdown().await;

        self.finish_graceful_shutdown_sender
            .lock()
            .take()
            .expect("'finish_graceful_shutdown_sender' should exist in AppContext")
            .send(action)
            .unwrap_or_else(|_| log::error!("Failed to send graceful shutdown action"));

        if let ActionAfterGracefulShutdown::Restart = action {
            futures_cancellation_token.cancel();
        }

        unset_lifetime_manager();

        print_info("Graceful shutdown finished");
    }
}

/// The running application: its [`AppContext`] plus the channel that
/// resolves once a graceful shutdown has completed.
pub struct App {
    context: Arc<AppContext>,
    finished_graceful_shutdown: oneshot::Receiver<ActionAfterGracefulShutdown>,
}

impl App {
    pub fn new(
        context: Arc<AppContext>,
        finished_graceful_shutdown: oneshot::Receiver<ActionAfterGracefulShutdown>,
    ) -> Self {
        App {
            context,
            finished_graceful_shutdown,
        }
    }

    pub fn context(&self) -> Arc<AppContext> {
        self.context.clone()
    }

    pub async fn run(self) -> ActionAfterGracefulShutdown {
        let action_outcome = AssertUnwindSafe(self.finished_graceful_shutdown)
            .catch_unwind()
            .await;

        unwrap_or_handle_panic(
            action_outcome,
            "Panic happened while App was running",
            Some(self.context.lifetime_manager.clone()),
        )
        .expect("unwrap_or_handle_panic returned error")
        .expect("Failed to receive message from finished_graceful_shutdown")
    }
}
