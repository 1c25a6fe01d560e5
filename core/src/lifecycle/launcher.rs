use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use lbmatch_external_marketplace::Marketplace;
use lbmatch_storage::postgres_db::migrator::apply_migrations;
use lbmatch_storage::postgres_db::pool::create_pool;
use lbmatch_utils::infrastructure::{init_infrastructure, SpawnFutureFlags};
use lbmatch_utils::logger::print_info;
use tokio::signal;
use tokio::sync::oneshot;

use crate::config::try_load_settings;
use crate::infrastructure::{init_lifetime_manager, spawn_future_ok};
use crate::lifecycle::app_lifetime_manager::{ActionAfterGracefulShutdown, AppLifetimeManager};
use crate::lifecycle::engine::{App, AppContext};
use crate::settings::AppSettings;

pub(crate) fn unwrap_or_handle_panic<T>(
    action_outcome: Result<T, Box<dyn Any + Send>>,
    message_template: &'static str,
    lifetime_manager: Option<Arc<AppLifetimeManager>>,
) -> Result<T> {
    action_outcome.map_err(|err| {
        if let Some(lifetime_manager) = lifetime_manager {
            lifetime_manager.spawn_graceful_shutdown("Panic during App creation");
        }

        enum ErrorMessage {
            String(String),
            ConstStr(&'static str),
            // Unable convert panic message to readable string
            None,
        }
        impl Display for ErrorMessage {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                match self {
                    ErrorMessage::String(ref str) => f.write_str(str),
                    ErrorMessage::ConstStr(str) => f.write_str(str),
                    ErrorMessage::None => f.write_str("Unable convert error to readable message"),
                }
            }
        }

        struct FullError(&'static str, ErrorMessage);
        impl Debug for FullError {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}: {}", self.0, self.1)
            }
        }

        impl Display for FullError {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{self:?}")
            }
        }

        let error_msg = match err.downcast::<String>() {
            Ok(msg) => ErrorMessage::String(*msg),
            Err(err) => match err.downcast::<&'static str>() {
                Ok(msg) => ErrorMessage::ConstStr(*msg),
                Err(_) => ErrorMessage::None,
            },
        };

        let full_error = FullError(message_template, error_msg);

        log::error!("{full_error}");

        anyhow!(full_error)
    })
}

/// Loads settings, applies db migrations, opens the connection pool and
/// wires up the [`AppContext`]. `marketplace` is injected by the caller so
/// tests can pass in a mock (see `lbmatch_external_marketplace::MockMarketplace`).
pub async fn launch_app(
    config_path: &str,
    credentials_path: &str,
    marketplace: Arc<dyn Marketplace>,
) -> Result<App> {
    init_infrastructure("log.txt");

    print_info("The app is going to start...");

    let action_outcome = AssertUnwindSafe(before_app_context_init(
        config_path,
        credentials_path,
        marketplace,
    ))
    .catch_unwind()
    .await;

    let message_template = "Panic happened during AppContext initialization";
    let (app_context, finish_graceful_shutdown_rx) =
        unwrap_or_handle_panic(action_outcome, message_template, None)??;

    let cloned_lifetime_manager = app_context.lifetime_manager.clone();
    let ctrl_c = async move {
        signal::ctrl_c().await.expect("failed to listen for event");

        print_info("Ctrl-C signal was received so graceful_shutdown will be started");
        cloned_lifetime_manager.spawn_graceful_shutdown("Ctrl-C signal was received");
    };

    let _ = spawn_future_ok(
        "Start Ctrl-C handler",
        SpawnFutureFlags::STOP_BY_TOKEN | SpawnFutureFlags::DENY_CANCELLATION,
        ctrl_c,
    );

    print_info("The app has been successfully launched");

    Ok(App::new(app_context, finish_graceful_shutdown_rx))
}

async fn before_app_context_init(
    config_path: &str,
    credentials_path: &str,
    marketplace: Arc<dyn Marketplace>,
) -> Result<(Arc<AppContext>, oneshot::Receiver<ActionAfterGracefulShutdown>)> {
    let lifetime_manager = init_lifetime_manager();

    let settings: AppSettings = try_load_settings(config_path, credentials_path)?;

    apply_migrations(
        &settings.core.database.url,
        settings.core.database.migrations.clone(),
    )
    .await
    .context("unable to apply db migrations")?;

    let pool = create_pool(
        &settings.core.database.url,
        settings.core.database.max_connections,
    )
    .await
    .with_context(|| {
        format!(
            "from `launcher` with connection string: {}",
            &settings.core.database.url
        )
    })?;

    let (finish_graceful_shutdown_tx, finish_graceful_shutdown_rx) = oneshot::channel();

    let app_context = AppContext::new(
        settings.core,
        pool,
        marketplace,
        finish_graceful_shutdown_tx,
        lifetime_manager,
    );

    Ok((app_context, finish_graceful_shutdown_rx))
}
