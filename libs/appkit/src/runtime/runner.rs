//! Process-level driver: open the application, wait for a stop request, close it.

use appkit_bootstrap::wait_for_shutdown;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Application;

/// What ends the serving phase.
pub enum ShutdownOptions {
    /// Ctrl+C or SIGTERM.
    Signals,
    /// An external token; cancelling it stops the application.
    Token(CancellationToken),
    /// Any future; its completion stops the application.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

pub struct RunOptions {
    pub shutdown: ShutdownOptions,
    /// Upper bound for the whole close sequence. `None` waits for it to finish.
    pub close_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            shutdown: ShutdownOptions::Signals,
            close_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// open → wait → close. An open failure is returned as is; the application rolled itself back.
pub async fn run(app: &mut Application, opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = wait_for_shutdown().await {
                    tracing::warn!(error = %e, "shutdown: signal waiter failed; falling back to ctrl_c()");
                    let _ = tokio::signal::ctrl_c().await;
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    app.open().await?;
    cancel.cancelled().await;

    let closing = app.close();
    match opts.close_timeout {
        Some(limit) => match tokio::time::timeout(limit, closing).await {
            Ok(res) => res?,
            Err(_) => anyhow::bail!("application did not close within {limit:?}"),
        },
        None => closing.await?,
    }
    Ok(())
}
