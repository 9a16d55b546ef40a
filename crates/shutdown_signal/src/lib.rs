use std::future::Future;
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            let (Ok(mut ctrl_c), Ok(mut ctrl_close), Ok(mut ctrl_shutdown)) =
                (ctrl_c(), ctrl_close(), ctrl_shutdown())
            else {
                warn!("Failed to attach console shutdown handlers");
                return std::future::pending().await;
            };
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            match signal(signal_kind) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    warn!(?signal_kind, %error, "Failed to listen to unix signal");
                    std::future::pending::<()>().await;
                }
            }
        }

        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// Resolves once the process is asked to stop. Can be awaited from many places.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

pub fn shutdown_signal() -> ShutdownSignal {
    async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected. Stopping workers...");
    }
    .boxed()
    .shared()
}

/// Returns a token cancelled when `signal` resolves.
///
/// Must be called from within a tokio runtime.
pub fn cancel_on<F>(signal: F) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        select! {
            _ = signal => child.cancel(),
            _ = child.cancelled() => (),
        }
    });
    token
}
