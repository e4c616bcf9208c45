use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use ws_listener::{ConnectionManager, Event, Subscription};

use crate::config::ListenerArgs;
use crate::error::ListenerResult;
use crate::handler::{LogHandler, SignalHandler, WebhookHandler};

/// How long in-flight handlers may run after a shutdown signal.
const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Clean shutdown requested.
    Shutdown,
    Fail,
}

/// Connect and react to events until a shutdown signal or a fatal event.
pub async fn run(args: ListenerArgs) -> ListenerResult<ExitCode> {
    let config = args.listener_config()?;
    let handler: Arc<dyn SignalHandler> = match &args.webhook_url {
        Some(url) => Arc::new(WebhookHandler::new(url.clone(), args.webhook_timeout())?),
        None => Arc::new(LogHandler),
    };
    info!(
        url = %config.url,
        handler = handler.name(),
        max_attempts = config.reconnect.max_attempts,
        "Starting listener"
    );

    let manager = ConnectionManager::new(config)?;
    let mut events = manager.subscribe();
    manager.connect().await?;

    let mut tasks = JoinSet::new();
    let code = supervise(&manager, &mut events, &handler, &mut tasks).await;
    drain(&mut tasks).await;
    Ok(code)
}

async fn supervise(
    manager: &ConnectionManager,
    events: &mut Subscription,
    handler: &Arc<dyn SignalHandler>,
    tasks: &mut JoinSet<()>,
) -> ExitCode {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    loop {
        let flow = tokio::select! {
            _ = recv_signal(&mut sigint) => {
                info!("received SIGINT, shutting down");
                Flow::Shutdown
            }
            _ = recv_signal(&mut sigterm) => {
                info!("received SIGTERM, shutting down");
                Flow::Shutdown
            }
            Some(result) = tasks.join_next() => match result {
                Err(e) if e.is_panic() => {
                    error!(error = %e, "signal handler panicked");
                    Flow::Fail
                }
                _ => Flow::Continue,
            },
            event = events.next() => match event {
                Some(event) => handle_event(event, handler, tasks),
                None => {
                    error!("event stream ended unexpectedly");
                    Flow::Fail
                }
            },
        };

        let code = match flow {
            Flow::Continue => continue,
            Flow::Shutdown => ExitCode::SUCCESS,
            Flow::Fail => ExitCode::FAILURE,
        };
        manager.terminate().await;
        return code;
    }
}

fn handle_event(event: Event, handler: &Arc<dyn SignalHandler>, tasks: &mut JoinSet<()>) -> Flow {
    match event {
        Event::Connected => info!("Connected and ready"),
        Event::Disconnected { cause } => warn!(%cause, "Disconnected"),
        Event::Error { error } => error!(error = %error, "Connection error"),
        Event::Message { message, .. } => {
            debug!(kind = %message.kind, text = %message.message, "Message received");
        }
        Event::SignalReceived => {
            let handler = Arc::clone(handler);
            let received_at = chrono::Utc::now();
            tasks.spawn(async move {
                if let Err(e) = handler.on_signal(received_at).await {
                    error!(handler = handler.name(), error = %e, "Failed to handle signal");
                }
            });
        }
        Event::MaxRetriesReached { attempts } => {
            error!(attempts, "Failed to connect after maximum retries");
            return Flow::Fail;
        }
        Event::Terminated => info!("Listener terminated"),
    }
    Flow::Continue
}

/// Give in-flight handlers a bounded window to finish.
async fn drain(tasks: &mut JoinSet<()>) {
    if tasks.is_empty() {
        return;
    }
    info!(pending = tasks.len(), "Waiting for in-flight handlers");
    let wait = async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "signal handler failed during drain");
            }
        }
    };
    if tokio::time::timeout(HANDLER_DRAIN_TIMEOUT, wait).await.is_err() {
        warn!(pending = tasks.len(), "Abandoning in-flight handlers");
        tasks.abort_all();
    }
}

async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use ws_listener::{DisconnectCause, ProtocolMessage};

    use super::*;
    use crate::error::ListenerError;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SignalHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_signal(&self, _received_at: DateTime<Utc>) -> ListenerResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ListenerError::Webhook("boom".into()));
            }
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl SignalHandler for PanickingHandler {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn on_signal(&self, _received_at: DateTime<Utc>) -> ListenerResult<()> {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn each_signal_runs_handler_once() {
        let counting = Arc::new(CountingHandler::default());
        let handler: Arc<dyn SignalHandler> = counting.clone();
        let mut tasks = JoinSet::new();

        for _ in 0..3 {
            assert_eq!(
                handle_event(Event::SignalReceived, &handler, &mut tasks),
                Flow::Continue
            );
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn handler_error_is_swallowed() {
        let counting = Arc::new(CountingHandler {
            fail: true,
            ..Default::default()
        });
        let handler: Arc<dyn SignalHandler> = counting.clone();
        let mut tasks = JoinSet::new();

        handle_event(Event::SignalReceived, &handler, &mut tasks);
        let result = tasks.join_next().await.unwrap();
        assert!(result.is_ok());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_panic_surfaces_as_join_error() {
        let handler: Arc<dyn SignalHandler> = Arc::new(PanickingHandler);
        let mut tasks = JoinSet::new();

        handle_event(Event::SignalReceived, &handler, &mut tasks);
        let err = tasks.join_next().await.unwrap().unwrap_err();
        assert!(err.is_panic());
    }

    #[tokio::test]
    async fn max_retries_exits_with_failure() {
        let handler: Arc<dyn SignalHandler> = Arc::new(LogHandler);
        let mut tasks = JoinSet::new();
        assert_eq!(
            handle_event(Event::MaxRetriesReached { attempts: 5 }, &handler, &mut tasks),
            Flow::Fail
        );
    }

    #[tokio::test]
    async fn lifecycle_events_continue() {
        let handler: Arc<dyn SignalHandler> = Arc::new(LogHandler);
        let mut tasks = JoinSet::new();
        let events = [
            Event::Connected,
            Event::Disconnected {
                cause: DisconnectCause::HeartbeatTimeout,
            },
            Event::Error {
                error: Arc::new(ws_listener::Error::NotConnected),
            },
            Event::Message {
                message: ProtocolMessage::signal(),
                raw: String::new(),
            },
            Event::Terminated,
        ];
        for event in events {
            assert_eq!(handle_event(event, &handler, &mut tasks), Flow::Continue);
        }
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn drain_waits_for_pending_handlers() {
        let counting = Arc::new(CountingHandler::default());
        let handler: Arc<dyn SignalHandler> = counting.clone();
        let mut tasks = JoinSet::new();

        handle_event(Event::SignalReceived, &handler, &mut tasks);
        drain(&mut tasks).await;
        assert!(tasks.is_empty());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
