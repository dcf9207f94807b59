//! Bridge tracing warn/error records onto the game's warnings topic.
//!
//! A small tracing [`Layer`] forwards qualifying events to a global sink
//! when one is set; a publisher task drains the sink onto the bus. The
//! layer no-ops until [`set_sink`] is called.

use std::fmt::Write as _;
use std::sync::{Mutex, OnceLock};

use tokio::sync::mpsc::UnboundedSender;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// One log record headed for the warnings topic.
#[derive(Debug, Clone)]
pub struct BridgedLog {
    pub level: &'static str,
    pub target: String,
    pub message: String,
}

static SINK: OnceLock<Mutex<Option<UnboundedSender<BridgedLog>>>> = OnceLock::new();

fn sink() -> &'static Mutex<Option<UnboundedSender<BridgedLog>>> {
    SINK.get_or_init(|| Mutex::new(None))
}

/// Set the forwarding sink once the bus is up.
pub fn set_sink(tx: UnboundedSender<BridgedLog>) {
    let mut guard = sink().lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(tx);
}

/// Clear the sink during shutdown.
pub fn clear_sink() {
    let mut guard = sink().lock().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}

/// Tracing layer that forwards warn/error events to the sink.
pub struct WarningBridgeLayer;

impl<S> Layer<S> for WarningBridgeLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }
        let target = event.metadata().target();
        // Engine warnings already land on the topic via ExecCtx::warn; the
        // publisher itself must never feed back into the bridge.
        if target.starts_with("showrunner_engine::ctx") || target.starts_with("showrunner_server::bridge")
        {
            return;
        }

        let tx = {
            let guard = sink().lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let Some(tx) = tx else { return };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let _ = tx.send(BridgedLog {
            level: if level == Level::ERROR { "error" } else { "warn" },
            target: target.to_string(),
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn warn_events_reach_the_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        set_sink(tx);

        let subscriber = tracing_subscriber::registry().with(WarningBridgeLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("projector offline");
            tracing::info!("this stays local");
        });

        let log = rx.recv().await.unwrap();
        assert_eq!(log.level, "warn");
        assert!(log.message.contains("projector offline"));
        assert!(rx.try_recv().is_err(), "info must not be bridged");
        clear_sink();
    }

    #[tokio::test]
    async fn errors_are_marked_as_such() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        set_sink(tx);

        let subscriber = tracing_subscriber::registry().with(WarningBridgeLayer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("device gone");
        });

        let log = rx.recv().await.unwrap();
        assert_eq!(log.level, "error");
        clear_sink();
    }
}
