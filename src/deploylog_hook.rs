//! Deployment Log Hook (§4.12): a `tracing_subscriber::Layer` that forwards
//! every log record to the Deployment Log Manager while a deployment is in
//! progress, no-op when disabled. Mirrors the teacher's `LogSender`
//! (`enabled()` gated on "is there a server/target set", `log()` forwards
//! the record) with the remote target replaced by the local log file.

use std::sync::Arc;

use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, Layer};

use crate::deploylog::{DeploymentLogManager, LogLine};

pub struct DeploymentLogHook {
    manager: Arc<DeploymentLogManager>,
}

impl DeploymentLogHook {
    pub fn new(manager: Arc<DeploymentLogManager>) -> Self {
        DeploymentLogHook { manager }
    }
}

impl<S: Subscriber> Layer<S> for DeploymentLogHook {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        let line = LogLine {
            time: now_rfc3339(),
            level: event.metadata().level().to_string(),
            message,
        };
        let _ = self.manager.write_line(&line);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write;
            let _ = write!(self.0, "{value:?}");
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn hook_forwards_events_to_the_manager() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(DeploymentLogManager::new(dir.path()));
        manager.enable("dep-1").unwrap();

        let hook = DeploymentLogHook::new(manager.clone());
        let subscriber = tracing_subscriber::registry().with(hook);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from the hook");
        });

        let lines = manager.get_logs("dep-1").unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].message.contains("hello from the hook"));
    }

    #[test]
    fn hook_is_silent_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(DeploymentLogManager::new(dir.path()));

        let hook = DeploymentLogHook::new(manager.clone());
        let subscriber = tracing_subscriber::registry().with(hook);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("nobody is listening");
        });

        assert!(manager.get_logs("dep-1").unwrap().is_empty());
    }
}
