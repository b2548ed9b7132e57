//! The compilation event stream and its synchronous dispatch bus.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

/// Why a package will (or will not) be recompiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Unchanged,
    SourceChanged,
    DependencyChanged,
    New,
}

/// Everything the pipeline reports while it runs.
///
/// Events for a single package are strictly ordered
/// (`PackageCompilationStarted` · `PackageCompilationCommand`? ·
/// `CompilerOutput`* · `PackageCompilationCompleted`); events across packages
/// may interleave.
#[derive(Debug, Clone, PartialEq)]
pub enum CompilationEvent {
    PipelineStarted {
        total_stages: usize,
    },
    StageStarted {
        stage_index: usize,
        stage_name: String,
        total_stages: usize,
    },
    StageCompleted {
        stage_index: usize,
        stage_name: String,
        total_stages: usize,
        success: bool,
    },
    ValidationCheck {
        description: String,
        passed: bool,
    },
    DependencyResolved {
        name: String,
        version: String,
        location: PathBuf,
    },
    PackagesDiscovered {
        package_count: usize,
    },
    PackageDiscovered {
        name: String,
        source_file_count: usize,
    },
    IncrementalCacheLoaded {
        entry_count: usize,
    },
    IncrementalCacheStored {
        entry_count: usize,
    },
    ChangeDetected {
        package: String,
        change: ChangeKind,
    },
    PackageCompilationStarted {
        package: String,
    },
    PackageCompilationCommand {
        package: String,
        command: Vec<String>,
    },
    CompilerOutput {
        package: String,
        line: String,
        stderr: bool,
    },
    PackageCompilationCompleted {
        package: String,
        success: bool,
        output_path: Option<PathBuf>,
        error_count: usize,
        warning_count: usize,
    },
    PipelineCompleted {
        success: bool,
    },
}

type Listener = Box<dyn Fn(&CompilationEvent) + Send + Sync>;

/// Single-producer/multiple-consumer event dispatch.
///
/// Listeners are registered before the pipeline starts (registration is
/// closed once the pipeline takes ownership of the bus) and invoked
/// synchronously on the emitting task. A panicking listener is logged at
/// warn and never aborts the pipeline.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Requires mutable access, so no listener can be
    /// added once the bus is shared with running stages.
    pub fn subscribe(&mut self, listener: impl Fn(&CompilationEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Dispatch an event to every listener, in registration order.
    pub fn emit(&self, event: &CompilationEvent) {
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(?event, "event listener panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn listeners_receive_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let mut bus = EventBus::new();
        bus.subscribe(move |event| seen_clone.lock().unwrap().push(event.clone()));

        bus.emit(&CompilationEvent::PipelineStarted { total_stages: 7 });
        bus.emit(&CompilationEvent::PipelineCompleted { success: true });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen.first(),
            Some(&CompilationEvent::PipelineStarted { total_stages: 7 })
        );
    }

    #[test]
    fn all_listeners_invoked() {
        let count = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        for _ in 0..3 {
            let count_clone = Arc::clone(&count);
            bus.subscribe(move |_| *count_clone.lock().unwrap() += 1);
        }
        bus.emit(&CompilationEvent::PipelineStarted { total_stages: 1 });
        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[test]
    fn panicking_listener_does_not_poison_dispatch() {
        let reached = Arc::new(Mutex::new(false));
        let reached_clone = Arc::clone(&reached);

        let mut bus = EventBus::new();
        bus.subscribe(|_| panic!("listener bug"));
        bus.subscribe(move |_| *reached_clone.lock().unwrap() = true);

        bus.emit(&CompilationEvent::PipelineStarted { total_stages: 1 });
        assert!(*reached.lock().unwrap(), "later listeners must still run");
    }

    #[test]
    fn bus_with_no_listeners_is_fine() {
        EventBus::new().emit(&CompilationEvent::PipelineCompleted { success: false });
    }
}
