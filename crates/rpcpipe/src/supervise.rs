//! Fault isolation for background tasks.
//!
//! Every reader, accept loop and connection task is spawned through
//! [`supervise`]. A panic inside the task (including inside a handler it is
//! running) ends that task only: the payload, the panic location and a
//! backtrace taken at the panic site are logged, and nothing propagates to
//! the process or to sibling tasks.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use futures::FutureExt;
use tokio::task::JoinHandle;

/// Where the most recent panic on this thread happened.
struct PanicSite {
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Record the site of every panic before unwinding starts. The previously
/// installed hook still runs afterwards.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let site = PanicSite {
                location: info.location().map(|l| l.to_string()),
                backtrace: Backtrace::force_capture(),
            };
            let _ = LAST_PANIC.try_with(|slot| *slot.borrow_mut() = Some(site));
            previous(info);
        }));
    });
}

/// A panic caught at a task boundary.
#[derive(Debug)]
pub struct PanicReport {
    pub task: &'static str,
    pub message: String,
    /// `file:line:column` of the `panic!`.
    pub location: Option<String>,
    /// Stack captured at the panic site.
    pub backtrace: Option<Backtrace>,
}

/// Spawn `task` on the runtime under a panic boundary.
///
/// The returned handle always resolves to `Ok(())` for a panicking task,
/// since the panic is consumed at the boundary.
pub fn supervise<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let _ = guarded(name, task).await;
    })
}

/// Run `task` to completion, converting a panic into a log record.
pub async fn guarded<F>(name: &'static str, task: F) -> Result<(), PanicReport>
where
    F: Future<Output = ()>,
{
    install_panic_hook();

    let payload = match AssertUnwindSafe(task).catch_unwind().await {
        Ok(()) => return Ok(()),
        Err(payload) => payload,
    };

    // The hook ran on this thread during the same poll.
    let site = LAST_PANIC.with(|slot| slot.borrow_mut().take());
    let report = PanicReport {
        task: name,
        message: panic_message(payload.as_ref()),
        location: site.as_ref().and_then(|s| s.location.clone()),
        backtrace: site.map(|s| s.backtrace),
    };

    let location = report.location.as_deref().unwrap_or("unknown");
    match &report.backtrace {
        Some(stack) => tracing::error!(
            task = name,
            location,
            "panic: {}, stack: {stack}",
            report.message
        ),
        None => tracing::error!(task = name, location, "panic: {}", report.message),
    }
    Err(report)
}

/// Best-effort text for a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[inline(never)]
    fn fail_deep_inside() {
        panic!("deep failure");
    }

    /// Shared buffer the test subscriber writes log lines into.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panic_stays_inside_the_task() {
        let handle = supervise("exploding", async {
            panic!("kaboom");
        });
        assert!(handle.await.is_ok(), "boundary should swallow the panic");
    }

    #[tokio::test]
    async fn guarded_reports_outcome() {
        assert!(guarded("fine", async {}).await.is_ok());

        let report = guarded("broken", async {
            panic!("{}", String::from("owned"));
        })
        .await
        .unwrap_err();
        assert_eq!(report.task, "broken");
        assert_eq!(report.message, "owned");
    }

    #[tokio::test]
    async fn report_points_at_the_panic_site() {
        let report = guarded("deep", async {
            tokio::task::yield_now().await;
            fail_deep_inside();
        })
        .await
        .unwrap_err();

        let location = report.location.expect("hook records the location");
        assert!(location.contains("supervise.rs"), "got {location}");

        let stack = report.backtrace.expect("hook records a backtrace").to_string();
        assert!(stack.contains("fail_deep_inside"), "stack misses the panic site:\n{stack}");
    }

    #[test]
    fn panic_is_logged_with_location_and_stack() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        tracing::subscriber::with_default(subscriber, || {
            runtime.block_on(async {
                let _ = guarded("logged", async { fail_deep_inside() }).await;
            });
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("panic: deep failure"), "{output}");
        assert!(output.contains("task=\"logged\""), "{output}");
        assert!(output.contains("supervise.rs"), "{output}");
        assert!(output.contains("fail_deep_inside"), "{output}");
    }

    #[tokio::test]
    async fn siblings_keep_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let bad = supervise("bad", async { panic!("first"); });
        let good = supervise("good", async move {
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        });

        bad.await.unwrap();
        good.await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn panic_message_variants() {
        let borrowed: Box<dyn Any + Send> = Box::new("static text");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        let other: Box<dyn Any + Send> = Box::new(17_u8);
        assert_eq!(panic_message(borrowed.as_ref()), "static text");
        assert_eq!(panic_message(owned.as_ref()), "owned text");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
