//! The klog filter is process-global, so this lives in its own binary.

mod common;

use common::{BecameIdle, HostScheduler, RecordingPlatform, Trace, leak, on_cpu};
use kestrel::config::BOOT_LOG_LEVEL;
use kestrel::{BootOrchestrator, InitRegistry};

#[test]
fn constructors_run_before_the_logger_is_configured() {
    klog::set_max_level(klog::Level::Error);

    let trace = Trace::default();
    let registry = leak(InitRegistry::new());
    let platform = leak(RecordingPlatform::new(trace.clone(), 0));
    let scheduler = leak(HostScheduler::new(trace.clone()));
    let orchestrator = leak(BootOrchestrator::new(registry, platform, scheduler));

    let ended = on_cpu(0, move || -> () { orchestrator.boot([0; 4]) });
    assert!(ended.expect_err("boot never returns").is::<BecameIdle>());
    scheduler.join_all();

    assert_eq!(platform.log_level_at_constructors(), Some(klog::Level::Error));
    assert_eq!(klog::max_level(), BOOT_LOG_LEVEL);
}
