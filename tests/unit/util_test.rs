//! Tests for utility functions

use shadow_jobs::util::{NoopThreadTuning, OsThreadTuning, ThreadTuning};
use shadow_jobs::{dispatch_groups, Priority};

#[test]
fn test_dispatch_groups() {
    assert_eq!(dispatch_groups(10, 3), 4);
    assert_eq!(dispatch_groups(12, 3), 4);
    assert_eq!(dispatch_groups(1, 64), 1);
    assert_eq!(dispatch_groups(0, 3), 0);
    assert_eq!(dispatch_groups(3, 0), 0);
}

#[test]
fn test_priority_names() {
    assert_eq!(Priority::Highest.to_string(), "highest");
    assert_eq!(Priority::Low.to_string(), "low");
    assert_eq!(Priority::Stream.to_string(), "stream");
    assert_eq!(serde_json::to_string(&Priority::Stream).unwrap(), r#""stream""#);
}

#[test]
fn test_stream_always_pinned_to_last_core() {
    let tuning = OsThreadTuning::new(12, true);
    assert_eq!(tuning.preferred_core(Priority::Stream, 0), 11);
    assert_eq!(tuning.preferred_core(Priority::Highest, 0), 1);
}

#[test]
fn test_tuning_is_object_safe() {
    let hooks: Vec<Box<dyn ThreadTuning>> =
        vec![Box::new(NoopThreadTuning), Box::new(OsThreadTuning::new(4, false))];
    for hook in &hooks {
        hook.set_priority(Priority::Low, 1);
    }
}
