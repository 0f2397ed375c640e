//! Tests for configuration validation

use shadow_jobs::config::{SchedulerConfig, ShutdownPolicy};

#[test]
fn test_default_config_is_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_threads_per_class, usize::MAX);
    assert_eq!(cfg.shutdown, ShutdownPolicy::Drain);
    assert_eq!(cfg.thread_name_prefix, "jobs");
    assert!(!cfg.pin_threads);
}

#[test]
fn test_config_invalid_max_threads() {
    let invalid = SchedulerConfig::new().with_max_threads(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_hardware_threads() {
    let invalid = SchedulerConfig::new().with_hardware_threads(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_stack_size() {
    let invalid = SchedulerConfig::new().with_thread_stack_size(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_prefix() {
    let invalid = SchedulerConfig::new().with_thread_name_prefix("  ");
    assert!(invalid.validate().is_err());
}

#[test]
fn test_builder_sets_fields() {
    let cfg = SchedulerConfig::new()
        .with_max_threads(2)
        .with_hardware_threads(6)
        .with_wait_spin_limit(1000)
        .with_shutdown(ShutdownPolicy::Discard)
        .with_thread_stack_size(256 * 1024)
        .with_thread_name_prefix("render")
        .with_pin_threads(true);

    assert_eq!(cfg.max_threads_per_class, 2);
    assert_eq!(cfg.hardware_threads, Some(6));
    assert_eq!(cfg.cores(), 6);
    assert_eq!(cfg.wait_spin_limit, Some(1000));
    assert_eq!(cfg.shutdown, ShutdownPolicy::Discard);
    assert_eq!(cfg.thread_stack_size, Some(256 * 1024));
    assert_eq!(cfg.thread_name_prefix, "render");
    assert!(cfg.pin_threads);
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "max_threads_per_class": 4,
        "hardware_threads": 8,
        "wait_spin_limit": 256,
        "shutdown": "discard",
        "thread_name_prefix": "engine"
    }"#;

    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.max_threads_per_class, 4);
    assert_eq!(cfg.hardware_threads, Some(8));
    assert_eq!(cfg.wait_spin_limit, Some(256));
    assert_eq!(cfg.shutdown, ShutdownPolicy::Discard);
    assert_eq!(cfg.thread_name_prefix, "engine");
    assert_eq!(cfg.thread_stack_size, None);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{ "max_threads_per_class": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str(r#"{ "shutdown": "later" }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_json_round_trip_keeps_policy() {
    let cfg = SchedulerConfig::new().with_shutdown(ShutdownPolicy::Discard);
    let json = serde_json::to_string(&cfg).unwrap();
    assert!(json.contains(r#""shutdown":"discard""#));
    assert_eq!(SchedulerConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_shutdown_policy_from_str() {
    assert_eq!("drain".parse::<ShutdownPolicy>(), Ok(ShutdownPolicy::Drain));
    assert_eq!(" DISCARD ".parse::<ShutdownPolicy>(), Ok(ShutdownPolicy::Discard));
    assert!("flush".parse::<ShutdownPolicy>().is_err());
}
