//! Metrics recorder installation checks that fail before touching the
//! global recorder.

use logferry_core::config::MetricsConfig;
use logferry_daemon::metrics_server;
use serial_test::serial;

#[test]
#[serial]
fn test_install_rejects_invalid_address() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "999.999.999.999".to_owned(),
        port: 9100,
        endpoint: "/metrics".to_owned(),
    };

    assert!(metrics_server::install_metrics_recorder(&config).is_err());
}

#[test]
#[serial]
fn test_install_rejects_unsupported_endpoint() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_owned(),
        port: 19_101,
        endpoint: "/custom".to_owned(),
    };

    let err = metrics_server::install_metrics_recorder(&config).unwrap_err();
    assert!(err.to_string().contains("unsupported metrics endpoint"));
}
