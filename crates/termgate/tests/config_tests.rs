//! Configuration layering tests.

use std::ffi::OsString;
use std::time::Duration;

use termgate::config::{ConfigLoader, EnvConfig, GatewayConfig, LogFormat};

const DEPLOYMENT: &str = r#"
[server]
listen = "0.0.0.0:2222"
host_key = "/var/lib/termgate/host_key"
generate_host_key = true
inactivity_timeout_secs = 600

[session]
command = "python3"
args = ["/srv/games/flight_sim.py", "--fast"]
inherit_env = false
hangup_grace_ms = 1500

[session.env]
LANG = "C.UTF-8"

[accounting]
log_path = "/var/log/termgate/connections.log"

[logging]
level = "debug"
format = "json"
"#;

fn write_config(dir: &tempfile::TempDir, name: &str, content: &str) {
    std::fs::write(dir.path().join(name), content).unwrap();
}

#[test]
fn file_layer_is_found_and_parsed() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, "termgate.toml", DEPLOYMENT);

    let config = ConfigLoader::new().add_path(dir.path()).load_default().unwrap();

    assert_eq!(config.server.listen, "0.0.0.0:2222".parse().unwrap());
    assert!(config.server.generate_host_key);
    assert_eq!(config.server.inactivity_timeout(), Some(Duration::from_secs(600)));
    assert_eq!(config.server.keepalive_interval(), None);
    assert_eq!(config.logging.format, LogFormat::Json);
    config.validate().unwrap();
}

#[test]
fn missing_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigLoader::new().add_path(dir.path()).load_default().unwrap();
    assert_eq!(config, GatewayConfig::default());
}

#[test]
fn environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, "termgate.toml", DEPLOYMENT);

    let mut config = ConfigLoader::new().add_path(dir.path()).load_default().unwrap();
    EnvConfig::default()
        .with_vars([
            ("TERMGATE_LISTEN", "127.0.0.1:2022"),
            ("TERMGATE_COMMAND", "/usr/games/nethack -u guest"),
            ("TERMGATE_LOG_LEVEL", "warn"),
        ])
        .apply(&mut config)
        .unwrap();

    assert_eq!(config.server.listen, "127.0.0.1:2022".parse().unwrap());
    assert_eq!(config.session.command, "/usr/games/nethack");
    assert_eq!(config.session.args, ["-u", "guest"]);
    assert_eq!(config.logging.level, "warn");
    // Untouched by the environment.
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.session.hangup_grace_ms, 1500);
}

#[test]
fn bad_environment_value_is_an_error() {
    let mut config = GatewayConfig::default();
    let err = EnvConfig::default()
        .with_vars([("TERMGATE_LISTEN", "not an address")])
        .apply(&mut config)
        .unwrap_err();
    assert!(err.to_string().contains("TERMGATE_LISTEN"), "{err}");
}

#[test]
fn file_errors_name_the_file() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, "broken.toml", "[session]\ncommand = 42\n");

    let path = dir.path().join("broken.toml");
    let err = ConfigLoader::new().load(&path).unwrap_err();
    assert!(err.to_string().contains("broken.toml"), "{err}");
}

#[test]
fn session_settings_follow_configuration() {
    let config = GatewayConfig::from_toml_str(DEPLOYMENT).unwrap();
    let settings = config.session_settings();

    let launch = settings.launch_config("screen-256color");
    assert_eq!(launch.program_name(), "python3");
    assert_eq!(launch.args.len(), 2);
    assert!(!launch.inherit_env);
    assert_eq!(launch.env_value("LANG"), Some(OsString::from("C.UTF-8")));
    assert_eq!(launch.env_value("TERM"), Some(OsString::from("screen-256color")));
    assert_eq!(settings.relay.hangup_grace, Duration::from_millis(1500));
}

#[test]
fn validation_rejects_unusable_values() {
    let mut config = GatewayConfig::default();
    config.session.command = "  ".into();
    assert!(config.validate().is_err());

    let mut config = GatewayConfig::default();
    config.accounting.log_path = "".into();
    assert!(config.validate().is_err());

    let mut config = GatewayConfig::default();
    config.session.hangup_grace_ms = 0;
    assert!(config.validate().is_err());
}
