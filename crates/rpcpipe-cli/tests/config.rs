//! Config file loading and server launch.

use std::io::Write;

use serde_json::json;

use rpcpipe_cli::config::{Config, ConfigError, Launched};

fn write_config(value: serde_json::Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string_pretty(&value).unwrap().as_bytes())
        .unwrap();
    file
}

#[test]
fn load_reads_every_field() {
    let file = write_config(json!({
        "mcpServers": {
            "test-server": {
                "command": "echo",
                "args": ["test"],
                "env": {"TEST_VAR": "test_value"},
                "autoApprove": ["hello"]
            }
        }
    }));

    let config = Config::load(file.path()).unwrap();
    let server = config.server("test-server").unwrap();
    assert_eq!(server.command, "echo");
    assert_eq!(server.args, vec!["test"]);
    assert_eq!(server.env["TEST_VAR"], "test_value");
    assert_eq!(server.auto_approve, vec!["hello"]);
    assert!(!server.disabled);
}

#[test]
fn missing_optional_fields_default() {
    let file = write_config(json!({"mcpServers": {"bare": {"command": "true"}}}));
    let config = Config::load(file.path()).unwrap();
    let server = config.server("bare").unwrap();
    assert!(server.args.is_empty());
    assert!(server.env.is_empty());
}

#[test]
fn load_reports_missing_file_and_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    assert!(matches!(Config::load(&missing), Err(ConfigError::Read { .. })));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn built_command_runs_with_merged_env() {
    let file = write_config(json!({
        "mcpServers": {
            "env-check": {
                "command": "sh",
                "args": ["-c", "test \"$TEST_VAR\" = test_value && test -n \"$PATH\""],
                "env": {"TEST_VAR": "test_value"}
            }
        }
    }));
    let config = Config::load(file.path()).unwrap();

    let status = config
        .build_command("env-check")
        .unwrap()
        .status()
        .await
        .unwrap();
    assert!(status.success());
}

#[test]
fn disabled_server_cannot_be_launched() {
    let file = write_config(json!({
        "mcpServers": {"off": {"command": "true", "disabled": true}}
    }));
    let config = Config::load(file.path()).unwrap();
    assert!(matches!(
        config.build_command("off"),
        Err(ConfigError::Disabled(_))
    ));
}

#[tokio::test]
async fn spawn_failure_names_the_server() {
    let file = write_config(json!({
        "mcpServers": {"ghost": {"command": "/definitely/not/a/binary"}}
    }));
    let config = Config::load(file.path()).unwrap();

    let err = Launched::spawn(&config, "ghost").unwrap_err();
    assert!(matches!(err, ConfigError::Spawn { ref name, .. } if name == "ghost"));
}

/// Spawns the `rpcpipe` binary itself as a configured stdio server.
#[tokio::test]
async fn launched_server_answers_over_stdio() {
    let file = write_config(json!({
        "mcpServers": {
            "self": {
                "command": env!("CARGO_BIN_EXE_rpcpipe"),
                "args": ["serve-stdio", "--log-level", "warn"]
            }
        }
    }));
    let config = Config::load(file.path()).unwrap();
    let launched = Launched::spawn(&config, "self").unwrap();
    assert!(launched.id().is_some());

    let client = launched.client();
    client.send_request("hello", None).await.unwrap();
    let response = client.receive_response().await.unwrap();
    assert_eq!(response.id, Some(1));
    assert_eq!(response.result, Some(json!("Hello World!")));

    client
        .send_request("echo", json!({"message": "hi"}).as_object().cloned())
        .await
        .unwrap();
    let response = client.receive_response().await.unwrap();
    assert_eq!(response.result, Some(json!("hi")));

    client.send_request("echo", None).await.unwrap();
    let error = client.receive_response().await.unwrap().error.unwrap();
    assert_eq!(error.code, -32603);
    assert!(error.message.starts_with("Method deal failed: "));

    launched.shutdown().await.unwrap();
}

#[tokio::test]
async fn close_ends_the_launched_server() {
    let file = write_config(json!({
        "mcpServers": {
            "self": {
                "command": env!("CARGO_BIN_EXE_rpcpipe"),
                "args": ["serve-stdio", "--log-level", "warn"]
            }
        }
    }));
    let config = Config::load(file.path()).unwrap();
    let launched = Launched::spawn(&config, "self").unwrap();

    let client = launched.client();
    client.send_request("close", None).await.unwrap();
    let response = client.receive_response().await.unwrap();
    assert_eq!(response.result, Some(json!("close")));

    // Nothing answers after close.
    let _ = client.send_request("hello", None).await;
    assert!(client.receive_response().await.is_err());

    launched.shutdown().await.unwrap();
}
