//! Plugin host integration tests against a scripted stdio plugin.
//!
//! The fixture plugin is a small shell script speaking line-delimited
//! JSON-RPC: it answers the handshake, one workflow guard method, and a few
//! misbehaving methods (slow, garbage output, sudden exit) used to exercise
//! the host's failure handling.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mehrhof::engine::Machine;
use mehrhof::plugin::{apply_workflow_contributions, discover, PluginError, PluginHost};
use mehrhof::{Phase, PhaseGraph};
use serde_json::json;

const FIXTURE_SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"1.0","pluginInfo":{"name":"fixture"},"capabilities":{"workflow":{"phases":[{"name":"security-scan","after":"reviewing"}],"guards":[{"phase":"done","name":"scan-clean"}]}}}}\n' "$id"
      ;;
    *'"method":"initialized"'*)
      ;;
    *'"method":"workflow.guard"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"pass":true}}\n' "$id"
      ;;
    *'"method":"workflow.reject"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"pass":false,"reason":"tainted"}}\n' "$id"
      ;;
    *'"method":"slow.method"'*)
      sleep 5
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
    *'"method":"garbage.method"'*)
      printf 'this is not a json envelope\n'
      ;;
    *'"method":"crash.method"'*)
      exit 1
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"unknown method"}}\n' "$id"
      ;;
  esac
done
"#;

/// Write a plugin directory (manifest + script) and return the plugin root.
fn write_fixture(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("plugin.sh"), FIXTURE_SCRIPT).unwrap();
    fs::write(
        dir.join("plugin.toml"),
        format!(
            "[plugin]\nname = \"{name}\"\nversion = \"0.1.0\"\nkind = \"workflow\"\n\n\
             [entrypoint]\ncommand = \"sh\"\nargs = [\"plugin.sh\"]\n"
        ),
    )
    .unwrap();
}

fn load_host(root: &Path, name: &str, timeout: Duration) -> Arc<PluginHost> {
    write_fixture(root, name);
    let host = Arc::new(PluginHost::new(timeout));
    let discovered = discover(None, root);
    host.load(&discovered);
    host
}

#[test]
fn handshake_exchanges_capabilities() {
    let temp = tempfile::tempdir().unwrap();
    let host = load_host(temp.path(), "fixture", Duration::from_secs(5));

    assert!(host.is_available("fixture"));
    let caps = host.workflow_capabilities();
    assert_eq!(caps.len(), 1);
    assert_eq!(caps[0].1.phases[0].name, "security-scan");
    assert_eq!(caps[0].1.guards[0].name, "scan-clean");
}

#[test]
fn workflow_contributions_merge_into_the_phase_graph() {
    let temp = tempfile::tempdir().unwrap();
    let host = load_host(temp.path(), "fixture", Duration::from_secs(5));

    let mut graph = PhaseGraph::standard();
    apply_workflow_contributions(&mut graph, &host).unwrap();
    let machine = Machine::new(graph).unwrap();

    // reviewing -> security-scan -> done, not reviewing -> done.
    assert!(machine.graph().allows(&Phase::reviewing(), &Phase::new("security-scan")));
    assert!(machine.graph().allows(&Phase::new("security-scan"), &Phase::done()));
    assert!(!machine.graph().allows(&Phase::reviewing(), &Phase::done()));
}

#[test]
fn guard_call_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let host = load_host(temp.path(), "fixture", Duration::from_secs(5));

    let value = host
        .call("fixture", "workflow.guard", json!({"guard": "scan-clean", "task": {}}))
        .unwrap();
    assert_eq!(value["pass"], true);

    let value = host
        .call("fixture", "workflow.reject", json!({"guard": "scan-clean", "task": {}}))
        .unwrap();
    assert_eq!(value["pass"], false);
    assert_eq!(value["reason"], "tainted");
}

#[test]
fn unknown_method_is_a_typed_error() {
    let temp = tempfile::tempdir().unwrap();
    let host = load_host(temp.path(), "fixture", Duration::from_secs(5));

    match host.call("fixture", "no.such.method", json!({})) {
        Err(PluginError::UnknownMethod { plugin, method }) => {
            assert_eq!(plugin, "fixture");
            assert_eq!(method, "no.such.method");
        }
        other => panic!("expected UnknownMethod, got {other:?}"),
    }
    // An application-level error does not poison the plugin.
    assert!(host.is_available("fixture"));
}

#[test]
fn deadline_expiry_marks_plugin_unavailable() {
    let temp = tempfile::tempdir().unwrap();
    let host = load_host(temp.path(), "fixture", Duration::from_millis(800));

    match host.call("fixture", "slow.method", json!({})) {
        Err(PluginError::Timeout { plugin, method }) => {
            assert_eq!(plugin, "fixture");
            assert_eq!(method, "slow.method");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }

    assert!(!host.is_available("fixture"));
    assert!(matches!(
        host.call("fixture", "workflow.guard", json!({})),
        Err(PluginError::Unavailable(_))
    ));
}

#[test]
fn malformed_response_is_a_protocol_error_not_a_crash() {
    let temp = tempfile::tempdir().unwrap();
    let host = load_host(temp.path(), "fixture", Duration::from_secs(5));

    match host.call("fixture", "garbage.method", json!({})) {
        Err(PluginError::Protocol { plugin, message }) => {
            assert_eq!(plugin, "fixture");
            assert!(message.contains("unparseable"));
        }
        other => panic!("expected Protocol, got {other:?}"),
    }
}

#[test]
fn plugin_exit_mid_call_surfaces_as_crash_not_a_hang() {
    let temp = tempfile::tempdir().unwrap();
    let host = load_host(temp.path(), "fixture", Duration::from_secs(10));

    let started = std::time::Instant::now();
    match host.call("fixture", "crash.method", json!({})) {
        Err(PluginError::Crashed { plugin }) => assert_eq!(plugin, "fixture"),
        other => panic!("expected Crashed, got {other:?}"),
    }
    // Detected via EOF, well before the 10s deadline.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!host.is_available("fixture"));
}

#[test]
fn calls_to_unloaded_plugins_fail_cleanly() {
    let host = PluginHost::new(Duration::from_secs(1));
    assert!(matches!(
        host.call("ghost", "workflow.guard", json!({})),
        Err(PluginError::Unavailable(_))
    ));
}
