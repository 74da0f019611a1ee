mod common;

use std::sync::Arc;
use tokio_test::assert_ok;
use llmport::providers::reference::REFERENCE_TEXT;
use llmport::registry::FAILOVER_NAME;
use llmport::{
  BackendConfig
, BackendRegistry
, CancellationToken
, Error
, GenerationRequestSettings
, LlmportConfig
, TextCompletion
};
use common::*;

fn is_invalid_configuration<T>(result: llmport::Result<T>) -> bool
{   matches!(result, Err(Error::InvalidConfiguration(_)))
}

const CHAIN_JSON: &str = r#"{
  "backends": [
    { "name": "local", "kind": "reference", "text": "hello there ", "chunk_delay_ms": 5 },
    { "name": "remote", "kind": "unreliable" }
  ],
  "default_backend": "local",
  "failover": { "max_retries": 0, "order": ["remote", "local"] },
  "settings": { "max_output_units": 1 }
}"#;

fn unreliable_registry() -> BackendRegistry
{   let mut registry = BackendRegistry::new();
    registry.register_kind("unreliable", |_config: &BackendConfig| {
      let backend: Arc<dyn TextCompletion>
        = Arc::new(FlakyBackend::new(usize::MAX, "unreachable"));
      Ok(backend)
    });
    registry
}

// ===== Parsing and validation =====

#[test]
fn empty_document_uses_the_reference_backend()
{   let config = assert_ok!(LlmportConfig::from_json_str("{}"));
    assert_eq!(config, LlmportConfig::default());
    assert_eq!(config.backends, vec![BackendConfig::reference("reference")]);
    assert!(config.failover.enabled);
    assert_eq!(assert_ok!(config.settings()), GenerationRequestSettings::default());
}

#[test]
fn settings_block_is_resolved_with_defaults()
{   let config = assert_ok!(LlmportConfig::from_json_str(CHAIN_JSON));
    let settings = assert_ok!(config.settings());
    assert_eq!(settings.max_output_units(), 1);
    assert_eq!(settings.temperature(), 0.0);
    assert_eq!(config.failover.order, ["remote", "local"]);
    assert_eq!(config.backends[0].chunk_delay_ms, Some(5));
}

#[test]
fn out_of_range_settings_are_invalid_settings()
{   let config = assert_ok!(LlmportConfig::from_json_str(
      r#"{ "settings": { "temperature": 3.5 } }"#
    ));
    assert!(matches!(config.settings(), Err(Error::InvalidSettings(_))));
}

#[test]
fn structural_mistakes_are_rejected()
{   let documents = [
      "not json"
    , r#"{ "settings": { "top_k": 40 } }"#
    , r#"{ "backends": [{ "name": "a" }] }"#
    , r#"{ "backends": [{ "kind": "reference" }] }"#
    , r#"{ "backends": [{ "name": "a", "kind": "reference" }, { "name": "a", "kind": "reference" }] }"#
    , r#"{ "default_backend": "missing" }"#
    , r#"{ "failover": { "order": ["reference", "missing"] } }"#
    , r#"{ "backends": [{ "name": "a", "kind": "http", "api_key_evn": "KEY" }] }"#
    , r#"{ "failover": { "retries": 2 } }"#
    , r#"{ "backend": [] }"#
    ];
    for document in documents
    {   assert!(
          is_invalid_configuration(LlmportConfig::from_json_str(document))
        , "accepted: {}"
        , document
        );
    }
}

#[test]
fn configuration_file_is_loaded()
{   let path = std::env::temp_dir()
      .join(format!("llmport-config-{}.json", std::process::id()));
    assert_ok!(std::fs::write(&path, CHAIN_JSON));
    let loaded = LlmportConfig::load(&path);
    let _ = std::fs::remove_file(&path);

    let config = assert_ok!(loaded);
    assert_eq!(config.default_backend.as_deref(), Some("local"));
    assert!(is_invalid_configuration(LlmportConfig::load(&path)));
}

#[test]
fn missing_api_key_variable_is_reported()
{   let mut config = BackendConfig::http("remote", "http://127.0.0.1:1/v1", "m");
    config.api_key_env = Some("LLMPORT_TEST_KEY_THAT_IS_NOT_SET".to_string());
    assert!(is_invalid_configuration(config.api_key()));
    assert!(is_invalid_configuration(BackendRegistry::new().build(&config)));
}

// ===== Registry =====

#[tokio::test(start_paused = true)]
async fn default_registry_serves_the_reference_text()
{   let registry = assert_ok!(BackendRegistry::from_config(&LlmportConfig::default()));
    assert_eq!(registry.default_name(), Some("reference"));
    assert_eq!(registry.names(), ["reference"]);

    let backend = assert_ok!(registry.default_backend());
    let settings = assert_ok!(
      GenerationRequestSettings::builder().max_output_units(100).build()
    );
    let text = assert_ok!(
      backend.complete(PROMPT, &settings, &CancellationToken::new()).await
    );
    assert_eq!(text, REFERENCE_TEXT);
}

#[tokio::test(start_paused = true)]
async fn configured_failover_chain_skips_unavailable_backends()
{   let config = assert_ok!(LlmportConfig::from_json_str(CHAIN_JSON));
    let mut registry = unreliable_registry();
    assert_ok!(registry.load_config(&config));
    let settings = assert_ok!(config.settings());
    let cancel = CancellationToken::new();

    assert_eq!(registry.names(), [FAILOVER_NAME, "local", "remote"]);
    assert_eq!(registry.default_name(), Some("local"));

    let remote = assert_ok!(registry.get("remote"));
    assert!(matches!(
      remote.complete(PROMPT, &settings, &cancel).await
    , Err(Error::BackendUnavailable(_))
    ));

    let chain = assert_ok!(registry.get(FAILOVER_NAME));
    assert_eq!(
      assert_ok!(chain.complete(PROMPT, &settings, &cancel).await)
    , "hello "
    );
    assert_eq!(
      assert_ok!(chain.complete_stream(PROMPT, &settings, &cancel).collect_text().await)
    , "hello "
    );
}

#[test]
fn unknown_kind_is_invalid_configuration()
{   let config = assert_ok!(LlmportConfig::from_json_str(CHAIN_JSON));
    assert!(is_invalid_configuration(BackendRegistry::from_config(&config)));
}

#[test]
fn serialized_backend_needs_a_runtime()
{   let mut backend = BackendConfig::reference("serial");
    backend.serialize = true;
    assert!(is_invalid_configuration(BackendRegistry::new().build(&backend)));
}

#[tokio::test(start_paused = true)]
async fn serialized_backend_is_built_inside_a_runtime()
{   let mut backend = BackendConfig::reference("serial");
    backend.serialize = true;
    backend.text = Some("one at a time ".to_string());
    let config = LlmportConfig
    {   backends: vec![backend]
      , ..LlmportConfig::default()
    };

    let registry = assert_ok!(BackendRegistry::from_config(&config));
    let serial = assert_ok!(registry.get("serial"));
    let text = assert_ok!(
      serial
        .complete_stream(PROMPT, &GenerationRequestSettings::default(), &CancellationToken::new())
        .collect_text()
        .await
    );
    assert_eq!(text, "one at a time ");
}

#[test]
fn lookups_of_unknown_names_fail()
{   let mut registry = BackendRegistry::new();
    assert!(is_invalid_configuration(registry.default_backend()));
    assert!(is_invalid_configuration(registry.get("nope")));
    assert!(is_invalid_configuration(registry.set_default("nope")));

    registry.register("first", Arc::new(ScriptedBackend::new(vec![])));
    registry.register("second", Arc::new(ScriptedBackend::new(vec![])));
    assert_eq!(registry.default_name(), Some("first"));
    assert_ok!(registry.set_default("second"));
    assert_eq!(registry.default_name(), Some("second"));
}
