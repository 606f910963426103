use routecodex_core::binding::{ProviderProtocol, ToolCallIdStyle};
use routecodex_core::config::{interpolate_env, AuthConfig, GatewayConfig, RetryStrategy};

fn parse(yaml: &str) -> Result<GatewayConfig, serde_yaml::Error> {
    serde_yaml::from_str(yaml)
}

#[test]
fn test_minimal_provider_config() {
    let config = parse(
        r#"
providers:
  glm:
    provider_protocol: openai-chat
    compatibility_profile: glm
    base_url: https://open.bigmodel.cn/api/paas/v4
    auth:
      kind: bearer
      keys: ["sk-test"]
"#,
    )
    .unwrap();
    config.validate().unwrap();

    let glm = &config.providers["glm"];
    assert_eq!(glm.provider_protocol, ProviderProtocol::OpenaiChat);
    assert_eq!(glm.compatibility_profile, "glm");
    assert_eq!(glm.responses.tool_call_id_style, ToolCallIdStyle::Preserve);
    match &glm.auth {
        AuthConfig::Bearer { keys } => assert_eq!(keys.len(), 1),
        other => panic!("unexpected auth: {other:?}"),
    }
}

#[test]
fn test_missing_triple_field_rejected() {
    // No compatibility_profile: serde rejects before validate ever runs.
    let result = parse(
        r#"
providers:
  glm:
    provider_protocol: openai-chat
    base_url: https://example.com
    auth:
      kind: bearer
      keys: ["k"]
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_unknown_provider_key_rejected() {
    // Legacy providerType must have been normalized away by the loader.
    let result = parse(
        r#"
providers:
  glm:
    provider_protocol: openai-chat
    compatibility_profile: glm
    providerType: openai
    base_url: https://example.com
    auth:
      kind: bearer
      keys: ["k"]
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_unknown_protocol_rejected() {
    let result = parse(
        r#"
providers:
  glm:
    provider_protocol: grpc-chat
    compatibility_profile: glm
    base_url: https://example.com
    auth:
      kind: bearer
      keys: ["k"]
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_empty_bearer_keys_rejected() {
    let config = parse(
        r#"
providers:
  glm:
    provider_protocol: openai-chat
    compatibility_profile: glm
    base_url: https://example.com
    auth:
      kind: bearer
      keys: []
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_route_with_unknown_config_ref_rejected() {
    let config = parse(
        r#"
routes:
  - id: r1
    pattern:
      model: "glm-.*"
    modules:
      - kind: provider
        config_ref: nonexistent
      - kind: llmswitch
        config: {}
"#,
    )
    .unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("nonexistent"));
}

#[test]
fn test_route_library_reference_accepted() {
    let config = parse(
        r#"
config_library:
  glm-provider:
    provider: glm
routes:
  - id: r1
    pattern:
      model: "glm-.*"
    modules:
      - kind: provider
        config_ref: glm-provider
      - kind: llmswitch
        config: {}
"#,
    )
    .unwrap();
    config.validate().unwrap();
}

#[test]
fn test_retry_strategy_parsing() {
    let config = parse(
        r#"
upstream:
  retry:
    strategy: retry-exponential
    max_attempts: 5
"#,
    )
    .unwrap();
    assert_eq!(config.upstream.retry.strategy, RetryStrategy::RetryExponential);
    assert_eq!(config.upstream.retry.max_attempts, 5);
}

#[test]
fn test_env_interpolation_with_default() {
    // SAFETY: test-local env mutation; no other test reads this name.
    unsafe { std::env::set_var("RCX_TEST_KEY", "sk-live") };
    assert_eq!(interpolate_env("key: ${RCX_TEST_KEY}"), "key: sk-live");
    assert_eq!(
        interpolate_env("key: ${RCX_TEST_UNSET:fallback}"),
        "key: fallback"
    );
    assert_eq!(interpolate_env("key: ${RCX_TEST_UNSET_2}"), "key: ");
    assert_eq!(interpolate_env("no refs here"), "no refs here");
    unsafe { std::env::remove_var("RCX_TEST_KEY") };
}

#[test]
fn test_env_interpolation_unterminated() {
    assert_eq!(interpolate_env("key: ${OOPS"), "key: ${OOPS");
}

#[test]
fn test_defaults() {
    let config = GatewayConfig::default();
    assert_eq!(config.server.request_timeout_ms, 300_000);
    assert_eq!(config.pool.degraded_after, 3);
    assert_eq!(config.breaker.failure_threshold, 5);
    assert!(!config.mcp.enabled);
    assert!(config.node_id.starts_with("routecodex-"));
}
