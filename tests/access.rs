use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

mod support;

use switchyard::config::EngineConfig;
use switchyard::error::ConfigError;
use switchyard::server::access::{parse_caller, AccessControl, AccessRule, AccessRuleList, IpPattern};

use support::{call, error_code, standard};

fn ip(text: &str) -> IpAddr {
    text.parse().expect("address")
}

fn control(api: &str, global: &str) -> AccessControl {
    AccessControl::new(
        AccessRuleList::parse(api).expect("api rules"),
        AccessRuleList::parse(global).expect("global rules"),
        Vec::new(),
    )
}

#[test]
fn first_matching_rule_wins() {
    let access = control("deny * *; allow 1.2.3.4 foo", "");
    assert!(!access.allowed("1.2.3.4", "foo", None).expect("decision"));

    let access = control("allow 1.2.3.4 foo; deny * *", "");
    assert!(access.allowed("1.2.3.4:5555", "foo", None).expect("decision"));
    assert!(!access.allowed("1.2.3.4", "bar", None).expect("decision"));
    assert!(!access.allowed("4.3.2.1", "foo", None).expect("decision"));
}

#[test]
fn network_patterns() {
    let pattern: IpPattern = "10.1.0.0/16".parse().expect("pattern");
    assert!(pattern.matches(ip("10.1.200.3")));
    assert!(!pattern.matches(ip("10.2.0.1")));
    assert!(!pattern.matches(ip("::1")));

    let everything: IpPattern = "0.0.0.0/0".parse().expect("pattern");
    assert!(everything.matches(ip("192.168.1.1")));

    let v6: IpPattern = "fd00::/8".parse().expect("pattern");
    assert!(v6.matches(ip("fd12::1")));
    assert!(!v6.matches(ip("fe80::1")));

    assert_eq!("1.2.3.4".parse::<IpPattern>().expect("host").to_string(), "1.2.3.4/32");
    assert!("1.2.3.4/33".parse::<IpPattern>().is_err());
    assert!("localhost".parse::<IpPattern>().is_err());
}

#[test]
fn function_and_convention_globs() {
    let rule: AccessRule = "allow 127.0.0.1 Get* json-rpc-*".parse().expect("rule");
    assert_eq!(rule.evaluate(ip("127.0.0.1"), "GetUser", Some("json-rpc-2.0")), Some(true));
    assert_eq!(rule.evaluate(ip("127.0.0.1"), "GetUser", Some("soap")), None);
    assert_eq!(rule.evaluate(ip("127.0.0.1"), "GetUser", None), None);
    assert_eq!(rule.evaluate(ip("127.0.0.1"), "SetUser", Some("json-rpc-2.0")), None);
    assert_eq!(rule.to_string(), "allow 127.0.0.1/32 Get* json-rpc-*");

    let rule: AccessRule = "deny * _?et*".parse().expect("rule");
    assert_eq!(rule.evaluate(ip("8.8.8.8"), "_GetVersion", None), Some(false));
    assert_eq!(rule.evaluate(ip("8.8.8.8"), "_NoOp", None), None);
}

#[test]
fn global_rules_apply_when_api_rules_are_silent() {
    let access = control("deny 10.0.0.0/8 Secret*", "allow 10.0.0.0/8 *");
    assert!(!access.allowed_ip(ip("10.0.0.1"), "SecretPlan", None));
    assert!(access.allowed_ip(ip("10.0.0.1"), "PublicPlan", None));
    assert!(!access.allowed_ip(ip("11.0.0.1"), "PublicPlan", None));
}

#[test]
fn empty_rules_allow_only_this_host() {
    let access = control("", "");
    assert!(access.allowed_ip(ip("127.0.0.1"), "anything", None));
    assert!(access.allowed_ip(ip("::1"), "anything", None));
    assert!(!access.allowed_ip(ip("192.168.0.7"), "anything", None));

    let access = AccessControl::new(AccessRuleList::default(), AccessRuleList::default(), vec![ip("192.168.0.7")]);
    assert!(access.allowed_ip(ip("192.168.0.7"), "anything", None));

    access.replace(
        AccessRuleList::parse("allow 192.168.0.8 *").expect("rules"),
        AccessRuleList::default(),
        Vec::new(),
    );
    assert!(!access.allowed_ip(ip("192.168.0.7"), "anything", None));
    assert!(access.allowed_ip(ip("192.168.0.8"), "anything", None));
}

#[test]
fn replacement_never_mixes_rule_sets() {
    // each set denies 10.0.0.1, but the api list of the second combined with
    // the global list of the first allows it
    let first = || {
        (
            AccessRuleList::parse("deny 10.0.0.1 *").expect("rules"),
            AccessRuleList::parse("allow * *").expect("rules"),
        )
    };
    let second = || {
        (
            AccessRuleList::parse("deny 10.0.0.9 *").expect("rules"),
            AccessRuleList::parse("deny * *").expect("rules"),
        )
    };
    let (api, global) = first();
    let access = AccessControl::new(api, global, Vec::new());
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    assert!(!access.allowed_ip(ip("10.0.0.1"), "Echo", None), "decided on mixed rules");
                }
            });
        }
        for round in 0..2_000 {
            let (api, global) = if round % 2 == 0 { second() } else { first() };
            access.replace(api, global, Vec::new());
        }
        done.store(true, Ordering::Release);
    });
}

#[test]
fn caller_addresses() {
    assert_eq!(parse_caller("10.0.0.1"), Some(ip("10.0.0.1")));
    assert_eq!(parse_caller("10.0.0.1:8080"), Some(ip("10.0.0.1")));
    assert_eq!(parse_caller("[::1]:8080"), Some(ip("::1")));
    assert_eq!(parse_caller("nobody"), None);

    let access = control("", "");
    assert!(access.allowed("nobody", "Echo", None).is_err());
}

#[test]
fn invalid_rules_are_configuration_errors() {
    for rules in ["permit * *", "allow *", "allow 300.1.1.1 *", "allow * * * extra"] {
        let err = AccessRuleList::parse(rules).expect_err(rules);
        assert!(matches!(err, ConfigError::Validation(_)), "{rules}: {err:?}");
    }
    let list = AccessRuleList::parse("allow * A\n\n deny * B ;").expect("rules");
    assert_eq!(list.rules().len(), 2);
}

#[tokio::test]
async fn engine_refuses_denied_callers() {
    let config = EngineConfig::from_toml(
        r#"
        [acl]
        api = "deny * Add; allow 127.0.0.0/8 *"
        "#,
    )
    .expect("config");
    let engine = support::start_with(config).await;

    let outbound = call(&engine, "Add", &[("a", "1"), ("b", "2")]).await;
    assert_eq!(outbound.status, 403);
    assert_eq!(error_code(&outbound).as_deref(), Some("_AccessDenied"));

    assert_eq!(call(&engine, "Echo", &[("in", "x")]).await.status, 200);

    let outbound = engine.handle(standard("Echo", &[("in", "x")]), "10.9.8.7:1234").await;
    assert_eq!(outbound.status, 403);

    // denied calls never reach the function
    assert_eq!(engine.api().function("Add").expect("Add").call_count(), 0);
}

#[tokio::test]
async fn convention_specific_rules() {
    let config = EngineConfig::from_toml(
        r#"
        [acl]
        api = "allow 127.0.0.1 * json-rpc-2.0"
        "#,
    )
    .expect("config");
    let engine = support::start_with(config).await;

    assert_eq!(call(&engine, "Echo", &[("in", "x")]).await.status, 403);

    let inbound = switchyard::protocol::convention::Inbound::post_json(serde_json::json!({
        "jsonrpc": "2.0", "method": "Echo", "params": {"in": "x"}, "id": 1
    }));
    let outbound = engine.handle(inbound, support::LOCAL).await;
    assert_eq!(support::json_body(&outbound)["result"]["out"], "x");
}
