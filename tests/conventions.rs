use serde_json::{json, Value};

mod support;

use switchyard::model::FunctionRequest;
use switchyard::protocol::convention::{
    tree, ConventionRegistry, FaultCode, Inbound, Outbound, Payload, BUILT_IN, CONVENTION_PARAMETER,
};
use switchyard::xml::Element;

use support::{json_body, xml_body, LOCAL};

/// Output parameter `name` as rendered by convention `convention`
fn output(convention: &str, function: &str, outbound: &Outbound, name: &str) -> Option<String> {
    match convention {
        "standard" | "xml" => support::result_param(outbound, name),
        "xml-rpc" => xml_body(outbound)
            .child("params")
            .and_then(|p| p.child("param"))
            .and_then(|p| p.child("value"))
            .and_then(|v| v.child("struct"))
            .and_then(|s| {
                s.children_named("member")
                    .find(|m| m.child("name").map(Element::text_or_empty) == Some(name))
            })
            .and_then(|m| m.child("value"))
            .and_then(|v| v.children().first())
            .map(|typed| typed.text_or_empty().to_string()),
        "soap" | "soap-map" => xml_body(outbound)
            .child("Body")
            .and_then(|b| b.child(&format!("{function}Response")))
            .and_then(|r| r.child(name))
            .map(|e| e.text_or_empty().to_string()),
        _ => json_body(outbound)["result"][name].as_str().map(str::to_string),
    }
}

#[tokio::test]
async fn every_convention_round_trips_a_call() {
    let engine = support::start().await;
    let registry = ConventionRegistry::default();
    let request = FunctionRequest::new("Pair", support::params(&[("a", "1"), ("b", "2")]), None)
        .expect("request");

    for name in BUILT_IN {
        let convention = registry.get(name).expect("built-in convention");
        let inbound = convention.render_request(&request).with_parameter(CONVENTION_PARAMETER, name);
        let outbound = engine.handle(inbound, LOCAL).await;
        assert_eq!(outbound.status, 200, "{name}");
        assert_eq!(output(name, "Pair", &outbound, "a").as_deref(), Some("1"), "{name}");
        assert_eq!(output(name, "Pair", &outbound, "b").as_deref(), Some("2"), "{name}");
    }
}

#[tokio::test]
async fn json_conventions_accept_positional_parameters() {
    let engine = support::start().await;
    let bodies = [
        ("json-rpc-1.0", json!({"method": "Pair", "params": ["1", "2"], "id": 1})),
        ("json-rpc-1.1", json!({"version": "1.1", "method": "Pair", "params": ["1", "2"], "id": 1})),
        ("json-rpc-2.0", json!({"jsonrpc": "2.0", "method": "Pair", "params": ["1", "2"], "id": 1})),
    ];
    for (name, body) in bodies {
        let outbound = engine.handle(Inbound::post_json(body), LOCAL).await;
        assert_eq!(output(name, "Pair", &outbound, "a").as_deref(), Some("1"), "{name}");
        assert_eq!(output(name, "Pair", &outbound, "b").as_deref(), Some("2"), "{name}");
    }
}

#[tokio::test]
async fn surplus_positional_parameters_are_dropped() {
    let engine = support::start().await;
    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "Echo", "params": ["a", "b", "c"], "id": 4
    }));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&outbound), &json!({"jsonrpc": "2.0", "result": {"out": "a"}, "id": 4}));
}

#[tokio::test]
async fn positional_call_of_an_unknown_function() {
    let engine = support::start().await;
    let inbound = Inbound::post_json(json!({"jsonrpc": "2.0", "method": "Nope", "params": ["x"], "id": 1}));
    let outbound = engine.handle(inbound, LOCAL).await;
    let body = json_body(&outbound);
    assert_eq!(body["error"]["code"], -32603);
    assert_eq!(body["error"]["message"], "_NoSuchFunction");
    assert_eq!(body["id"], 1);
}

#[tokio::test]
async fn positional_meta_function_arguments() {
    let engine = support::start().await;
    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "_DisableFunction", "params": ["Echo"], "id": 1
    }));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert!(json_body(&outbound).get("error").is_none(), "{:?}", json_body(&outbound));
    assert!(!engine.api().function("Echo").expect("Echo").is_enabled());

    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "_GetStatistics", "params": ["Add", "yes"], "id": 2
    }));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&outbound)["error"]["code"], -32600, "detailed must be a boolean");
}

#[tokio::test]
async fn detection_picks_the_matching_convention() {
    let engine = support::start().await;
    let registry = ConventionRegistry::default();
    let request = FunctionRequest::new("Echo", support::params(&[("in", "found")]), None).expect("request");

    // soap-map shares detection with soap and is never detected on its own
    for name in BUILT_IN.iter().filter(|n| **n != "soap-map") {
        let inbound = registry.get(name).expect("convention").render_request(&request);
        assert_eq!(registry.detect(&inbound).map(|c| c.name()), Some(*name));
        let outbound = engine.handle(inbound, LOCAL).await;
        assert_eq!(output(name, "Echo", &outbound, "out").as_deref(), Some("found"), "{name}");
    }
}

#[tokio::test]
async fn soap_map_is_selected_explicitly_or_by_default() {
    let registry = ConventionRegistry::default();
    let request = FunctionRequest::new("Echo", support::params(&[("in", "mapped")]), None).expect("request");
    let inbound = registry.get("soap-map").expect("soap-map").render_request(&request);
    assert_eq!(registry.detect(&inbound).map(|c| c.name()), Some("soap"));

    let without_soap = ConventionRegistry::with_names(&["standard", "soap-map"]).expect("registry");
    assert_eq!(without_soap.detect(&inbound).map(|c| c.name()), Some("soap-map"));

    let engine = support::start().await;
    let outbound = engine.handle(inbound.with_parameter(CONVENTION_PARAMETER, "soap-map"), LOCAL).await;
    assert_eq!(output("soap-map", "Echo", &outbound, "out").as_deref(), Some("mapped"));
}

#[tokio::test]
async fn json_rpc_2_responses() {
    let engine = support::start().await;

    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "Echo", "params": {"in": "hi"}, "id": 7
    }));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(json_body(&outbound), &json!({"jsonrpc": "2.0", "result": {"out": "hi"}, "id": 7}));

    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "Add", "params": [2, 3], "id": "x"
    }));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&outbound)["result"]["sum"], "5");
    assert_eq!(json_body(&outbound)["id"], "x");

    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "Lookup", "params": {"key": "missing"}, "id": 1
    }));
    let body = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&body)["error"]["code"], -32000);
    assert_eq!(json_body(&body)["error"]["message"], "NotFound");

    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "Echo", "params": {}, "id": 2
    }));
    let body = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&body)["error"]["code"], -32600);

    let inbound = Inbound::post_json(json!({"jsonrpc": "2.0", "method": "Fail", "id": 3}));
    let body = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&body)["error"]["code"], -32603);
    assert_eq!(json_body(&body)["error"]["message"], "_InternalError");
}

#[tokio::test]
async fn json_rpc_2_notification_gets_no_content() {
    let engine = support::start().await;
    let inbound = Inbound::post_json(json!({"jsonrpc": "2.0", "method": "Echo", "params": {"in": "x"}}));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 204);
    assert_eq!(outbound.body, Payload::Empty);
    // the function still ran
    assert_eq!(engine.api().function("Echo").expect("Echo").call_count(), 1);
}

#[tokio::test]
async fn json_rpc_2_malformed_envelope() {
    let engine = support::start().await;
    let inbound = Inbound::post_json(json!({"method": "Echo", "params": {"in": "x"}, "id": 1}))
        .with_parameter(CONVENTION_PARAMETER, "json-rpc-2.0");
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    let body = json_body(&outbound);
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], 1);

    let inbound = Inbound::post_json(json!({
        "jsonrpc": "2.0", "method": "Echo", "params": {"in": {"nested": true}}, "id": 1
    }));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&outbound)["error"]["code"], -32600);
}

#[tokio::test]
async fn json_rpc_1_dialects() {
    let engine = support::start().await;

    let inbound = Inbound::post_json(json!({"method": "Echo", "params": {"in": "one"}, "id": 1}));
    let body = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&body), &json!({"result": {"out": "one"}, "error": null, "id": 1}));

    let inbound = Inbound::post_json(json!({"method": "Echo", "params": {}, "id": 2}));
    let body = engine.handle(inbound, LOCAL).await;
    let body = json_body(&body);
    assert_eq!(body["result"], Value::Null);
    assert_eq!(body["error"]["code"], 400);
    assert_eq!(body["error"]["message"], "_InvalidRequest");

    let inbound = Inbound::post_json(json!({"method": "Echo", "params": {"in": "x"}, "id": null}));
    assert_eq!(engine.handle(inbound, LOCAL).await.status, 204);

    let inbound = Inbound::post_json(json!({
        "version": "1.1", "method": "Echo", "params": ["eleven"], "id": 11
    }));
    let body = engine.handle(inbound, LOCAL).await;
    assert_eq!(json_body(&body), &json!({"version": "1.1", "result": {"out": "eleven"}, "id": 11}));
}

#[tokio::test]
async fn json_rpc_1_1_describes_the_service() {
    let engine = support::start().await;
    let inbound = Inbound::post_json(json!({"version": "1.1", "method": "system.describe", "id": 1}));
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    let description = &json_body(&outbound)["result"];
    assert_eq!(description["name"], "test");
    assert_eq!(description["version"], "2.1");
    let procs = description["procs"].as_array().expect("procs");
    let echo = procs.iter().find(|p| p["name"] == "Echo").expect("Echo described");
    assert_eq!(echo["summary"], "Returns its input");
    assert_eq!(echo["params"][0]["name"], "in");
    let add = procs.iter().find(|p| p["name"] == "Add").expect("Add described");
    assert_eq!(add["params"][0]["type"], "num");
}

fn method_call(function: &str, members: &[(&str, Element)]) -> Inbound {
    let mut fields = Element::new("struct");
    for (name, value) in members {
        fields.add_child(
            Element::new("member")
                .with_child(Element::new("name").with_text(*name))
                .with_child(Element::new("value").with_child(value.clone())),
        );
    }
    Inbound::post_xml(
        Element::new("methodCall")
            .with_child(Element::new("methodName").with_text(function))
            .with_child(Element::new("params").with_child(
                Element::new("param").with_child(Element::new("value").with_child(fields)),
            )),
    )
}

#[tokio::test]
async fn xml_rpc_typed_values_and_faults() {
    let engine = support::start().await;

    let inbound = method_call(
        "Add",
        &[("a", Element::new("i4").with_text("40")), ("b", Element::new("int").with_text("2"))],
    );
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    let sum = xml_body(&outbound)
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .and_then(|v| v.child("struct"))
        .and_then(|s| s.child("member"))
        .and_then(|m| m.child("value"))
        .and_then(|v| v.child("i4"))
        .expect("typed sum");
    assert_eq!(sum.text(), Some("42"));

    let inbound = method_call(
        "Add",
        &[("a", Element::new("i4").with_text("1")), ("b", Element::new("string").with_text("x"))],
    );
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    let members: Vec<&Element> = xml_body(&outbound)
        .child("fault")
        .and_then(|f| f.child("value"))
        .and_then(|v| v.child("struct"))
        .map(|s| s.children_named("member").collect())
        .expect("fault struct");
    let value_of = |name: &str| {
        members
            .iter()
            .find(|m| m.child("name").map(Element::text_or_empty) == Some(name))
            .and_then(|m| m.child("value"))
            .and_then(|v| v.children().first())
            .map(|t| (t.name().to_string(), t.text_or_empty().to_string()))
    };
    assert_eq!(
        value_of("faultCode"),
        Some(("i4".to_string(), (FaultCode::InvalidRequest as i32).to_string()))
    );
    assert_eq!(value_of("faultString"), Some(("string".to_string(), "_InvalidRequest".to_string())));
}

#[tokio::test]
async fn xml_rpc_booleans_are_normalized() {
    let engine = support::start().await;
    let inbound = method_call("Pair", &[("a", Element::new("boolean").with_text("1"))]);
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(output("xml-rpc", "Pair", &outbound, "a").as_deref(), Some("true"));

    let inbound = method_call("Pair", &[("a", Element::new("boolean").with_text("yes"))]);
    let outbound = engine.handle(inbound, LOCAL).await;
    assert!(xml_body(&outbound).child("fault").is_some());
}

#[tokio::test]
async fn xml_rpc_arrays_become_data_elements() {
    let engine = support::start().await;
    let item = |id: &str| {
        Element::new("value").with_child(
            Element::new("struct").with_child(
                Element::new("member")
                    .with_child(Element::new("name").with_text("id"))
                    .with_child(Element::new("value").with_child(Element::new("string").with_text(id))),
            ),
        )
    };
    let array = Element::new("array").with_child(Element::new("data").with_child(item("1")).with_child(item("2")));
    let outbound = engine.handle(method_call("Store", &[("item", array)]), LOCAL).await;
    assert_eq!(output("xml-rpc", "Store", &outbound, "stored").as_deref(), Some("2"));
}

fn soap_request(function: &str, children: Vec<Element>) -> Inbound {
    let mut request = Element::new(format!("ns0:{function}Request")).with_attribute("xmlns:ns0", "urn:test");
    for child in children {
        request.add_child(child);
    }
    Inbound::post_xml(
        Element::new("soap:Envelope")
            .with_attribute("xmlns:soap", "http://schemas.xmlsoap.org/soap/envelope/")
            .with_child(Element::new("soap:Body").with_child(request)),
    )
}

fn soap_fault(outbound: &Outbound) -> (String, String) {
    let fault = xml_body(outbound)
        .child("Body")
        .and_then(|b| b.child("Fault"))
        .expect("SOAP fault");
    (
        fault.child("faultcode").map(|e| e.text_or_empty().to_string()).unwrap_or_default(),
        fault.child("faultstring").map(|e| e.text_or_empty().to_string()).unwrap_or_default(),
    )
}

#[tokio::test]
async fn soap_faults() {
    let engine = support::start().await;

    let outbound = engine.handle(soap_request("Echo", vec![]), LOCAL).await;
    assert_eq!(outbound.status, 500);
    assert_eq!(soap_fault(&outbound), ("soap:Client".to_string(), "_InvalidRequest".to_string()));

    let outbound = engine.handle(soap_request("Fail", vec![]), LOCAL).await;
    assert_eq!(outbound.status, 500);
    assert_eq!(soap_fault(&outbound), ("soap:Server".to_string(), "_InternalError".to_string()));

    let response = engine
        .handle(soap_request("Echo", vec![Element::new("ns0:in").with_text("soapy")]), LOCAL)
        .await;
    assert_eq!(response.status, 200);
    let element = xml_body(&response)
        .child("Body")
        .and_then(|b| b.child("EchoResponse"))
        .expect("response element");
    assert_eq!(element.name(), "ns0:EchoResponse");
    assert_eq!(element.attribute("xmlns:ns0"), Some("urn:test"));
}

#[tokio::test]
async fn soap_map_maps_nested_elements_onto_the_contract() {
    let engine = support::start().await;

    let item = Element::new("item").with_child(Element::new("id").with_text("7")).with_text("payload");
    let inbound = soap_request("Store", vec![item]).with_parameter(CONVENTION_PARAMETER, "soap-map");
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(outbound.status, 200);
    assert_eq!(output("soap-map", "Store", &outbound, "stored").as_deref(), Some("1"));

    let item = Element::new("item").with_child(Element::new("id").with_text("seven"));
    let inbound = soap_request("Store", vec![item]).with_parameter(CONVENTION_PARAMETER, "soap-map");
    let outbound = engine.handle(inbound, LOCAL).await;
    assert_eq!(soap_fault(&outbound).0, "soap:Client");
}

#[tokio::test]
async fn xml_envelope_rejects_duplicates() {
    let engine = support::start().await;
    let root = Element::new("request")
        .with_attribute("function", "Echo")
        .with_child(Element::new("param").with_attribute("name", "in").with_text("1"))
        .with_child(Element::new("param").with_attribute("name", "in").with_text("2"));
    let outbound = engine.handle(Inbound::post_xml(root), LOCAL).await;
    assert_eq!(outbound.status, 400);
    assert_eq!(support::error_code(&outbound).as_deref(), Some("_InvalidRequest"));
}

#[test]
fn data_sections_map_to_json_and_back() {
    let data = Element::new("data").with_child(
        Element::new("order")
            .with_attribute("id", "5")
            .with_child(Element::new("line").with_attribute("sku", "A").with_text("two")),
    );
    let value = tree::element_to_json(&data);
    assert_eq!(value, json!({"order": [{"id": "5", "line": [{"sku": "A", "pcdata": "two"}]}]}));
    assert_eq!(tree::json_to_element("data", &value).expect("element"), data);

    assert!(tree::json_to_element("data", &json!([1, 2])).is_err());
}

#[test]
fn characters_xml_cannot_carry_are_dropped() {
    assert_eq!(switchyard::xml::escape("bell\u{7}ed <ok>", false), "belled &lt;ok&gt;");
    assert_eq!(switchyard::xml::escape("a\tb\u{FFFE}", true), "a&#9;b");
    assert_eq!(switchyard::xml::escape("caf\u{e9} \u{1F600}", false), "caf\u{e9} \u{1F600}");

    let document = Element::new("param").with_attribute("name", "in\u{1}").with_text("x\u{0}y\ny").to_document();
    assert!(!document.contains("&#"), "{document}");
    assert!(document.contains("name=\"in\""), "{document}");
    assert!(document.contains(">xy\ny</param>"), "{document}");
}

#[test]
fn registry_construction() {
    let registry = ConventionRegistry::with_names(&["json-rpc-2.0", "standard"]).expect("registry");
    assert_eq!(registry.names(), vec!["json-rpc-2.0", "standard"]);
    assert!(ConventionRegistry::with_names(&["carrier-pigeon"]).is_err());
    assert_eq!(ConventionRegistry::default().names(), BUILT_IN.to_vec());
}
