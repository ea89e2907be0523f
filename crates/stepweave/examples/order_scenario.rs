//! Order Scenario.
//!
//! This example runs a two-step scenario against an in-memory order service:
//! 1. Create an order and capture its id
//! 2. Fetch the order by the captured id and check its state
//!
//! The service is described by a definition document, its transport is
//! built by a factory keyed by client tag, and the scenario is read from a
//! document the way a suite file would be.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use stepweave::prelude::*;

// In-memory stand-in for an HTTP order API
#[derive(Debug, Default)]
struct InMemoryOrders {
    orders: Mutex<HashMap<String, Document>>,
}

#[async_trait]
impl Transport for InMemoryOrders {
    async fn execute(&self, request: Document) -> Result<Document, StepweaveError> {
        let mut orders = self
            .orders
            .lock()
            .map_err(|e| StepweaveError::transport("orders", e))?;

        match request["method"].as_str() {
            Some("POST") => {
                let id = format!("A-{}", orders.len() + 1);
                let order = json!({
                    "orderId": id,
                    "state": ["OPEN"],
                    "lines": request["body"]["lines"].clone(),
                });
                orders.insert(id, order.clone());
                // Bodies arrive serialized, as they would over the wire
                Ok(json!({"status": 201, "body": order.to_string()}))
            }
            Some("GET") => {
                let id = request["query"]["id"].as_str().unwrap_or_default();
                match orders.get(id) {
                    Some(order) => Ok(json!({"status": 200, "body": order})),
                    None => Err(StepweaveError::transport(
                        "orders",
                        format!("order '{id}' not found"),
                    )),
                }
            }
            other => Err(StepweaveError::transport(
                "orders",
                format!("unsupported method {other:?}"),
            )),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let services = json!({
        "orders": {
            "client": "REST",
            "defaults": {"baseUri": "https://shop.test", "headers": {"accept": "application/json"}},
            "apis": [
                {"name": "createOrder", "method": "POST", "path": "/orders"},
                {"name": "getOrder", "method": "GET", "path": "/orders"}
            ],
            "settings": {"maxRetries": 1, "retryDelayMs": 100}
        }
    });
    let factory = TransportFactory::new().register("REST", |_definition| {
        Ok(Arc::new(InMemoryOrders::default()) as Arc<dyn Transport>)
    });
    let catalog = ServiceCatalog::from_definitions(&services, &factory)?;

    let scenario = Scenario::from_document(&json!({
        "testcaseId": "ORD-1",
        "testcaseName": "create then fetch order",
        "steps": [
            {
                "service": "orders",
                "method": "createOrder",
                "request": {"body": {"lines": [{"sku": "X", "qty": 2}]}},
                "validation": ["$.body.lines[*].sku"],
                "variables": {"orderId": "$.body.orderId"}
            },
            {
                "service": "orders",
                "method": "getOrder",
                "request": {"query": {"id": "${orderId}"}},
                "validation": ["$.body.state"],
                "variables": {"state": "$.body.state[0]"}
            }
        ]
    }))?;

    let orchestrator = Orchestrator::builder()
        .registry(catalog)
        .substitute_variables(true)
        .build()?;

    let mut variables = VariableCache::new();
    match orchestrator.run_scenario(&scenario, &mut variables).await {
        Ok(run) => {
            println!("\n{} passed in {:?}", run.name, run.elapsed);
            for step in &run.steps {
                println!("  #{} {} ({} attempt(s))", step.index, step.name, step.attempts);
            }
            for (name, value) in variables.iter() {
                println!("  {name} = {value}");
            }
        }
        Err(failure) => eprintln!("Scenario failed: {failure}"),
    }

    Ok(())
}
