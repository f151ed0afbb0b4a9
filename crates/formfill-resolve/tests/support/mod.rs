//! Shared test doubles: a small scripted path evaluator and a loader
//! that records the batched calls it receives.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use formfill_model::{Resource, Value};
use formfill_resolve::{EvalEnv, EvalResult, LoadError, PathEvaluator, ResourceLoader, StaticLoader};

/// Evaluates `%var.field.chain` against the bound resources, plus an
/// `itemAnswer('link-id')` form that reads the current response item.
/// Exact-text overrides take precedence over both.
#[derive(Default)]
pub struct TestEvaluator {
    pub overrides: HashMap<String, EvalResult>,
}

impl TestEvaluator {
    pub fn with(mut self, expression: impl Into<String>, result: EvalResult) -> Self {
        self.overrides.insert(expression.into(), result);
        self
    }
}

impl PathEvaluator for TestEvaluator {
    fn evaluate(&self, expression: &str, env: &EvalEnv) -> Option<EvalResult> {
        if let Some(result) = self.overrides.get(expression) {
            return Some(result.clone());
        }

        if let Some(rest) = expression.strip_prefix("itemAnswer('") {
            let link_id = rest.strip_suffix("')")?;
            let item = env.response_item.as_ref()?;
            let values = item.matching(link_id).first()?.answer_values();
            return Some(EvalResult::of(values));
        }

        let mut parts = expression.split('.');
        let var = parts.next()?.strip_prefix('%')?;
        let mut values = env.bindings.get(var)?.clone();
        for field in parts {
            values = values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Resource(r) => r.field(field).cloned(),
                    _ => None,
                })
                .flat_map(json_values)
                .collect();
        }
        Some(EvalResult::of(values))
    }
}

fn json_values(json: serde_json::Value) -> Vec<Value> {
    match json {
        serde_json::Value::Array(items) => items.into_iter().flat_map(json_values).collect(),
        serde_json::Value::String(s) => vec![Value::Text(s)],
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Decimal))
            .into_iter()
            .collect(),
        serde_json::Value::Bool(b) => vec![Value::Bool(b)],
        serde_json::Value::Object(_) => vec![Value::Resource(Resource::from_json(json))],
        serde_json::Value::Null => Vec::new(),
    }
}

/// Wraps a [`StaticLoader`] and records every batched url set.
pub struct RecordingLoader {
    inner: StaticLoader,
    pub requests: Mutex<Vec<Vec<String>>>,
}

impl RecordingLoader {
    pub fn new(inner: StaticLoader) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceLoader for RecordingLoader {
    async fn fetch(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<Resource>>, LoadError> {
        self.requests.lock().unwrap().push(urls.to_vec());
        self.inner.fetch(urls, cancel).await
    }
}
