//! A Cypher statement plus its bound parameters, independent of any driver.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::record::{Constants, Record};

/// Name of the list parameter every batched write is bound to.
pub const DICT_LIST: &str = "DictList";

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    params: BTreeMap<String, Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Bind every constant as a scalar parameter of the same name.
    pub fn constants(mut self, constants: &Constants) -> Self {
        for (name, value) in constants.iter() {
            self.params.insert(name.to_string(), value.clone());
        }
        self
    }

    /// Bind a batch of records as the `$DictList` parameter.
    pub fn batch(self, records: &[Record]) -> Self {
        let list = records.iter().cloned().map(Value::Object).collect::<Vec<_>>();
        self.param(DICT_LIST, Value::Array(list))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Number of records bound as `$DictList`, if any.
    pub fn batch_len(&self) -> Option<usize> {
        self.params
            .get(DICT_LIST)
            .and_then(Value::as_array)
            .map(Vec::len)
    }
}
