use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RESPONSE_FIELD: &str = "response";

const NAME_FIELD: &str = "name";
const DATA_FIELD: &str = "dataAsMap";

/// Uniform output record of a remote call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTensor {
    pub name: String,
    #[serde(rename = "dataAsMap")]
    pub data_as_map: Option<Map<String, Value>>,
}

impl ModelTensor {
    pub fn new(name: impl Into<String>, data_as_map: Option<Map<String, Value>>) -> Self {
        Self {
            name: name.into(),
            data_as_map,
        }
    }

    /// tensor named `response` carrying `value` under the `response` key
    pub fn response(value: Value) -> Self {
        let mut data = Map::new();
        data.insert(RESPONSE_FIELD.to_owned(), value);
        Self::new(RESPONSE_FIELD, Some(data))
    }
}

/// Append the tensors described by a raw remote response to `tensors`.
///
/// Tensor documents (`{"name": .., "dataAsMap": ..}` or a non empty array of them)
/// decode as is. Strings holding json are parsed first. Any other object becomes a
/// `response` tensor with the object as its data, any other scalar is stored under
/// the `response` key. Arrays yield one tensor per element unless
/// `wrap_response_in_array` is set, in which case the whole array is kept in a single
/// `response` tensor.
pub fn normalize(raw: &Value, tensors: &mut Vec<ModelTensor>, wrap_response_in_array: bool) {
    match raw {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) if !parsed.is_string() => {
                push_value(parsed, tensors, wrap_response_in_array)
            }
            _ => tensors.push(ModelTensor::response(raw.clone())),
        },
        other => push_value(other.clone(), tensors, wrap_response_in_array),
    }
}

fn push_value(value: Value, tensors: &mut Vec<ModelTensor>, wrap_response_in_array: bool) {
    if let Some(decoded) = tensor_documents(&value) {
        tensors.extend(decoded);
        return;
    }
    match value {
        Value::Array(items) if !wrap_response_in_array => {
            tensors.extend(items.into_iter().map(into_tensor));
        }
        other => tensors.push(into_tensor(other)),
    }
}

fn into_tensor(value: Value) -> ModelTensor {
    match value {
        Value::Object(map) => ModelTensor::new(RESPONSE_FIELD, Some(map)),
        other => ModelTensor::response(other),
    }
}

fn is_tensor_document(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    map.len() == 2
        && map.get(NAME_FIELD).is_some_and(Value::is_string)
        && map
            .get(DATA_FIELD)
            .is_some_and(|data| data.is_object() || data.is_null())
}

fn tensor_documents(value: &Value) -> Option<Vec<ModelTensor>> {
    let shaped = match value {
        Value::Array(items) => !items.is_empty() && items.iter().all(is_tensor_document),
        single => is_tensor_document(single),
    };
    if !shaped {
        return None;
    }
    match value {
        Value::Array(_) => serde_json::from_value(value.clone()).ok(),
        single => serde_json::from_value(single.clone()).ok().map(|t| vec![t]),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn parse(raw: Value, wrap: bool) -> Vec<ModelTensor> {
        let mut tensors = vec![];
        normalize(&raw, &mut tensors, wrap);
        tensors
    }

    fn data(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    #[test]
    fn test_scalar() {
        assert_eq!(
            parse(json!(42), false),
            vec![ModelTensor::new("response", data(json!({"response": 42})))]
        );
        assert_eq!(parse(json!(true), true), vec![ModelTensor::response(json!(true))]);
    }

    #[test]
    fn test_plain_string() {
        assert_eq!(
            parse(json!("not json"), false),
            vec![ModelTensor::response(json!("not json"))]
        );
    }

    #[test]
    fn test_object() {
        let raw = json!({"embedding": [0.1, 0.2], "model": "m"});
        assert_eq!(
            parse(raw.clone(), false),
            vec![ModelTensor::new("response", data(raw))]
        );
    }

    #[test]
    fn test_json_string() {
        assert_eq!(
            parse(json!(r#"{"answer": "yes"}"#), false),
            vec![ModelTensor::new("response", data(json!({"answer": "yes"})))]
        );
        assert_eq!(
            parse(json!("[1, 2]"), false),
            vec![ModelTensor::response(json!(1)), ModelTensor::response(json!(2))]
        );
    }

    #[test]
    fn test_array_wrapping() {
        let raw = json!([{"a": 1}, {"b": 2}]);
        assert_eq!(
            parse(raw.clone(), false),
            vec![
                ModelTensor::new("response", data(json!({"a": 1}))),
                ModelTensor::new("response", data(json!({"b": 2}))),
            ]
        );
        assert_eq!(parse(raw.clone(), true), vec![ModelTensor::response(raw)]);
    }

    #[test]
    fn test_tensor_documents_decode_directly() {
        let raw = json!([
            {"name": "sentence_embedding", "dataAsMap": {"data": [1, 2]}},
            {"name": "empty", "dataAsMap": null}
        ]);
        let expected = vec![
            ModelTensor::new("sentence_embedding", data(json!({"data": [1, 2]}))),
            ModelTensor::new("empty", None),
        ];
        assert_eq!(parse(raw.clone(), false), expected);
        assert_eq!(parse(raw, true), expected);

        // a lone name is a plain provider object
        assert_eq!(
            parse(json!({"name": "bob"}), false),
            vec![ModelTensor::new("response", data(json!({"name": "bob"})))]
        );
    }

    #[test]
    fn test_round_trip() {
        for wrap in [false, true] {
            for raw in [
                json!(42),
                json!("plain"),
                json!({"k": "v"}),
                json!([{"a": 1}, 3]),
            ] {
                let tensors = parse(raw, wrap);
                let serialized = serde_json::to_value(&tensors).expect("serialize");
                assert_eq!(parse(serialized.clone(), wrap), tensors);
                assert_eq!(
                    parse(Value::String(serialized.to_string()), wrap),
                    tensors
                );
            }
        }
    }
}
