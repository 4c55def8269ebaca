#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::json;
use weave::reactive::{Path, Value};

fuzz_target!(|data: &[u8]| {
    let Ok(expr) = std::str::from_utf8(data) else {
        return;
    };
    let Some(path) = Path::parse(expr) else {
        return;
    };
    assert!(!path.segments().is_empty());
    assert_eq!(path.head(), &*path.segments()[0]);
    let root = Value::from_json(json!({"a": {"b": [1, 2, {"c": true}]}}));
    let _ = path.resolve(&root);
});
