//! 工具参数 JSON Schema 生成（schemars 自动生成，保证声明与参数结构体一致）

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::Value;

/// 由参数结构体生成 function-calling 所需的 parameters schema：
/// 内联子 schema，去掉 `$schema` / `title` / `definitions`
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let root = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("definitions");
    }
    value
}
