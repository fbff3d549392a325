use crate::tools::extract_string_arg;
use crate::traits::Tool;
use async_trait::async_trait;
use serde_json::json;

const DEMO_PRICE_USD: f64 = 42.00;

/// Demo catalog lookup. Synthesizes a placeholder part record from the SKU.
pub struct LookupPartTool;

#[async_trait]
impl Tool for LookupPartTool {
    fn name(&self) -> &str {
        "lookup_part"
    }

    fn description(&self) -> &str {
        "Return basic details for a SKU."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "sku": {
                    "type": "string",
                    "description": "Stock keeping unit to look up"
                }
            },
            "required": ["sku"]
        })
    }

    fn output_schema(&self) -> Option<serde_json::Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "sku": { "type": "string" },
                "name": { "type": "string" },
                "price_usd": { "type": "number" }
            },
            "required": ["sku", "name", "price_usd"]
        }))
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let sku = extract_string_arg(&args, "sku")?;

        Ok(json!({
            "name": format!("Demo Part {sku}"),
            "price_usd": DEMO_PRICE_USD,
            "sku": sku,
        }))
    }
}
