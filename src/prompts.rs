//! Instruction prompts for VLM-based receipt extraction.
//!
//! Every prompt fragment lives here so that rule changes happen in one place
//! and unit tests can inspect the exact text sent to the model without
//! spinning up a provider.

/// Literal reply the model must give when the image is not a receipt.
pub const NOT_A_RECEIPT_SENTINEL: &str = "None";

/// Reserved category for items that match none of the allowed categories.
pub const OTHER_CATEGORY: &str = "Other";

/// Extraction rules. `{categories}` is replaced with the allowed list.
const RULES: &str = r#"Given this receipt image, follow the rules below and reply with a single JSON object.

Follow these rules:
1. Get each item and its cost, plus the subtotal, taxes, other fees, and total.
2. If the name of an item is unclear or not a well known item, use the recognizable canonical name for it.
3. Do NOT give a description of the item or the payment method.
4. Include the vendor name.
5. Include the date of the transaction as YYYY-MM-DD. If it is not legible, use today's date in UTC ({today}).

Category rules:
- Assign exactly one category to each item.
- The available categories are {categories}. Do NOT invent new categories.
- If an item does not match one of the categories, put it in "Other".

If the image is not a receipt, reply with the text None and NOTHING ELSE."#;

/// Target output shape shown to the model.
const OUTPUT_FORMAT: &str = r#"

Output format:
- Output ONLY the JSON object
- Do NOT wrap it in ```json fences
- Do NOT add commentary or explanations

The JSON object must follow this shape:
{
  "vendor": "Corner Cafe",
  "date": "2025-09-13",
  "items": [
    {"name": "Coffee", "cost": 3.50, "category": "Food"},
    {"name": "Notebook", "cost": 5.00, "category": "Stationery"}
  ],
  "subtotal": 8.50,
  "taxes": 0.50,
  "fees": 0.00,
  "total": 9.00
}"#;

/// Build the instruction text for one extraction call.
///
/// `Other` is appended to the allowed list when the caller did not include
/// it, so the fallback category is always a valid choice. `today` is the UTC
/// date the model should use when the receipt date is illegible.
pub fn receipt_instructions(categories: &[String], today: &str) -> String {
    let mut allowed: Vec<&str> = categories.iter().map(String::as_str).collect();
    if !allowed.iter().any(|c| c.eq_ignore_ascii_case(OTHER_CATEGORY)) {
        allowed.push(OTHER_CATEGORY);
    }
    let list = allowed
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");

    let mut text = RULES
        .replace("{categories}", &format!("[{list}]"))
        .replace("{today}", today);
    text.push_str(OUTPUT_FORMAT);
    text
}
