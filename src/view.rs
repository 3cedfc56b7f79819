//! View renderer collaborator contract.

use std::collections::HashMap;

use serde_json::Value;

/// View arguments handed to the renderer.
pub type ViewArgs = HashMap<String, Value>;

/// Turns a template reference plus view arguments into body bytes.
///
/// Errors surface to the client as `500 Internal Server Error`.
pub trait ViewRenderer: Send + Sync + 'static {
    fn render(&self, template: &str, args: &ViewArgs) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
}
