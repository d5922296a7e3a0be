//! Emit the OpenAPI document as JSON on stdout.

use anyhow::Result;

fn main() -> Result<()> {
    let spec = stadion::api::openapi();
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(())
}
