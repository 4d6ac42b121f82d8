//! Send command

use anyhow::{Context, Result, bail};
use coreplex::{Client, Request};
use serde_json::Value;

/// Send one request and print the reply as pretty JSON.
pub async fn cmd_send(url: &str, operation: &str, data: &str, parameters: Option<&str>) -> Result<()> {
  let mut request = Request::new(operation, data);
  if let Some(raw) = parameters {
    let Value::Object(map) = serde_json::from_str(raw).context("Invalid --parameters JSON")? else {
      bail!("--parameters must be a JSON object");
    };
    request = request.with_parameters(map);
  }

  let mut client = Client::connect(url)
    .await
    .with_context(|| format!("Failed to connect to {url}"))?;
  let reply = client.call(&request).await.context("Request failed")?;
  let _ = client.close().await;

  println!("{}", serde_json::to_string_pretty(&reply)?);

  if let Some(error) = reply.error() {
    bail!("Controller returned an error: {}", error.error);
  }
  Ok(())
}
