use anyhow::{Context, Result};
use surface::InputMap;

use super::Session;

/// Split `name=value` arguments.
fn parse_params(params: &[String]) -> Result<InputMap> {
    let pairs = params
        .iter()
        .map(|p| {
            p.split_once('=')
                .with_context(|| format!("Invalid parameter '{}', expected NAME=VALUE", p))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(InputMap::from_pairs(pairs))
}

pub fn run(session: &Session, path: &str, op: Option<&str>, params: &[String]) -> Result<()> {
    let inputs = parse_params(params)?;
    let body = session.call(path, op, &inputs)?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
