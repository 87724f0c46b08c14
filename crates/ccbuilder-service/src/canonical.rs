//! Parameter canonicalization for requests.

use uuid::Uuid;

use ccbuilder_core::{ChainParameters, Error, Result, Store};

/// Validate every chain and map it to its canonical id, preserving order.
///
/// Identical chains in one request map to the same id.
pub async fn canonicalize(store: &dyn Store, parameters: &[ChainParameters]) -> Result<Vec<Uuid>> {
    if parameters.is_empty() {
        return Err(Error::InvalidInput(
            "at least one chain is required".to_string(),
        ));
    }

    for (index, chain) in parameters.iter().enumerate() {
        chain
            .validate()
            .map_err(|e| Error::InvalidInput(format!("chain {}: {}", index, strip_prefix(&e))))?;
    }

    let mut ids = Vec::with_capacity(parameters.len());
    for chain in parameters {
        ids.push(store.parameters().lookup_or_insert(chain).await?);
    }
    Ok(ids)
}

fn strip_prefix(error: &Error) -> String {
    match error {
        Error::InvalidInput(message) => message.clone(),
        other => other.to_string(),
    }
}
