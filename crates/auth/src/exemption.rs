use std::sync::Arc;

use {serde_json::Value, tollgate_protocol::called_methods};

use crate::gate::{ExemptionPredicate, RequestMeta};

/// Exempt every request whose JSON-RPC body calls only methods outside
/// `prefixes`.
///
/// A batch is exempt only if each of its entries names an unprotected
/// method. Requests without a parsed body (WebSocket upgrades) and bodies
/// with unreadable entries are never exempt.
pub fn protected_methods<I, S>(prefixes: I) -> ExemptionPredicate
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    Arc::new(move |req: &RequestMeta<'_>| {
        req.body
            .is_some_and(|body| calls_only_unprotected(body, &prefixes))
    })
}

fn calls_only_unprotected(body: &Value, prefixes: &[String]) -> bool {
    let expected = match body {
        Value::Array(calls) => calls.len(),
        _ => 1,
    };
    let methods = called_methods(body);
    expected > 0
        && methods.len() == expected
        && methods
            .iter()
            .all(|method| !prefixes.iter().any(|p| method.starts_with(p.as_str())))
}
