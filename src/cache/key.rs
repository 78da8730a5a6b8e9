use uuid::Uuid;

/// Balance entries share the `{transactions}` hash tag so every balance key
/// maps to the same cluster slot and one `MGET` covers a whole batch.
pub const DEFAULT_NAMESPACE: &str = "balance:{transactions}";

/// Distributed locks written by the command side. Never read here.
pub const LOCK_NAMESPACE: &str = "lock:{transactions}";

/// Cache key for the balance `alias#key` under an organization and ledger.
///
/// `%` and `#` inside `alias` or `key` are percent-escaped, so two distinct
/// `(alias, key)` pairs never produce the same string.
pub fn balance_key(
    namespace: &str,
    organization_id: Uuid,
    ledger_id: Uuid,
    alias: &str,
    key: &str,
) -> String {
    format!(
        "{}:{}:{}:{}#{}",
        namespace,
        organization_id,
        ledger_id,
        escape(alias),
        escape(key)
    )
}

fn escape(part: &str) -> std::borrow::Cow<'_, str> {
    if !part.contains(['%', '#']) {
        return part.into();
    }

    let mut out = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            other => out.push(other),
        }
    }
    out.into()
}
