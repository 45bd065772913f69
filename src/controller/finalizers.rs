//! # Finalizers
//!
//! Pure helpers over a resource's finalizer list. Order is always preserved.

/// Append `token` unless it is already present
#[must_use]
pub fn add_finalizer(finalizers: &[String], token: &str) -> Vec<String> {
    let mut updated = finalizers.to_vec();
    if !has_finalizer(finalizers, token) {
        updated.push(token.to_string());
    }
    updated
}

/// Remove every occurrence of `token`
#[must_use]
pub fn remove_finalizer(finalizers: &[String], token: &str) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != token)
        .cloned()
        .collect()
}

#[must_use]
pub fn has_finalizer(finalizers: &[String], token: &str) -> bool {
    finalizers.iter().any(|f| f == token)
}
