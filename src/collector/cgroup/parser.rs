//! Parsers for cgroup v2 interface files.

/// Looks up a `key value` line in a flat-keyed file such as `cpu.stat`.
fn flat_key(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next() != Some(key) {
            return None;
        }
        parts.next()?.parse().ok()
    })
}

/// Parses `usage_usec` from `cpu.stat`.
pub fn parse_usage_usec(content: &str) -> Option<u64> {
    flat_key(content, "usage_usec")
}

/// Parses the working-set refault page count from `memory.stat`.
///
/// Kernels since 5.9 split the counter into `workingset_refault_anon` and
/// `workingset_refault_file`; their sum is used when the combined key is
/// absent.
pub fn parse_workingset_refault(content: &str) -> Option<u64> {
    if let Some(v) = flat_key(content, "workingset_refault") {
        return Some(v);
    }

    let anon = flat_key(content, "workingset_refault_anon");
    let file = flat_key(content, "workingset_refault_file");
    match (anon, file) {
        (None, None) => None,
        (a, f) => Some(a.unwrap_or(0) + f.unwrap_or(0)),
    }
}
