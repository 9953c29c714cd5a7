use super::pool::JobNode;

/// Orders jobs by creation time, then by `namespace_name`.
///
/// This is a strict total order over distinct jobs, so a job always sorts
/// next to any stale copy of itself.
pub fn fifo_compare(a: &JobNode, b: &JobNode) -> bool {
    let a_ts = a.job().metadata.creation_timestamp;
    let b_ts = b.job().metadata.creation_timestamp;
    (a_ts, a.id()) < (b_ts, b.id())
}
